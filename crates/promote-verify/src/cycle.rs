//! Full promotion cycle: propose, verify, promote.

use std::sync::Arc;

use channel_store::ChannelStore;
use chrono::{DateTime, Utc};
use promote_core::{
    propose, PromoteConfig, PromotionReport, PromotionRequest, Promoter, ProposalRun,
};
use serde::Serialize;
use tracing::info;

use crate::coordinator::{CoordinatorConfig, VerificationCoordinator};
use crate::error::VerifyResult;
use crate::gate::VerificationOutcome;
use crate::runner::UpgradeTester;

/// Everything a cycle did, per proposal.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub run: ProposalRun,
    pub outcomes: Vec<VerificationOutcome>,
    /// One entry per proposal that passed verification.
    pub promotions: Vec<PromotionReport>,
}

/// Printable per-proposal line of a [`CycleReport`].
#[derive(Debug, Clone, Serialize)]
pub struct CycleEntry<'a> {
    pub proposal: &'a str,
    pub revision: String,
    pub destination: &'a str,
    pub verified: bool,
    pub promotion: Option<&'a PromotionReport>,
}

impl CycleReport {
    pub fn verification_failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed).count()
    }

    pub fn promotion_failures(&self) -> usize {
        self.promotions
            .iter()
            .filter(|p| p.status.is_failure())
            .count()
    }

    pub fn entries(&self) -> Vec<CycleEntry<'_>> {
        let mut promotions = self.promotions.iter();
        self.outcomes
            .iter()
            .map(|outcome| CycleEntry {
                proposal: &outcome.proposal.display_name,
                revision: outcome.proposal.revision.to_string(),
                destination: &outcome.proposal.destination_channel,
                verified: outcome.passed,
                promotion: if outcome.passed {
                    promotions.next()
                } else {
                    None
                },
            })
            .collect()
    }
}

pub struct PromotionCycle {
    store: Arc<dyn ChannelStore>,
    coordinator: VerificationCoordinator,
}

impl PromotionCycle {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        tester: Arc<dyn UpgradeTester>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            coordinator: VerificationCoordinator::new(tester, config),
        }
    }

    /// Propose against the current channel map, verify every proposal and
    /// promote the ones that passed.
    ///
    /// Store read failures abort before any test runs. Failed verifications
    /// and failed promotions are reported per proposal.
    pub async fn run(&self, config: &PromoteConfig, now: DateTime<Utc>) -> VerifyResult<CycleReport> {
        let run = propose(self.store.as_ref(), config, now).await?;

        let outcomes = self.coordinator.verify(&run.report.proposals).await;
        let requests: Vec<PromotionRequest> = outcomes
            .iter()
            .filter(|o| o.passed)
            .map(|o| PromotionRequest::from(&o.proposal))
            .collect();
        info!(
            run_id = %run.run_id,
            verified = requests.len(),
            failed = outcomes.len() - requests.len(),
            "Verification complete"
        );

        let promoter = Promoter::new(Arc::clone(&self.store), config.dry_run);
        let promotions = promoter.promote_all(requests).await;

        Ok(CycleReport {
            run,
            outcomes,
            promotions,
        })
    }
}
