//! Applies approved promotions to the store.
//!
//! Every promotion first re-reads the destination track, so re-running a
//! promotion that already landed is a no-op. Dry-run stops right before the
//! mutation.

use std::sync::Arc;

use channel_store::{Channel, ChannelStore, Revision};
use futures::future::join_all;
use serde::Serialize;

use crate::domain::{PromotionProposal, Result};
use crate::obs;
use crate::METRICS;

/// Successful promotion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionOutcome {
    Promoted,
    AlreadyPublished,
    DryRun,
}

/// One requested promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionRequest {
    pub revision: Revision,
    pub channel: Channel,
}

impl PromotionRequest {
    pub fn new(revision: Revision, channel: Channel) -> Self {
        Self { revision, channel }
    }
}

impl From<&PromotionProposal> for PromotionRequest {
    fn from(proposal: &PromotionProposal) -> Self {
        Self {
            revision: proposal.revision,
            channel: Channel::new(proposal.track.clone(), proposal.destination_risk),
        }
    }
}

/// Per-request result of [`Promoter::promote_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PromotionStatus {
    Promoted,
    AlreadyPublished,
    DryRun,
    Failed { error: String },
}

impl PromotionStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, PromotionStatus::Failed { .. })
    }
}

impl From<PromotionOutcome> for PromotionStatus {
    fn from(outcome: PromotionOutcome) -> Self {
        match outcome {
            PromotionOutcome::Promoted => PromotionStatus::Promoted,
            PromotionOutcome::AlreadyPublished => PromotionStatus::AlreadyPublished,
            PromotionOutcome::DryRun => PromotionStatus::DryRun,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub request: PromotionRequest,
    pub status: PromotionStatus,
}

pub struct Promoter {
    store: Arc<dyn ChannelStore>,
    dry_run: bool,
}

impl Promoter {
    pub fn new(store: Arc<dyn ChannelStore>, dry_run: bool) -> Self {
        Self { store, dry_run }
    }

    /// Publish `revision` at `channel`.
    pub async fn promote(&self, revision: Revision, channel: &Channel) -> Result<PromotionOutcome> {
        let rev = revision.to_string();
        let target = channel.to_string();

        let current = self.store.list_published(Some(&channel.track)).await?;
        if current.is_published_at(revision, channel) {
            obs::emit_promotion_noop(&rev, &target);
            return Ok(PromotionOutcome::AlreadyPublished);
        }

        if self.dry_run {
            obs::emit_promotion_dry_run(&rev, &target);
            return Ok(PromotionOutcome::DryRun);
        }

        self.store.release(revision, channel).await?;
        METRICS.inc_promotions_applied();
        obs::emit_promotion_applied(&rev, &target);
        Ok(PromotionOutcome::Promoted)
    }

    /// Run every request concurrently. A failure is recorded for its request
    /// only; results keep request order.
    pub async fn promote_all(&self, requests: Vec<PromotionRequest>) -> Vec<PromotionReport> {
        let runs = requests.into_iter().map(|request| async move {
            let status = match self.promote(request.revision, &request.channel).await {
                Ok(outcome) => outcome.into(),
                Err(e) => {
                    obs::emit_promotion_failed(
                        &request.revision.to_string(),
                        &request.channel.to_string(),
                        &e,
                    );
                    PromotionStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            PromotionReport { request, status }
        });
        join_all(runs).await
    }
}
