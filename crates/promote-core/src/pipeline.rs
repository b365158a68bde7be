//! The propose pipeline: read, evaluate, build.
//!
//! Linear over one immutable snapshot. The only I/O is the initial store read,
//! so a failure there aborts the run before anything else happens.

use channel_store::{ChannelSnapshot, ChannelStore};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::builder::{BuildReport, ProposalBuilder};
use crate::config::PromoteConfig;
use crate::domain::Result;
use crate::obs;
use crate::rules::{Evaluation, RuleEngine};

/// Everything one propose run produced.
#[derive(Debug, Clone)]
pub struct ProposalRun {
    pub run_id: String,
    pub snapshot: ChannelSnapshot,
    pub evaluation: Evaluation,
    pub report: BuildReport,
    /// SHA-256 of the serialized proposal list.
    pub digest: String,
}

/// Read the channel map and compute the proposal set as of `now`.
pub async fn propose(
    store: &dyn ChannelStore,
    config: &PromoteConfig,
    now: DateTime<Utc>,
) -> Result<ProposalRun> {
    let run_id = Uuid::new_v4().to_string();
    let _span = obs::RunSpan::enter(&run_id);

    let snapshot = store.list_published(config.track_filter.as_deref()).await?;
    obs::emit_snapshot_loaded(
        &snapshot.snap_name,
        snapshot.entries().len(),
        snapshot.tracks().len(),
    );

    let evaluation = RuleEngine::new(config).evaluate(&snapshot, now);
    let report = ProposalBuilder::new(config).build(&evaluation.eligible, &snapshot);

    let digest = report.proposals.digest()?;
    obs::emit_proposals_emitted(report.proposals.len(), report.proposals.matrix_size(), &digest);

    Ok(ProposalRun {
        run_id,
        snapshot,
        evaluation,
        report,
        digest,
    })
}
