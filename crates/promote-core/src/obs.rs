//! Structured lifecycle events for promotion runs.
//!
//! - `RunSpan`: RAII guard that tags everything inside a run with its id.
//! - `emit_*`: one function per event, so field names stay consistent across
//!   the pipeline, the verifier and the CLI.

use std::fmt::Display;

use tracing::{info, warn};

/// Run-scoped span guard.
///
/// ```ignore
/// let _span = RunSpan::enter(&run_id);
/// // every event below carries run_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("snap_promote.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_snapshot_loaded(snap_name: &str, entries: usize, tracks: usize) {
    info!(event = "snapshot.loaded", snap = %snap_name, entries, tracks);
}

/// A slot left out of the proposal set, with the reason.
pub fn emit_rule_skipped(track: &str, architecture: &str, risk: &str, reason: &dyn Display) {
    info!(
        event = "rule.skipped",
        track = %track,
        architecture = %architecture,
        risk = %risk,
        reason = %reason,
    );
}

pub fn emit_rule_eligible(track: &str, architecture: &str, from: &str, to: &str, revision: &str) {
    info!(
        event = "rule.eligible",
        track = %track,
        architecture = %architecture,
        from = %from,
        to = %to,
        revision = %revision,
    );
}

pub fn emit_proposal_built(display_name: &str, matrix_size: usize) {
    info!(event = "proposal.built", name = %display_name, matrix_size);
}

pub fn emit_proposal_rejected(track: &str, architecture: &str, error: &dyn Display) {
    warn!(
        event = "proposal.rejected",
        track = %track,
        architecture = %architecture,
        error = %error,
    );
}

pub fn emit_proposals_emitted(count: usize, matrix_size: usize, digest: &str) {
    info!(event = "proposals.emitted", count, matrix_size, digest = %digest);
}

/// One (image, upgrade path) cell of a proposal's matrix finished.
pub fn emit_matrix_cell_finished(
    proposal: &str,
    image: &str,
    upgrade: &str,
    passed: bool,
    duration_ms: u64,
) {
    info!(
        event = "matrix.cell_finished",
        proposal = %proposal,
        image = %image,
        upgrade = %upgrade,
        passed,
        duration_ms,
    );
}

pub fn emit_verification_finished(proposal: &str, cells: usize, failed: usize, passed: bool) {
    info!(
        event = "verification.finished",
        proposal = %proposal,
        cells,
        failed,
        passed,
    );
}

pub fn emit_promotion_applied(revision: &str, channel: &str) {
    info!(event = "promotion.applied", revision = %revision, channel = %channel);
}

pub fn emit_promotion_dry_run(revision: &str, channel: &str) {
    info!(event = "promotion.dry_run", revision = %revision, channel = %channel);
}

pub fn emit_promotion_noop(revision: &str, channel: &str) {
    info!(event = "promotion.noop", revision = %revision, channel = %channel);
}

pub fn emit_promotion_failed(revision: &str, channel: &str, error: &dyn Display) {
    warn!(
        event = "promotion.failed",
        revision = %revision,
        channel = %channel,
        error = %error,
    );
}
