//! Process-wide counters for promotion runs.
//!
//! Counters are bumped at the call site and emitted together by
//! [`Metrics::flush`] at the end of a command.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    proposals_emitted: AtomicU64,
    proposals_rejected: AtomicU64,
    matrix_cells_failed: AtomicU64,
    promotions_applied: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            proposals_emitted: AtomicU64::new(0),
            proposals_rejected: AtomicU64::new(0),
            matrix_cells_failed: AtomicU64::new(0),
            promotions_applied: AtomicU64::new(0),
        }
    }

    pub fn add_proposals_emitted(&self, n: u64) {
        self.proposals_emitted.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "proposals_emitted", n, "counter incremented");
    }

    pub fn inc_proposals_rejected(&self) {
        self.proposals_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "proposals_rejected", "counter incremented");
    }

    pub fn inc_matrix_cells_failed(&self) {
        self.matrix_cells_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "matrix_cells_failed", "counter incremented");
    }

    pub fn inc_promotions_applied(&self) {
        self.promotions_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "promotions_applied", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            proposals_emitted = self.proposals_emitted(),
            proposals_rejected = self.proposals_rejected(),
            matrix_cells_failed = self.matrix_cells_failed(),
            promotions_applied = self.promotions_applied(),
        );
    }

    pub fn proposals_emitted(&self) -> u64 {
        self.proposals_emitted.load(Ordering::Relaxed)
    }

    pub fn proposals_rejected(&self) -> u64 {
        self.proposals_rejected.load(Ordering::Relaxed)
    }

    pub fn matrix_cells_failed(&self) -> u64 {
        self.matrix_cells_failed.load(Ordering::Relaxed)
    }

    pub fn promotions_applied(&self) -> u64 {
        self.promotions_applied.load(Ordering::Relaxed)
    }
}
