//! Verification coordinator.
//!
//! Expands proposals into a queue of matrix cells and drains it on a bounded
//! worker pool. Cells are independent: a failure, error or panic in one cell
//! is recorded for that cell and nothing else is cancelled. Each proposal's
//! verdict is computed only once all of its cells have reported.

use std::sync::Arc;
use std::time::Instant;

use promote_core::{obs, ProposalSet, METRICS};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::gate::{VerificationGate, VerificationOutcome};
use crate::matrix::{build_matrix, MatrixCell};
use crate::runner::{CellResult, UpgradeTester};

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of cells running at once.
    pub max_concurrent: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

pub struct VerificationCoordinator {
    tester: Arc<dyn UpgradeTester>,
    config: CoordinatorConfig,
}

impl VerificationCoordinator {
    pub fn new(tester: Arc<dyn UpgradeTester>, config: CoordinatorConfig) -> Self {
        Self { tester, config }
    }

    /// Run every cell of every proposal and return one outcome per proposal,
    /// in proposal order.
    #[instrument(skip_all, fields(proposals = proposals.len()))]
    pub async fn verify(&self, proposals: &ProposalSet) -> Vec<VerificationOutcome> {
        let queue = build_matrix(proposals);
        let results = self.drain(&queue).await;

        let mut per_proposal: Vec<Vec<CellResult>> = vec![Vec::new(); proposals.len()];
        for (cell, result) in queue.into_iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                CellResult::fail(cell.clone(), 0, "matrix task did not complete")
            });
            if !result.passed {
                METRICS.inc_matrix_cells_failed();
            }
            per_proposal[cell.proposal_index].push(result);
        }

        proposals
            .proposals()
            .iter()
            .cloned()
            .zip(per_proposal)
            .map(|(proposal, cells)| {
                let outcome = VerificationGate::evaluate(proposal, cells);
                obs::emit_verification_finished(
                    &outcome.proposal.display_name,
                    outcome.cells.len(),
                    outcome.failed_cells().count(),
                    outcome.passed,
                );
                outcome
            })
            .collect()
    }

    /// Run the queue; slot `i` holds the result of `queue[i]`, or `None` if
    /// its task panicked.
    async fn drain(&self, queue: &[MatrixCell]) -> Vec<Option<CellResult>> {
        let sem = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (index, cell) in queue.iter().cloned().enumerate() {
            let tester = Arc::clone(&self.tester);
            let sem = Arc::clone(&sem);
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let start = Instant::now();
                let result = match tester.run_cell(&cell).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(cell = %cell.label(), error = %e, "upgrade test could not run");
                        CellResult::fail(cell, start.elapsed().as_millis() as u64, e.to_string())
                    }
                };
                obs::emit_matrix_cell_finished(
                    &result.cell.proposal,
                    &result.cell.image,
                    &result.cell.upgrade.to_string(),
                    result.passed,
                    result.duration_ms,
                );
                (index, result)
            });
        }

        let mut slots: Vec<Option<CellResult>> = vec![None; queue.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "matrix task failed"),
            }
        }
        slots
    }
}
