//! Scripted upgrade tester (testing only)

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{VerifyError, VerifyResult};
use crate::matrix::MatrixCell;
use crate::runner::{CellResult, UpgradeTester};

/// Tester whose verdicts are set up front, keyed by (proposal, image).
///
/// Unscripted cells pass. Tracks call count and peak concurrency.
#[derive(Debug, Default)]
pub struct ScriptedTester {
    failing: Mutex<HashSet<(String, String)>>,
    erroring: Mutex<HashSet<(String, String)>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every cell.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make the cell run but fail.
    pub fn fail_cell(&self, proposal: &str, image: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert((proposal.to_string(), image.to_string()));
    }

    /// Make the cell impossible to run.
    pub fn error_cell(&self, proposal: &str, image: &str) {
        self.erroring
            .lock()
            .unwrap()
            .insert((proposal.to_string(), image.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of cells observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpgradeTester for ScriptedTester {
    async fn run_cell(&self, cell: &MatrixCell) -> VerifyResult<CellResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = (cell.proposal.clone(), cell.image.clone());
        if self.erroring.lock().unwrap().contains(&key) {
            return Err(VerifyError::Spawn {
                program: "scripted".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such runner"),
            });
        }
        if self.failing.lock().unwrap().contains(&key) {
            return Ok(CellResult::fail(cell.clone(), 0, "scripted failure"));
        }
        Ok(CellResult::pass(cell.clone(), 0))
    }
}
