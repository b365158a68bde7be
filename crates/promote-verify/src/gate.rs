//! Per-proposal verdict over its matrix results.

use promote_core::PromotionProposal;
use serde::Serialize;

use crate::runner::CellResult;

/// Terminal verification result for one proposal.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub proposal: PromotionProposal,

    /// Whether every cell of the matrix passed.
    pub passed: bool,

    /// Per-(image, upgrade path) results, in matrix order.
    pub cells: Vec<CellResult>,

    /// Reasons the proposal failed (empty if passed).
    pub violations: Vec<String>,
}

impl VerificationOutcome {
    pub fn failed_cells(&self) -> impl Iterator<Item = &CellResult> {
        self.cells.iter().filter(|c| !c.passed)
    }
}

pub struct VerificationGate;

impl VerificationGate {
    /// A proposal passes only if its matrix is non-empty, every expected
    /// cell reported, and every cell passed.
    pub fn evaluate(proposal: PromotionProposal, cells: Vec<CellResult>) -> VerificationOutcome {
        let mut violations = Vec::new();

        let expected = proposal.matrix_size();
        if expected == 0 {
            violations.push("empty test matrix".to_string());
        } else if cells.len() != expected {
            violations.push(format!(
                "expected {expected} matrix results, got {}",
                cells.len()
            ));
        }

        for cell in cells.iter().filter(|c| !c.passed) {
            violations.push(format!(
                "{} ({}): {}",
                cell.cell.image, cell.cell.upgrade, cell.diagnostics
            ));
        }

        VerificationOutcome {
            passed: violations.is_empty(),
            proposal,
            cells,
            violations,
        }
    }
}
