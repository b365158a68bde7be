//! Matrix fan-out.
//!
//! Each proposal expands into one [`MatrixCell`] per (image, upgrade path).
//! The resulting queue is what the coordinator's workers consume.

use channel_store::Revision;
use promote_core::{ProposalSet, UpgradePath};
use serde::{Deserialize, Serialize};

/// One upgrade test to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    /// Index of the owning proposal in its set.
    pub proposal_index: usize,
    /// Display name of the owning proposal.
    pub proposal: String,
    /// Source branch carrying the proposal's upgrade tests.
    pub branch: String,
    pub revision: Revision,
    pub image: String,
    pub upgrade: UpgradePath,
}

impl MatrixCell {
    /// Short label for logs and error messages.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.proposal, self.image, self.upgrade)
    }

    /// Environment handed to the test command.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("TEST_IMAGE", self.image.clone()),
            ("UPGRADE_FROM", self.upgrade.from.clone()),
            ("UPGRADE_TO", self.upgrade.to.clone()),
            ("SNAP_REVISION", self.revision.to_string()),
        ]
    }
}

/// Expand `proposals` into cells, ordered by proposal, image, then path.
pub fn build_matrix(proposals: &ProposalSet) -> Vec<MatrixCell> {
    let mut cells = Vec::with_capacity(proposals.matrix_size());
    for (proposal_index, proposal) in proposals.proposals().iter().enumerate() {
        for image in &proposal.environment_images {
            for upgrade in &proposal.upgrade_paths {
                cells.push(MatrixCell {
                    proposal_index,
                    proposal: proposal.display_name.clone(),
                    branch: proposal.branch.clone(),
                    revision: proposal.revision,
                    image: image.clone(),
                    upgrade: upgrade.clone(),
                });
            }
        }
    }
    cells
}
