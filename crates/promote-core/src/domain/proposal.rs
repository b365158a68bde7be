//! Promotion proposals handed to the verification layer.

use channel_store::{Revision, RiskLevel};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One upgrade to exercise: install from `from`, refresh to `to`.
///
/// Serialized as a two-element `[from, to]` array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct UpgradePath {
    /// Channel holding the prior published revision.
    pub from: String,
    /// Channel holding the candidate revision.
    pub to: String,
}

impl UpgradePath {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl From<(String, String)> for UpgradePath {
    fn from((from, to): (String, String)) -> Self {
        Self { from, to }
    }
}

impl From<UpgradePath> for (String, String) {
    fn from(path: UpgradePath) -> Self {
        (path.from, path.to)
    }
}

impl std::fmt::Display for UpgradePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// A computed promotion awaiting verification.
///
/// Built once by the proposal builder and only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionProposal {
    /// `{snap}-{track}-{destination}-{arch}`, used as the job name.
    pub display_name: String,
    pub snap_name: String,
    pub track: String,
    pub architecture: String,
    pub revision: Revision,
    pub version: String,
    pub source_risk: RiskLevel,
    pub destination_risk: RiskLevel,
    pub source_channel: String,
    pub destination_channel: String,
    /// Source branch carrying the upgrade tests for this track.
    pub branch: String,
    pub environment_images: Vec<String>,
    pub upgrade_paths: Vec<UpgradePath>,
    pub runner_labels: Vec<String>,
}

impl PromotionProposal {
    /// Number of (image, upgrade path) cells in this proposal's test matrix.
    pub fn matrix_size(&self) -> usize {
        self.environment_images.len() * self.upgrade_paths.len()
    }
}

/// Ordered proposal list for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalSet {
    proposals: Vec<PromotionProposal>,
}

impl ProposalSet {
    pub fn new(proposals: Vec<PromotionProposal>) -> Self {
        Self { proposals }
    }

    pub fn proposals(&self) -> &[PromotionProposal] {
        &self.proposals
    }

    pub fn into_proposals(self) -> Vec<PromotionProposal> {
        self.proposals
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    /// Total external jobs: one per proposal × image × upgrade path.
    pub fn matrix_size(&self) -> usize {
        self.proposals.iter().map(|p| p.matrix_size()).sum()
    }

    /// Compact JSON list for the job-matrix hand-off.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.proposals)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// SHA-256 of the serialized list. Equal sets give equal digests.
    pub fn digest(&self) -> serde_json::Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json()?.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}
