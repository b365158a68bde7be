//! Verification error taxonomy.

use std::path::PathBuf;

use promote_core::PromoteError;

/// Errors raised while preparing or running upgrade tests.
///
/// A failing test is not an error: it is reported as a failed cell. These
/// variants cover the cases where a test could not be run at all.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("test command is empty")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{cell}' timed out after {secs}s")]
    Timeout { cell: String, secs: u64 },

    #[error("no checkout of {repository} at {branches:?} contains {test_file}")]
    NoUpgradeTest {
        repository: String,
        branches: Vec<String>,
        test_file: PathBuf,
    },

    #[error("no test checkout for branch '{branch}': {reason}")]
    CheckoutUnavailable { branch: String, reason: String },

    #[error("failed to prepare checkout directory: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Promote(#[from] PromoteError),
}

pub type VerifyResult<T> = std::result::Result<T, VerifyError>;
