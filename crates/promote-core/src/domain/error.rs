//! Domain-level error taxonomy for snap-promote.

use std::path::PathBuf;

use channel_store::StoreError;

/// Errors raised while validating run configuration.
///
/// All of these are detected before the store is queried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid track pattern '{pattern}': {source}")]
    InvalidTrackPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown risk level: {0}")]
    UnknownRiskLevel(String),

    #[error("stable is terminal and takes no dwell threshold")]
    TerminalThreshold,

    #[error("malformed threshold '{0}', expected RISK=DAYS")]
    MalformedThreshold(String),

    #[error("unknown schedule '{0}', expected 'scheduled' or 'manual'")]
    UnknownSchedule(String),

    #[error("snap name must not be empty")]
    EmptySnapName,

    #[error("ignored architecture names must not be empty")]
    EmptyArchitecture,

    #[error("settings file {path}: {reason}")]
    Settings { path: PathBuf, reason: String },

    #[error("settings parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors that abort construction of a single proposal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProposalError {
    #[error("no environment images configured")]
    NoImages,

    #[error("environment image #{index} is empty")]
    EmptyImage { index: usize },

    #[error("upgrade path #{index} endpoint '{endpoint}' is not a channel")]
    InvalidUpgradePath { index: usize, endpoint: String },
}

/// Errors produced by the promotion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for promotion operations.
pub type Result<T> = std::result::Result<T, PromoteError>;
