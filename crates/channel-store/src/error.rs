//! Error types for channel-store

use thiserror::Error;

/// Errors that can occur while reading or mutating the store's channel map
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport-level failure talking to the store
    #[error("store request failed: {0}")]
    Http(String),

    /// The store answered with a non-success status
    #[error("store returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// The store response could not be decoded
    #[error("malformed store response: {0}")]
    Decode(String),

    /// Store credentials are missing or unusable
    #[error("store credentials unavailable: {0}")]
    Credentials(String),

    /// A channel string did not have the `track/risk` shape
    #[error("invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    /// Unknown risk level name
    #[error("unknown risk level: {0}")]
    UnknownRisk(String),

    /// The revision is not known to the store
    #[error("revision {revision} is not published in any channel")]
    RevisionNotFound { revision: String },

    /// The store refused the release
    #[error("store rejected release of r{revision} to {channel}: {reason}")]
    ReleaseRejected {
        revision: String,
        channel: String,
        reason: String,
    },

    /// Release tool invocation failed
    #[error("release command failed: {0}")]
    Command(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}
