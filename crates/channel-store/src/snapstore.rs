//! Snap store client
//!
//! Reads the public channel map from the store info API and releases revisions
//! through the `snapcraft` CLI, which owns authentication against the store.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::storage_traits::{
    Channel, ChannelSnapshot, ChannelStore, PublishedRevision, Revision, RiskLevel, StoreResult,
};

/// Default store info endpoint; the snap name is appended.
pub const DEFAULT_INFO_URL: &str = "https://api.snapcraft.io/v2/snaps/info/";

/// Environment variable holding exported snapcraft login credentials.
pub const CREDENTIALS_ENV: &str = "SNAPCRAFT_STORE_CREDENTIALS";

/// Snap store configuration
#[derive(Debug, Clone)]
pub struct SnapStoreConfig {
    /// Snap whose channel map is managed
    pub snap_name: String,
    /// Info API base URL (snap name is appended)
    pub info_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Executable used to release revisions
    pub release_command: String,
}

impl SnapStoreConfig {
    pub fn new(snap_name: &str) -> Self {
        SnapStoreConfig {
            snap_name: snap_name.to_string(),
            info_url: DEFAULT_INFO_URL.to_string(),
            timeout_secs: 10,
            release_command: "snapcraft".to_string(),
        }
    }

    /// Override the info API base URL
    pub fn with_info_url(mut self, url: &str) -> Self {
        self.info_url = url.to_string();
        self
    }
}

/// Opaque store credentials handed to the release tool.
#[derive(Clone)]
pub struct StoreCredentials(String);

impl StoreCredentials {
    pub fn new(secret: impl Into<String>) -> StoreResult<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(StoreError::Credentials(format!("{CREDENTIALS_ENV} is blank")));
        }
        Ok(Self(secret))
    }

    /// Read credentials from the environment.
    ///
    /// Unset yields `Ok(None)`; set-but-blank is an error.
    pub fn from_env() -> StoreResult<Option<Self>> {
        match std::env::var(CREDENTIALS_ENV) {
            Ok(value) => Self::new(value).map(Some),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(StoreError::Credentials(format!(
                "{CREDENTIALS_ENV} is not valid unicode"
            ))),
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreCredentials(<redacted>)")
    }
}

/// Snap store client for channel map reads and releases
pub struct SnapStoreClient {
    config: SnapStoreConfig,
    credentials: Option<StoreCredentials>,
    http_client: reqwest::Client,
}

impl SnapStoreClient {
    /// Create a new client
    pub fn new(config: SnapStoreConfig, credentials: Option<StoreCredentials>) -> StoreResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("snap-promote/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(SnapStoreClient {
            config,
            credentials,
            http_client,
        })
    }

    /// Create a client for `snap_name` with credentials from the environment
    pub fn from_env(snap_name: &str) -> StoreResult<Self> {
        Self::new(SnapStoreConfig::new(snap_name), StoreCredentials::from_env()?)
    }

    fn info_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.info_url.trim_end_matches('/'),
            self.config.snap_name
        )
    }
}

#[async_trait]
impl ChannelStore for SnapStoreClient {
    fn snap_name(&self) -> &str {
        &self.config.snap_name
    }

    async fn list_published(&self, track_filter: Option<&str>) -> StoreResult<ChannelSnapshot> {
        let url = self.info_url();
        debug!(url = %url, "Fetching channel map");

        let response = self
            .http_client
            .get(&url)
            .header("Snap-Device-Series", "16")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let snapshot = parse_channel_map(&self.config.snap_name, &body, Utc::now())?;
        Ok(match track_filter {
            Some(track) => snapshot.for_track(track),
            None => snapshot,
        })
    }

    async fn release(&self, revision: Revision, channel: &Channel) -> StoreResult<()> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            StoreError::Credentials(format!("{CREDENTIALS_ENV} is not set"))
        })?;

        info!(revision = %revision, channel = %channel, "Releasing revision");

        // `snapcraft promote` asks for confirmation when leaving edge, so use
        // `release` with an explicit revision instead.
        let revision_arg = revision.to_string();
        let channel_arg = channel.to_string();
        let output = Command::new(&self.config.release_command)
            .args([
                "release",
                self.config.snap_name.as_str(),
                revision_arg.as_str(),
                channel_arg.as_str(),
            ])
            .env(CREDENTIALS_ENV, credentials.expose())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StoreError::Command(format!("{}: {e}", self.config.release_command)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(StoreError::ReleaseRejected {
                revision: revision.to_string(),
                channel: channel.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Info API payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(rename = "channel-map", default)]
    channel_map: Vec<ChannelMapEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelMapEntry {
    channel: ChannelInfo,
    revision: u64,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    architecture: String,
    risk: String,
    track: String,
    #[serde(rename = "released-at")]
    released_at: Option<String>,
}

/// Parse an info API response body into a snapshot.
pub fn parse_channel_map(
    snap_name: &str,
    body: &str,
    taken_at: DateTime<Utc>,
) -> StoreResult<ChannelSnapshot> {
    let info: InfoResponse = serde_json::from_str(body)?;

    let mut entries = Vec::with_capacity(info.channel_map.len());
    for item in info.channel_map {
        let risk: RiskLevel = item.channel.risk.parse()?;
        let published_at = match item.channel.released_at.as_deref() {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| StoreError::Decode(format!("released-at '{raw}': {e}")))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        entries.push(PublishedRevision {
            track: item.channel.track,
            architecture: item.channel.architecture,
            risk,
            revision: Revision(item.revision),
            version: item.version,
            published_at,
        });
    }

    Ok(ChannelSnapshot::new(snap_name, taken_at, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BODY: &str = r#"{
        "name": "k8s",
        "channel-map": [
            {
                "channel": {
                    "architecture": "amd64",
                    "name": "1.32/edge",
                    "released-at": "2000-01-01T00:00:00.000000+00:00",
                    "risk": "edge",
                    "track": "1.32"
                },
                "created-at": "2000-01-01T00:00:00.000000+00:00",
                "download": {},
                "revision": 2,
                "type": "app",
                "version": "v1.32.0"
            },
            {
                "channel": {
                    "architecture": "amd64",
                    "name": "1.32/stable",
                    "risk": "stable",
                    "track": "1.32"
                },
                "revision": 1,
                "version": "v1.32.0"
            }
        ]
    }"#;

    #[test]
    fn test_parse_channel_map() {
        let taken = Utc.with_ymd_and_hms(2000, 1, 3, 0, 0, 0).unwrap();
        let snapshot = parse_channel_map("k8s", BODY, taken).unwrap();

        assert_eq!(snapshot.snap_name, "k8s");
        assert_eq!(snapshot.entries().len(), 2);
        let edge = snapshot.at("1.32", "amd64", RiskLevel::Edge).unwrap();
        assert_eq!(edge.revision, Revision(2));
        assert_eq!(
            edge.published_at,
            Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
        );
        let stable = snapshot.at("1.32", "amd64", RiskLevel::Stable).unwrap();
        assert!(stable.published_at.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_risk() {
        let body = r#"{"channel-map": [{"channel": {"architecture": "amd64",
            "risk": "nightly", "track": "1.32"}, "revision": 3}]}"#;
        let err = parse_channel_map("k8s", body, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::UnknownRisk(ref r) if r == "nightly"));
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        let body = r#"{"channel-map": [{"channel": {"architecture": "amd64",
            "risk": "edge", "track": "1.32", "released-at": "yesterday"}, "revision": 3}]}"#;
        let err = parse_channel_map("k8s", body, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_channel_map("k8s", "<html>", Utc::now()).is_err());
    }

    #[test]
    fn test_blank_credentials_rejected() {
        assert!(StoreCredentials::new("   ").is_err());
        let creds = StoreCredentials::new("secret").unwrap();
        assert_eq!(format!("{creds:?}"), "StoreCredentials(<redacted>)");
    }

    #[tokio::test]
    async fn test_release_without_credentials_fails() {
        let client = SnapStoreClient::new(SnapStoreConfig::new("k8s"), None).unwrap();
        let err = client
            .release(Revision(1), &"1.32/beta".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Credentials(_)));
    }

    #[test]
    fn test_config_defaults_ignore_environment() {
        std::env::set_var("SNAP_PROMOTE_STORE_URL", "http://elsewhere.invalid/");
        let config = SnapStoreConfig::new("k8s");
        std::env::remove_var("SNAP_PROMOTE_STORE_URL");
        assert_eq!(config.info_url, DEFAULT_INFO_URL);
    }

    #[test]
    fn test_info_url_joins_snap_name() {
        let config = SnapStoreConfig::new("k8s").with_info_url("http://localhost:9000/info/");
        let client = SnapStoreClient::new(config, None).unwrap();
        assert_eq!(client.info_url(), "http://localhost:9000/info/k8s");
    }
}
