//! Channel map model and the store trait.
//!
//! - `RiskLevel` / `Channel`: the fixed edge < beta < candidate < stable ladder
//!   and the `track/risk` publish address.
//! - `ChannelSnapshot`: one consistent read of every published revision.
//! - `ChannelStore`: backend-agnostic read/mutate interface. In-memory fakes
//!   live in the `fakes` module.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Risk ladder
// ---------------------------------------------------------------------------

/// One rung of a track's stability ladder.
///
/// Variant order is the ladder order, so the derived `Ord` is total and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Edge,
    Beta,
    Candidate,
    Stable,
}

impl RiskLevel {
    /// Every rung, lowest first.
    pub const LADDER: [RiskLevel; 4] = [
        RiskLevel::Edge,
        RiskLevel::Beta,
        RiskLevel::Candidate,
        RiskLevel::Stable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Edge => "edge",
            RiskLevel::Beta => "beta",
            RiskLevel::Candidate => "candidate",
            RiskLevel::Stable => "stable",
        }
    }

    /// The next rung up, or `None` for `stable`.
    pub fn next(&self) -> Option<RiskLevel> {
        match self {
            RiskLevel::Edge => Some(RiskLevel::Beta),
            RiskLevel::Beta => Some(RiskLevel::Candidate),
            RiskLevel::Candidate => Some(RiskLevel::Stable),
            RiskLevel::Stable => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edge" => Ok(RiskLevel::Edge),
            "beta" => Ok(RiskLevel::Beta),
            "candidate" => Ok(RiskLevel::Candidate),
            "stable" => Ok(RiskLevel::Stable),
            other => Err(StoreError::UnknownRisk(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Publish address: `track/risk`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel {
    pub track: String,
    pub risk: RiskLevel,
}

impl Channel {
    pub fn new(track: impl Into<String>, risk: RiskLevel) -> Self {
        Self {
            track: track.into(),
            risk,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.track, self.risk)
    }
}

impl FromStr for Channel {
    type Err = StoreError;

    /// Parses `track/risk`. A bare risk addresses the `latest` track, as the
    /// store does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| StoreError::InvalidChannel {
            channel: s.to_string(),
            reason: reason.to_string(),
        };

        let (track, risk) = match s.split_once('/') {
            Some((track, risk)) => (track, risk),
            None => ("latest", s),
        };
        if track.is_empty() {
            return Err(invalid("empty track"));
        }
        if risk.contains('/') {
            return Err(invalid("branch channels are not promotable"));
        }
        let risk = risk
            .parse::<RiskLevel>()
            .map_err(|_| invalid("unknown risk level"))?;
        Ok(Channel::new(track, risk))
    }
}

impl Serialize for Channel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Revision
// ---------------------------------------------------------------------------

/// Opaque store revision number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Revision {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('r').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Revision)
            .map_err(|_| StoreError::RevisionNotFound {
                revision: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A revision published at one (track, architecture, risk) slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRevision {
    pub track: String,
    pub architecture: String,
    pub risk: RiskLevel,
    pub revision: Revision,
    /// Upstream version string carried by the revision.
    pub version: String,
    /// When the revision was released into this slot; `None` if the store
    /// did not report it.
    pub published_at: Option<DateTime<Utc>>,
}

impl PublishedRevision {
    pub fn channel(&self) -> Channel {
        Channel::new(self.track.clone(), self.risk)
    }
}

/// A complete, ordered read of the channel map.
///
/// Entries are sorted by (track, architecture, risk) and each slot appears
/// at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub snap_name: String,
    pub taken_at: DateTime<Utc>,
    entries: Vec<PublishedRevision>,
}

impl ChannelSnapshot {
    /// Build a snapshot, ordering entries and keeping the last entry for any
    /// duplicated slot.
    pub fn new(
        snap_name: impl Into<String>,
        taken_at: DateTime<Utc>,
        entries: Vec<PublishedRevision>,
    ) -> Self {
        let mut entries = entries;
        // Stable sort keeps input order among duplicates; dedup keeps the first
        // of a run, so reverse first to keep the last one reported.
        entries.reverse();
        entries.sort_by(|a, b| {
            (&a.track, &a.architecture, a.risk).cmp(&(&b.track, &b.architecture, b.risk))
        });
        entries.dedup_by(|a, b| {
            a.track == b.track && a.architecture == b.architecture && a.risk == b.risk
        });
        Self {
            snap_name: snap_name.into(),
            taken_at,
            entries,
        }
    }

    pub fn entries(&self) -> &[PublishedRevision] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The revision published at `track/risk` for `architecture`.
    pub fn at(&self, track: &str, architecture: &str, risk: RiskLevel) -> Option<&PublishedRevision> {
        self.entries
            .iter()
            .find(|e| e.track == track && e.architecture == architecture && e.risk == risk)
    }

    /// Distinct track names, sorted.
    pub fn tracks(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.track.as_str()).collect()
    }

    pub fn has_track(&self, track: &str) -> bool {
        self.entries.iter().any(|e| e.track == track)
    }

    /// Whether `revision` is currently published at `channel` on any architecture.
    pub fn is_published_at(&self, revision: Revision, channel: &Channel) -> bool {
        self.entries
            .iter()
            .any(|e| e.revision == revision && e.track == channel.track && e.risk == channel.risk)
    }

    /// A copy restricted to one track.
    pub fn for_track(&self, track: &str) -> ChannelSnapshot {
        Self {
            snap_name: self.snap_name.clone(),
            taken_at: self.taken_at,
            entries: self
                .entries
                .iter()
                .filter(|e| e.track == track)
                .cloned()
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelStore
// ---------------------------------------------------------------------------

/// Read/mutate access to a snap's channel map.
///
/// Guarantees:
/// - `list_published` returns every slot of the requested tracks from a single
///   read, or an error; never a partial map.
/// - `release` atomically (re)assigns one revision to one channel.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Name of the snap this store is bound to.
    fn snap_name(&self) -> &str;

    /// Read all published revisions, optionally for a single track.
    async fn list_published(&self, track_filter: Option<&str>) -> StoreResult<ChannelSnapshot>;

    /// Publish `revision` at `channel`.
    async fn release(&self, revision: Revision, channel: &Channel) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(track: &str, arch: &str, risk: RiskLevel, rev: u64) -> PublishedRevision {
        PublishedRevision {
            track: track.to_string(),
            architecture: arch.to_string(),
            risk,
            revision: Revision(rev),
            version: "v1.32.0".to_string(),
            published_at: None,
        }
    }

    #[test]
    fn test_risk_ladder_is_ordered() {
        assert!(RiskLevel::Edge < RiskLevel::Beta);
        assert!(RiskLevel::Beta < RiskLevel::Candidate);
        assert!(RiskLevel::Candidate < RiskLevel::Stable);
        assert_eq!(RiskLevel::Candidate.next(), Some(RiskLevel::Stable));
        assert!(RiskLevel::Stable.is_terminal());
    }

    #[test]
    fn test_channel_parse_and_display() {
        let channel: Channel = "1.32/beta".parse().unwrap();
        assert_eq!(channel.track, "1.32");
        assert_eq!(channel.risk, RiskLevel::Beta);
        assert_eq!(channel.to_string(), "1.32/beta");

        let bare: Channel = "edge".parse().unwrap();
        assert_eq!(bare.to_string(), "latest/edge");
    }

    #[test]
    fn test_channel_parse_rejects_garbage() {
        assert!("1.32/nightly".parse::<Channel>().is_err());
        assert!("/beta".parse::<Channel>().is_err());
        assert!("1.32/edge/hotfix".parse::<Channel>().is_err());
    }

    #[test]
    fn test_revision_parse_accepts_r_prefix() {
        assert_eq!("r42".parse::<Revision>().unwrap(), Revision(42));
        assert_eq!("42".parse::<Revision>().unwrap(), Revision(42));
        assert!("abc".parse::<Revision>().is_err());
    }

    #[test]
    fn test_snapshot_orders_entries() {
        let taken = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snap = ChannelSnapshot::new(
            "k8s",
            taken,
            vec![
                entry("1.32", "arm64", RiskLevel::Beta, 3),
                entry("1.31", "amd64", RiskLevel::Edge, 2),
                entry("1.32", "amd64", RiskLevel::Stable, 1),
                entry("1.32", "amd64", RiskLevel::Edge, 4),
            ],
        );
        let order: Vec<(String, String, RiskLevel)> = snap
            .entries()
            .iter()
            .map(|e| (e.track.clone(), e.architecture.clone(), e.risk))
            .collect();
        assert_eq!(
            order,
            vec![
                ("1.31".to_string(), "amd64".to_string(), RiskLevel::Edge),
                ("1.32".to_string(), "amd64".to_string(), RiskLevel::Edge),
                ("1.32".to_string(), "amd64".to_string(), RiskLevel::Stable),
                ("1.32".to_string(), "arm64".to_string(), RiskLevel::Beta),
            ]
        );
    }

    #[test]
    fn test_snapshot_keeps_last_duplicate_slot() {
        let snap = ChannelSnapshot::new(
            "k8s",
            Utc::now(),
            vec![
                entry("1.32", "amd64", RiskLevel::Edge, 1),
                entry("1.32", "amd64", RiskLevel::Edge, 2),
            ],
        );
        assert_eq!(snap.entries().len(), 1);
        assert_eq!(snap.entries()[0].revision, Revision(2));
    }

    #[test]
    fn test_snapshot_lookups() {
        let snap = ChannelSnapshot::new(
            "k8s",
            Utc::now(),
            vec![
                entry("1.32", "amd64", RiskLevel::Edge, 7),
                entry("1.31", "amd64", RiskLevel::Stable, 5),
            ],
        );
        assert!(snap.has_track("1.31"));
        assert!(!snap.has_track("1.30"));
        assert_eq!(snap.tracks().into_iter().collect::<Vec<_>>(), vec!["1.31", "1.32"]);
        assert_eq!(
            snap.at("1.32", "amd64", RiskLevel::Edge).map(|e| e.revision),
            Some(Revision(7))
        );
        assert!(snap.is_published_at(Revision(5), &"1.31/stable".parse().unwrap()));
        assert_eq!(snap.for_track("1.32").entries().len(), 1);
    }
}
