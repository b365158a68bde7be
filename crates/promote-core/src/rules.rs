//! Promotion rule engine.
//!
//! Walks a [`ChannelSnapshot`] slot by slot and decides, for every
//! (track, architecture, risk) entry, whether its revision may move one rung
//! up the ladder. The engine is pure: it reads the snapshot and the config and
//! returns an [`Evaluation`], nothing else.

use std::fmt;

use channel_store::{ChannelSnapshot, PublishedRevision, Revision, RiskLevel};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PromoteConfig;
use crate::obs;

/// Why a slot was eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    DwellElapsed,
    NewEdgePatch,
}

/// A revision cleared to move from `source_risk` to `destination_risk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligiblePromotion {
    pub track: String,
    pub architecture: String,
    pub revision: Revision,
    pub version: String,
    pub source_risk: RiskLevel,
    pub destination_risk: RiskLevel,
    /// Whole days spent at the source risk.
    pub dwell_days: i64,
    pub reason: EligibilityReason,
}

/// Why a slot produced no promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ExcludedTrack { pattern: String },
    ExcludedArchitecture,
    TerminalRisk,
    NoPublishTime,
    DwellNotElapsed { dwell_days: i64, required: u32 },
    AlreadyAtDestination,
    AwaitingStableBlessing,
    /// The same revision is promotable from a higher rung.
    DuplicateRevision,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExcludedTrack { pattern } => write!(f, "track excluded by '{pattern}'"),
            SkipReason::ExcludedArchitecture => f.write_str("architecture excluded"),
            SkipReason::TerminalRisk => f.write_str("stable is terminal"),
            SkipReason::NoPublishTime => f.write_str("no publication timestamp"),
            SkipReason::DwellNotElapsed {
                dwell_days,
                required,
            } => write!(f, "dwell {dwell_days}d < {required}d"),
            SkipReason::AlreadyAtDestination => f.write_str("revision already at destination"),
            SkipReason::AwaitingStableBlessing => {
                f.write_str("first stable release needs manual approval")
            }
            SkipReason::DuplicateRevision => f.write_str("revision promoted from a higher rung"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSlot {
    pub track: String,
    pub architecture: String,
    pub risk: RiskLevel,
    pub revision: Revision,
    pub reason: SkipReason,
}

/// Rule engine output for one snapshot.
///
/// `eligible` is ordered by (track, architecture, source risk).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub eligible: Vec<EligiblePromotion>,
    pub skipped: Vec<SkippedSlot>,
}

const SECONDS_PER_DAY: i64 = 86_400;

pub struct RuleEngine<'a> {
    config: &'a PromoteConfig,
}

impl<'a> RuleEngine<'a> {
    pub fn new(config: &'a PromoteConfig) -> Self {
        Self { config }
    }

    /// Evaluate every slot of `snapshot` as of `now`.
    pub fn evaluate(&self, snapshot: &ChannelSnapshot, now: DateTime<Utc>) -> Evaluation {
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for entry in snapshot.entries() {
            match self.check(snapshot, entry, now) {
                Ok(eligible) => candidates.push(eligible),
                Err(reason) => skipped.push(skip(entry, reason)),
            }
        }

        // At most one promotion per (track, arch, revision): keep the highest rung.
        let mut eligible: Vec<EligiblePromotion> = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            let superseded = candidates[i + 1..].iter().any(|later| {
                later.track == candidate.track
                    && later.architecture == candidate.architecture
                    && later.revision == candidate.revision
            });
            if superseded {
                skipped.push(SkippedSlot {
                    track: candidate.track.clone(),
                    architecture: candidate.architecture.clone(),
                    risk: candidate.source_risk,
                    revision: candidate.revision,
                    reason: SkipReason::DuplicateRevision,
                });
            } else {
                eligible.push(candidate.clone());
            }
        }

        for s in &skipped {
            obs::emit_rule_skipped(&s.track, &s.architecture, s.risk.as_str(), &s.reason);
        }
        for e in &eligible {
            obs::emit_rule_eligible(
                &e.track,
                &e.architecture,
                e.source_risk.as_str(),
                e.destination_risk.as_str(),
                &e.revision.to_string(),
            );
        }

        Evaluation { eligible, skipped }
    }

    fn check(
        &self,
        snapshot: &ChannelSnapshot,
        entry: &PublishedRevision,
        now: DateTime<Utc>,
    ) -> Result<EligiblePromotion, SkipReason> {
        let exclusions = &self.config.exclusions;
        if let Some(pattern) = exclusions.matching_pattern(&entry.track) {
            return Err(SkipReason::ExcludedTrack {
                pattern: pattern.as_str().to_string(),
            });
        }
        if exclusions.excludes_architecture(&entry.architecture) {
            return Err(SkipReason::ExcludedArchitecture);
        }

        let destination = entry.risk.next().ok_or(SkipReason::TerminalRisk)?;
        let at_destination = snapshot.at(&entry.track, &entry.architecture, destination);

        if at_destination.is_some_and(|d| d.revision == entry.revision) {
            return Err(SkipReason::AlreadyAtDestination);
        }
        if destination == RiskLevel::Stable
            && self.config.policy.require_stable_blessing
            && !track_has_stable(snapshot, &entry.track)
        {
            return Err(SkipReason::AwaitingStableBlessing);
        }

        let published_at = entry.published_at.ok_or(SkipReason::NoPublishTime)?;
        // Floor, so a timestamp in the future never counts as day zero.
        let dwell_days = (now - published_at).num_seconds().div_euclid(SECONDS_PER_DAY);

        let eligible = |reason| EligiblePromotion {
            track: entry.track.clone(),
            architecture: entry.architecture.clone(),
            revision: entry.revision,
            version: entry.version.clone(),
            source_risk: entry.risk,
            destination_risk: destination,
            dwell_days,
            reason,
        };

        if entry.risk == RiskLevel::Edge
            && self.config.policy.promote_new_edge_patches
            && at_destination.map_or(true, |beta| beta.version != entry.version)
        {
            return Ok(eligible(EligibilityReason::NewEdgePatch));
        }

        // Stable never reaches here, so a threshold always exists.
        let required = self
            .config
            .thresholds
            .days_for(entry.risk)
            .ok_or(SkipReason::TerminalRisk)?;
        if dwell_days < i64::from(required) {
            return Err(SkipReason::DwellNotElapsed {
                dwell_days,
                required,
            });
        }

        Ok(eligible(EligibilityReason::DwellElapsed))
    }
}

/// Whether any architecture of `track` already has a stable revision.
fn track_has_stable(snapshot: &ChannelSnapshot, track: &str) -> bool {
    snapshot
        .entries()
        .iter()
        .any(|e| e.track == track && e.risk == RiskLevel::Stable)
}

fn skip(entry: &PublishedRevision, reason: SkipReason) -> SkippedSlot {
    SkippedSlot {
        track: entry.track.clone(),
        architecture: entry.architecture.clone(),
        risk: entry.risk,
        revision: entry.revision,
        reason,
    }
}
