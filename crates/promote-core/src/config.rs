//! Run configuration.
//!
//! [`PromoteSettings`] is the loose, serde-friendly form assembled from a TOML
//! file and CLI flags. [`PromoteSettings::compile`] validates it into the
//! immutable [`PromoteConfig`] that every pipeline stage receives. Track
//! patterns are compiled exactly once, here.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use channel_store::RiskLevel;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Tracks never promoted automatically, whatever the schedule.
pub const ALWAYS_IGNORED_TRACKS: &[&str] = &["latest"];

/// Unsupported version lines and experimental flavor tracks, excluded from
/// scheduled runs only.
pub const LEGACY_TRACK_PATTERNS: &[&str] = &[r"1\.(2[0-9]|30|31)(-.+)?", r".+-(moonray|strict)"];

/// Default environment images for the upgrade matrix.
pub const DEFAULT_IMAGES: &[&str] = &["ubuntu:20.04", "ubuntu:22.04", "ubuntu:24.04"];

// ---------------------------------------------------------------------------
// Dwell thresholds
// ---------------------------------------------------------------------------

/// Minimum whole days a revision must sit at a risk level before promotion.
///
/// `stable` is terminal and has no threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwellThresholds {
    pub edge: u32,
    pub beta: u32,
    pub candidate: u32,
}

impl Default for DwellThresholds {
    fn default() -> Self {
        Self {
            edge: 1,
            beta: 3,
            candidate: 5,
        }
    }
}

impl DwellThresholds {
    pub fn days_for(&self, risk: RiskLevel) -> Option<u32> {
        match risk {
            RiskLevel::Edge => Some(self.edge),
            RiskLevel::Beta => Some(self.beta),
            RiskLevel::Candidate => Some(self.candidate),
            RiskLevel::Stable => None,
        }
    }

    pub fn with(mut self, risk: RiskLevel, days: u32) -> Result<Self, ConfigError> {
        match risk {
            RiskLevel::Edge => self.edge = days,
            RiskLevel::Beta => self.beta = days,
            RiskLevel::Candidate => self.candidate = days,
            RiskLevel::Stable => return Err(ConfigError::TerminalThreshold),
        }
        Ok(self)
    }
}

/// Parse a `RISK=DAYS` assignment as given on the command line.
pub fn parse_threshold(raw: &str) -> Result<(String, u32), ConfigError> {
    let (risk, days) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedThreshold(raw.to_string()))?;
    let days = days
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::MalformedThreshold(raw.to_string()))?;
    Ok((risk.trim().to_string(), days))
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

/// A compiled, anchored, case-sensitive track pattern.
#[derive(Debug, Clone)]
pub struct TrackPattern {
    source: String,
    regex: Regex,
}

impl TrackPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            ConfigError::InvalidTrackPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, track: &str) -> bool {
        self.regex.is_match(track)
    }
}

impl PartialEq for TrackPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Which built-in exclusion list applies to a run.
///
/// Scheduled runs carry the legacy-track exclusions implicitly; manual runs
/// only exclude what the caller passes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionPreset {
    #[default]
    Scheduled,
    Manual,
}

impl ExclusionPreset {
    /// Built-in track patterns for this preset.
    pub fn track_patterns(&self) -> Vec<&'static str> {
        match self {
            ExclusionPreset::Scheduled => ALWAYS_IGNORED_TRACKS
                .iter()
                .chain(LEGACY_TRACK_PATTERNS)
                .copied()
                .collect(),
            ExclusionPreset::Manual => ALWAYS_IGNORED_TRACKS.to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionPreset::Scheduled => "scheduled",
            ExclusionPreset::Manual => "manual",
        }
    }
}

impl FromStr for ExclusionPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ExclusionPreset::Scheduled),
            "manual" => Ok(ExclusionPreset::Manual),
            other => Err(ConfigError::UnknownSchedule(other.to_string())),
        }
    }
}

/// Tracks and architectures left out of automatic proposals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionSet {
    tracks: Vec<TrackPattern>,
    architectures: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new<'a>(
        track_patterns: impl IntoIterator<Item = &'a str>,
        architectures: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ConfigError> {
        let tracks = track_patterns
            .into_iter()
            .map(TrackPattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        let mut archs = BTreeSet::new();
        for arch in architectures {
            if arch.trim().is_empty() {
                return Err(ConfigError::EmptyArchitecture);
            }
            archs.insert(arch.to_string());
        }
        Ok(Self {
            tracks,
            architectures: archs,
        })
    }

    /// Preset patterns followed by caller-supplied ones.
    pub fn for_preset(
        preset: ExclusionPreset,
        extra_tracks: &[String],
        architectures: &[String],
    ) -> Result<Self, ConfigError> {
        let patterns = preset
            .track_patterns()
            .into_iter()
            .chain(extra_tracks.iter().map(String::as_str));
        Self::new(patterns, architectures.iter().map(String::as_str))
    }

    /// The first pattern excluding `track`, if any.
    pub fn matching_pattern(&self, track: &str) -> Option<&TrackPattern> {
        self.tracks.iter().find(|p| p.matches(track))
    }

    pub fn excludes_architecture(&self, architecture: &str) -> bool {
        self.architectures.contains(architecture)
    }

    pub fn track_patterns(&self) -> &[TrackPattern] {
        &self.tracks
    }
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// Split a version-line track (`1.32`, `1.32-classic`) into (major, minor, flavor).
pub fn version_line(track: &str) -> Option<(u32, u32, Option<&str>)> {
    let (line, flavor) = match track.split_once('-') {
        Some((line, flavor)) if !flavor.is_empty() => (line, Some(flavor)),
        Some(_) => return None,
        None => (track, None),
    };
    let (major, minor) = line.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?, flavor))
}

/// Maps a track to the source branch that carries its upgrade tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRule {
    pub prefix: String,
    pub default_branch: String,
}

impl Default for BranchRule {
    fn default() -> Self {
        Self {
            prefix: "release-".to_string(),
            default_branch: "main".to_string(),
        }
    }
}

impl BranchRule {
    pub fn branch_for(&self, track: &str) -> String {
        match version_line(track) {
            Some((major, minor, _)) => format!("{}{}.{}", self.prefix, major, minor),
            None => self.default_branch.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings -> config
// ---------------------------------------------------------------------------

/// Promotion policy switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionPolicy {
    /// Hold back the first stable release of a (track, arch) for manual approval.
    pub require_stable_blessing: bool,
    /// Promote an edge revision immediately when its version differs from beta.
    pub promote_new_edge_patches: bool,
}

/// Loose settings, as read from a TOML file and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromoteSettings {
    pub snap_name: String,
    /// Restrict the run to a single track.
    pub track_filter: Option<String>,
    pub schedule: ExclusionPreset,
    /// Per-risk dwell overrides keyed by risk name.
    pub thresholds: BTreeMap<String, u32>,
    pub ignore_tracks: Vec<String>,
    pub ignore_architectures: Vec<String>,
    pub images: Vec<String>,
    pub require_stable_blessing: bool,
    pub promote_new_edge_patches: bool,
    pub upgrade_from_previous_track: bool,
    pub branch_prefix: String,
    pub default_branch: String,
    pub self_hosted_runners: bool,
    pub dry_run: bool,
}

impl Default for PromoteSettings {
    fn default() -> Self {
        let branches = BranchRule::default();
        Self {
            snap_name: "k8s".to_string(),
            track_filter: None,
            schedule: ExclusionPreset::Scheduled,
            thresholds: BTreeMap::new(),
            ignore_tracks: Vec::new(),
            ignore_architectures: Vec::new(),
            images: DEFAULT_IMAGES.iter().map(|s| s.to_string()).collect(),
            require_stable_blessing: true,
            promote_new_edge_patches: false,
            upgrade_from_previous_track: false,
            branch_prefix: branches.prefix,
            default_branch: branches.default_branch,
            self_hosted_runners: true,
            dry_run: false,
        }
    }
}

impl PromoteSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Validate and freeze into a [`PromoteConfig`].
    pub fn compile(&self) -> Result<PromoteConfig, ConfigError> {
        let snap_name = self.snap_name.trim();
        if snap_name.is_empty() {
            return Err(ConfigError::EmptySnapName);
        }

        let mut thresholds = DwellThresholds::default();
        for (risk, days) in &self.thresholds {
            let risk = risk
                .parse::<RiskLevel>()
                .map_err(|_| ConfigError::UnknownRiskLevel(risk.clone()))?;
            thresholds = thresholds.with(risk, *days)?;
        }

        let exclusions =
            ExclusionSet::for_preset(self.schedule, &self.ignore_tracks, &self.ignore_architectures)?;

        Ok(PromoteConfig {
            snap_name: snap_name.to_string(),
            track_filter: self.track_filter.clone().filter(|t| !t.trim().is_empty()),
            schedule: self.schedule,
            thresholds,
            exclusions,
            images: self.images.clone(),
            policy: PromotionPolicy {
                require_stable_blessing: self.require_stable_blessing,
                promote_new_edge_patches: self.promote_new_edge_patches,
            },
            upgrade_from_previous_track: self.upgrade_from_previous_track,
            branches: BranchRule {
                prefix: self.branch_prefix.clone(),
                default_branch: self.default_branch.clone(),
            },
            self_hosted_runners: self.self_hosted_runners,
            dry_run: self.dry_run,
        })
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PromoteConfig {
    pub snap_name: String,
    pub track_filter: Option<String>,
    pub schedule: ExclusionPreset,
    pub thresholds: DwellThresholds,
    pub exclusions: ExclusionSet,
    pub images: Vec<String>,
    pub policy: PromotionPolicy,
    pub upgrade_from_previous_track: bool,
    pub branches: BranchRule,
    pub self_hosted_runners: bool,
    pub dry_run: bool,
}

impl Default for PromoteConfig {
    fn default() -> Self {
        // The default settings only contain constant, valid patterns.
        PromoteSettings::default()
            .compile()
            .unwrap_or_else(|e| panic!("default settings must compile: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = DwellThresholds::default();
        assert_eq!(t.days_for(RiskLevel::Edge), Some(1));
        assert_eq!(t.days_for(RiskLevel::Beta), Some(3));
        assert_eq!(t.days_for(RiskLevel::Candidate), Some(5));
        assert_eq!(t.days_for(RiskLevel::Stable), None);
    }

    #[test]
    fn test_stable_threshold_rejected() {
        let err = DwellThresholds::default()
            .with(RiskLevel::Stable, 2)
            .unwrap_err();
        assert!(matches!(err, ConfigError::TerminalThreshold));
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold("beta=7").unwrap(), ("beta".to_string(), 7));
        assert!(parse_threshold("beta").is_err());
        assert!(parse_threshold("beta=-1").is_err());
    }

    #[test]
    fn test_track_pattern_is_anchored() {
        let pattern = TrackPattern::new(r"1\.30").unwrap();
        assert!(pattern.matches("1.30"));
        assert!(!pattern.matches("1.300"));
        assert!(!pattern.matches("21.30"));
    }

    #[test]
    fn test_track_pattern_is_case_sensitive() {
        let pattern = TrackPattern::new("latest").unwrap();
        assert!(!pattern.matches("Latest"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = TrackPattern::new("1.(").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTrackPattern { .. }));
    }

    #[test]
    fn test_scheduled_preset_excludes_legacy_tracks() {
        let set = ExclusionSet::for_preset(ExclusionPreset::Scheduled, &[], &[]).unwrap();
        assert!(set.matching_pattern("latest").is_some());
        assert!(set.matching_pattern("1.30").is_some());
        assert!(set.matching_pattern("1.31-classic").is_some());
        assert!(set.matching_pattern("1.32-moonray").is_some());
        assert!(set.matching_pattern("1.32").is_none());
        assert!(set.matching_pattern("1.33-classic").is_none());
    }

    #[test]
    fn test_manual_preset_only_excludes_latest() {
        let set = ExclusionSet::for_preset(
            ExclusionPreset::Manual,
            &[r"1\.31".to_string()],
            &["s390x".to_string()],
        )
        .unwrap();
        assert!(set.matching_pattern("latest").is_some());
        assert!(set.matching_pattern("1.30").is_none());
        assert!(set.matching_pattern("1.31").is_some());
        assert!(set.excludes_architecture("s390x"));
        assert!(!set.excludes_architecture("amd64"));
    }

    #[test]
    fn test_blank_architecture_rejected() {
        let err = ExclusionSet::new(Vec::<&str>::new(), vec![" "]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyArchitecture));
    }

    #[test]
    fn test_version_line() {
        assert_eq!(version_line("1.32"), Some((1, 32, None)));
        assert_eq!(version_line("1.32-classic"), Some((1, 32, Some("classic"))));
        assert_eq!(version_line("latest"), None);
        assert_eq!(version_line("1.32-"), None);
    }

    #[test]
    fn test_branch_rule() {
        let rule = BranchRule::default();
        assert_eq!(rule.branch_for("1.32"), "release-1.32");
        assert_eq!(rule.branch_for("1.32-strict"), "release-1.32");
        assert_eq!(rule.branch_for("latest"), "main");
    }

    #[test]
    fn test_settings_from_toml() {
        let settings = PromoteSettings::from_toml_str(
            r#"
            snap_name = "k8s"
            schedule = "manual"
            ignore_tracks = ["1\\.29"]
            images = ["ubuntu:24.04"]

            [thresholds]
            beta = 4
            "#,
        )
        .unwrap();
        let config = settings.compile().unwrap();
        assert_eq!(config.schedule, ExclusionPreset::Manual);
        assert_eq!(config.thresholds.beta, 4);
        assert_eq!(config.thresholds.edge, 1);
        assert_eq!(config.images, vec!["ubuntu:24.04".to_string()]);
        assert!(config.exclusions.matching_pattern("1.29").is_some());
    }

    #[test]
    fn test_settings_unknown_field_rejected() {
        assert!(PromoteSettings::from_toml_str("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_compile_rejects_unknown_risk() {
        let mut settings = PromoteSettings::default();
        settings.thresholds.insert("nightly".to_string(), 1);
        assert!(matches!(
            settings.compile().unwrap_err(),
            ConfigError::UnknownRiskLevel(ref r) if r == "nightly"
        ));
    }

    #[test]
    fn test_compile_rejects_empty_snap() {
        let settings = PromoteSettings {
            snap_name: "  ".to_string(),
            ..PromoteSettings::default()
        };
        assert!(matches!(settings.compile().unwrap_err(), ConfigError::EmptySnapName));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PromoteSettings::load(Path::new("/nonexistent/promote.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Settings { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promote.toml");
        std::fs::write(&path, "dry_run = true\n").unwrap();
        let settings = PromoteSettings::load(&path).unwrap();
        assert!(settings.dry_run);
        assert_eq!(settings.snap_name, "k8s");
    }
}
