//! Promote Core Library
//!
//! Decision engine for snap-promote: configuration, the promotion rule
//! engine, proposal building and the promoter.

pub mod builder;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod promoter;
pub mod rules;
pub mod telemetry;

pub use builder::{previous_track, runner_labels, BuildReport, ProposalBuilder, RejectedProposal};
pub use config::{
    parse_threshold, version_line, BranchRule, DwellThresholds, ExclusionPreset, ExclusionSet,
    PromoteConfig, PromoteSettings, PromotionPolicy, TrackPattern, ALWAYS_IGNORED_TRACKS,
    DEFAULT_IMAGES, LEGACY_TRACK_PATTERNS,
};
pub use domain::{
    ConfigError, PromoteError, PromotionProposal, ProposalError, ProposalSet, Result, UpgradePath,
};
pub use metrics::METRICS;
pub use pipeline::{propose, ProposalRun};
pub use promoter::{
    PromotionOutcome, PromotionReport, PromotionRequest, PromotionStatus, Promoter,
};
pub use rules::{EligibilityReason, EligiblePromotion, Evaluation, RuleEngine, SkipReason, SkippedSlot};
pub use telemetry::init_tracing;
