//! Turns eligible promotions into self-contained proposals.

use channel_store::{Channel, ChannelSnapshot};

use crate::config::{version_line, PromoteConfig};
use crate::domain::{PromotionProposal, ProposalError, ProposalSet, UpgradePath};
use crate::obs;
use crate::rules::EligiblePromotion;
use crate::METRICS;

/// An eligible pair whose proposal could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedProposal {
    pub promotion: EligiblePromotion,
    pub error: ProposalError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub proposals: ProposalSet,
    pub rejected: Vec<RejectedProposal>,
}

/// CI runner labels for an architecture.
pub fn runner_labels(architecture: &str, self_hosted: bool) -> Vec<String> {
    let arch_label = match architecture {
        "amd64" => "X64".to_string(),
        "arm64" => "ARM64".to_string(),
        other => other.to_uppercase(),
    };
    let mut labels = vec![arch_label];
    if self_hosted {
        labels.push("self-hosted".to_string());
    }
    labels
}

/// The version line before `track`, keeping its flavor (`1.32-classic` -> `1.31-classic`).
pub fn previous_track(track: &str) -> Option<String> {
    let (major, minor, flavor) = version_line(track)?;
    let minor = minor.checked_sub(1)?;
    Some(match flavor {
        Some(flavor) => format!("{major}.{minor}-{flavor}"),
        None => format!("{major}.{minor}"),
    })
}

pub struct ProposalBuilder<'a> {
    config: &'a PromoteConfig,
}

impl<'a> ProposalBuilder<'a> {
    pub fn new(config: &'a PromoteConfig) -> Self {
        Self { config }
    }

    /// Build one proposal per eligible pair, in input order.
    ///
    /// A pair that fails validation is reported in `rejected` and does not
    /// affect the others.
    pub fn build(&self, eligible: &[EligiblePromotion], snapshot: &ChannelSnapshot) -> BuildReport {
        let mut proposals = Vec::with_capacity(eligible.len());
        let mut rejected = Vec::new();

        for promotion in eligible {
            match self.build_one(promotion, snapshot) {
                Ok(proposal) => {
                    obs::emit_proposal_built(&proposal.display_name, proposal.matrix_size());
                    proposals.push(proposal);
                }
                Err(error) => {
                    obs::emit_proposal_rejected(&promotion.track, &promotion.architecture, &error);
                    METRICS.inc_proposals_rejected();
                    rejected.push(RejectedProposal {
                        promotion: promotion.clone(),
                        error,
                    });
                }
            }
        }

        METRICS.add_proposals_emitted(proposals.len() as u64);
        BuildReport {
            proposals: ProposalSet::new(proposals),
            rejected,
        }
    }

    pub fn build_one(
        &self,
        promotion: &EligiblePromotion,
        snapshot: &ChannelSnapshot,
    ) -> Result<PromotionProposal, ProposalError> {
        let images = self.images()?;

        let source = Channel::new(promotion.track.clone(), promotion.source_risk);
        let destination = Channel::new(promotion.track.clone(), promotion.destination_risk);

        let mut upgrade_paths = vec![UpgradePath::new(destination.to_string(), source.to_string())];
        if self.config.upgrade_from_previous_track {
            if let Some(previous) = previous_track(&promotion.track).filter(|prev| {
                snapshot
                    .at(prev, &promotion.architecture, promotion.destination_risk)
                    .is_some()
            }) {
                let from = Channel::new(previous, promotion.destination_risk);
                upgrade_paths.push(UpgradePath::new(from.to_string(), source.to_string()));
            }
        }
        validate_paths(&upgrade_paths)?;

        Ok(PromotionProposal {
            display_name: format!(
                "{}-{}-{}-{}",
                self.config.snap_name,
                promotion.track,
                promotion.destination_risk,
                promotion.architecture
            ),
            snap_name: self.config.snap_name.clone(),
            track: promotion.track.clone(),
            architecture: promotion.architecture.clone(),
            revision: promotion.revision,
            version: promotion.version.clone(),
            source_risk: promotion.source_risk,
            destination_risk: promotion.destination_risk,
            source_channel: source.to_string(),
            destination_channel: destination.to_string(),
            branch: self.config.branches.branch_for(&promotion.track),
            environment_images: images,
            upgrade_paths,
            runner_labels: runner_labels(&promotion.architecture, self.config.self_hosted_runners),
        })
    }

    fn images(&self) -> Result<Vec<String>, ProposalError> {
        if self.config.images.is_empty() {
            return Err(ProposalError::NoImages);
        }
        if let Some(index) = self.config.images.iter().position(|i| i.trim().is_empty()) {
            return Err(ProposalError::EmptyImage { index });
        }
        Ok(self.config.images.clone())
    }
}

fn validate_paths(paths: &[UpgradePath]) -> Result<(), ProposalError> {
    for (index, path) in paths.iter().enumerate() {
        for endpoint in [&path.from, &path.to] {
            if endpoint.parse::<Channel>().is_err() {
                return Err(ProposalError::InvalidUpgradePath {
                    index,
                    endpoint: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromoteSettings;
    use crate::rules::EligibilityReason;
    use channel_store::{PublishedRevision, Revision, RiskLevel};
    use chrono::Utc;

    fn eligible(track: &str, arch: &str) -> EligiblePromotion {
        EligiblePromotion {
            track: track.to_string(),
            architecture: arch.to_string(),
            revision: Revision(12),
            version: "v1.32.3".to_string(),
            source_risk: RiskLevel::Edge,
            destination_risk: RiskLevel::Beta,
            dwell_days: 2,
            reason: EligibilityReason::DwellElapsed,
        }
    }

    fn empty_snapshot() -> ChannelSnapshot {
        ChannelSnapshot::new("k8s", Utc::now(), Vec::new())
    }

    #[test]
    fn test_builds_full_proposal() {
        let config = PromoteConfig::default();
        let proposal = ProposalBuilder::new(&config)
            .build_one(&eligible("1.32", "arm64"), &empty_snapshot())
            .unwrap();

        assert_eq!(proposal.display_name, "k8s-1.32-beta-arm64");
        assert_eq!(proposal.destination_channel, "1.32/beta");
        assert_eq!(proposal.source_channel, "1.32/edge");
        assert_eq!(proposal.branch, "release-1.32");
        assert_eq!(
            proposal.upgrade_paths,
            vec![UpgradePath::new("1.32/beta", "1.32/edge")]
        );
        assert_eq!(proposal.environment_images.len(), 3);
        assert_eq!(proposal.runner_labels, vec!["ARM64", "self-hosted"]);
        assert_eq!(proposal.matrix_size(), 3);
    }

    #[test]
    fn test_previous_track_path() {
        let mut settings = PromoteSettings::default();
        settings.upgrade_from_previous_track = true;
        let config = settings.compile().unwrap();

        let snapshot = ChannelSnapshot::new(
            "k8s",
            Utc::now(),
            vec![PublishedRevision {
                track: "1.31".to_string(),
                architecture: "amd64".to_string(),
                risk: RiskLevel::Beta,
                revision: Revision(8),
                version: "v1.31.9".to_string(),
                published_at: None,
            }],
        );
        let proposal = ProposalBuilder::new(&config)
            .build_one(&eligible("1.32", "amd64"), &snapshot)
            .unwrap();
        assert_eq!(
            proposal.upgrade_paths,
            vec![
                UpgradePath::new("1.32/beta", "1.32/edge"),
                UpgradePath::new("1.31/beta", "1.32/edge"),
            ]
        );

        // Not published for this architecture: only the primary path.
        let proposal = ProposalBuilder::new(&config)
            .build_one(&eligible("1.32", "arm64"), &snapshot)
            .unwrap();
        assert_eq!(proposal.upgrade_paths.len(), 1);
    }

    #[test]
    fn test_no_images_rejects_every_pair() {
        let settings = PromoteSettings {
            images: Vec::new(),
            ..PromoteSettings::default()
        };
        let config = settings.compile().unwrap();
        let report = ProposalBuilder::new(&config).build(
            &[eligible("1.32", "amd64"), eligible("1.33", "amd64")],
            &empty_snapshot(),
        );
        assert!(report.proposals.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].error, ProposalError::NoImages);
    }

    #[test]
    fn test_blank_image_rejected() {
        let settings = PromoteSettings {
            images: vec!["ubuntu:24.04".to_string(), " ".to_string()],
            ..PromoteSettings::default()
        };
        let config = settings.compile().unwrap();
        let err = ProposalBuilder::new(&config)
            .build_one(&eligible("1.32", "amd64"), &empty_snapshot())
            .unwrap_err();
        assert_eq!(err, ProposalError::EmptyImage { index: 1 });
    }

    #[test]
    fn test_invalid_pair_does_not_abort_siblings() {
        let config = PromoteConfig::default();
        let report = ProposalBuilder::new(&config).build(
            &[eligible("", "amd64"), eligible("1.32", "amd64")],
            &empty_snapshot(),
        );
        assert_eq!(report.proposals.len(), 1);
        assert_eq!(report.proposals.proposals()[0].track, "1.32");
        assert_eq!(report.rejected.len(), 1);
        assert!(matches!(
            report.rejected[0].error,
            ProposalError::InvalidUpgradePath { index: 0, .. }
        ));
    }

    #[test]
    fn test_runner_labels() {
        assert_eq!(runner_labels("amd64", true), vec!["X64", "self-hosted"]);
        assert_eq!(runner_labels("s390x", false), vec!["S390X"]);
    }

    #[test]
    fn test_previous_track() {
        assert_eq!(previous_track("1.32").as_deref(), Some("1.31"));
        assert_eq!(previous_track("1.32-classic").as_deref(), Some("1.31-classic"));
        assert_eq!(previous_track("2.0"), None);
        assert_eq!(previous_track("latest"), None);
    }
}
