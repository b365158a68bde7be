//! Domain types shared across the promotion pipeline.

pub mod error;
pub mod proposal;

pub use error::{ConfigError, PromoteError, ProposalError, Result};
pub use proposal::{PromotionProposal, ProposalSet, UpgradePath};
