//! Promote Verify - upgrade-path verification for snap-promote
//!
//! Provides the verification side of a promotion run:
//! - Expands proposals into a matrix of (image, upgrade path) cells
//! - Runs cells on a bounded, fail-isolated worker pool
//! - Gates each proposal on its full matrix
//! - Chains propose, verify and promote into one cycle

pub mod checkout;
pub mod coordinator;
pub mod cycle;
mod error;
pub mod fakes;
pub mod gate;
pub mod matrix;
pub mod runner;

pub use checkout::{checkout_tests, CellWorkspace, CheckoutConfig, CheckoutTester, TestCheckout};
pub use coordinator::{CoordinatorConfig, VerificationCoordinator};
pub use cycle::{CycleEntry, CycleReport, PromotionCycle};
pub use error::{VerifyError, VerifyResult};
pub use gate::{VerificationGate, VerificationOutcome};
pub use matrix::{build_matrix, MatrixCell};
pub use runner::{CellResult, CommandOutput, CommandTester, TestCommand, UpgradeTester, DEFAULT_TEST_COMMAND};
