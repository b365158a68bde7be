//! Test source checkout.
//!
//! Upgrade tests live in the snap's source repository. A track's tests are
//! taken from its release branch when that branch carries them, otherwise
//! from the default branch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::error::{VerifyError, VerifyResult};
use crate::matrix::MatrixCell;
use crate::runner::{CellResult, CommandTester, TestCommand, UpgradeTester};

pub const DEFAULT_REPOSITORY: &str = "https://github.com/canonical/k8s-snap.git";
pub const DEFAULT_TEST_FILE: &str = "tests/integration/tests/test_version_upgrades.py";
pub const FALLBACK_BRANCH: &str = "main";

/// Where to fetch tests from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub repository: String,
    /// Path, relative to the checkout root, that must exist for a branch to be used.
    pub test_file: PathBuf,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            test_file: PathBuf::from(DEFAULT_TEST_FILE),
        }
    }
}

/// A shallow clone in a temporary directory, removed on drop.
#[derive(Debug)]
pub struct TestCheckout {
    _dir: TempDir,
    root: PathBuf,
    branch: String,
}

impl TestCheckout {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Branch the checkout was taken from.
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

/// Branches to try, in order: `branch`, then the fallback.
pub fn candidate_branches(branch: &str) -> Vec<String> {
    let mut branches = vec![branch.to_string()];
    if branch != FALLBACK_BRANCH {
        branches.push(FALLBACK_BRANCH.to_string());
    }
    branches
}

/// Clone the first candidate branch that contains the upgrade test.
pub async fn checkout_tests(config: &CheckoutConfig, branch: &str) -> VerifyResult<TestCheckout> {
    let dir = tempfile::Builder::new()
        .prefix("snap-promote-tests-")
        .tempdir()
        .map_err(VerifyError::Workspace)?;

    let branches = candidate_branches(branch);
    for candidate in &branches {
        let root = dir.path().join(candidate.replace('/', "_"));
        if !clone_branch(&config.repository, candidate, &root).await? {
            debug!(branch = %candidate, "Branch not cloneable, trying next");
            continue;
        }
        if root.join(&config.test_file).is_file() {
            info!(branch = %candidate, root = %root.display(), "Using upgrade tests");
            return Ok(TestCheckout {
                _dir: dir,
                root,
                branch: candidate.clone(),
            });
        }
        debug!(branch = %candidate, "Branch has no upgrade test");
    }

    Err(VerifyError::NoUpgradeTest {
        repository: config.repository.clone(),
        branches,
        test_file: config.test_file.clone(),
    })
}

/// `Ok(false)` when git ran but the clone failed (usually a missing branch).
async fn clone_branch(repository: &str, branch: &str, dest: &Path) -> VerifyResult<bool> {
    let output = git_clone(&["--depth", "1", "--branch", branch, repository], dest).await?;
    if !output.status.success() {
        debug!(
            branch = %branch,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git clone failed"
        );
    }
    Ok(output.status.success())
}

async fn git_clone(args: &[&str], dest: &Path) -> VerifyResult<std::process::Output> {
    Command::new("git")
        .args(["clone", "--quiet"])
        .args(args)
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| VerifyError::Spawn {
            program: "git".to_string(),
            source,
        })
}

/// A private copy of a [`TestCheckout`] for one matrix cell, removed on drop.
#[derive(Debug)]
pub struct CellWorkspace {
    _dir: TempDir,
    root: PathBuf,
}

impl CellWorkspace {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TestCheckout {
    /// Clone this checkout into a fresh directory so a test run cannot see
    /// or disturb files written by another run.
    pub async fn workspace(&self) -> VerifyResult<CellWorkspace> {
        let dir = tempfile::Builder::new()
            .prefix("snap-promote-cell-")
            .tempdir()
            .map_err(VerifyError::Workspace)?;
        let root = dir.path().join("src");

        let source = self.root.to_string_lossy();
        let output = git_clone(&[source.as_ref()], &root).await?;
        if !output.status.success() {
            return Err(VerifyError::CheckoutUnavailable {
                branch: self.branch.clone(),
                reason: format!(
                    "could not copy checkout: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(CellWorkspace { _dir: dir, root })
    }
}

type CachedCheckout = Result<Arc<TestCheckout>, String>;

/// Runs each cell in its own copy of its proposal's branch.
///
/// The branch is cloned from the remote once and shared as a read-only
/// source; every cell then runs in a local clone of it. A failed checkout is
/// remembered and fails the remaining cells of that branch.
pub struct CheckoutTester {
    config: CheckoutConfig,
    command: TestCommand,
    dry_run: bool,
    branch_override: Option<String>,
    checkouts: Mutex<HashMap<String, Arc<OnceCell<CachedCheckout>>>>,
}

impl CheckoutTester {
    pub fn new(config: CheckoutConfig, command: TestCommand, dry_run: bool) -> Self {
        Self {
            config,
            command,
            dry_run,
            branch_override: None,
            checkouts: Mutex::new(HashMap::new()),
        }
    }

    /// Use `branch` for every cell instead of the proposal's own branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_override = Some(branch.into());
        self
    }

    async fn checkout_for(&self, branch: &str) -> VerifyResult<Arc<TestCheckout>> {
        // The map lock only guards the lookup; the clone runs under the
        // branch's own cell.
        let slot = {
            let mut checkouts = self.checkouts.lock().await;
            Arc::clone(checkouts.entry(branch.to_string()).or_default())
        };
        let cached = slot
            .get_or_init(|| async {
                checkout_tests(&self.config, branch)
                    .await
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .await;

        cached
            .as_ref()
            .map(Arc::clone)
            .map_err(|reason| VerifyError::CheckoutUnavailable {
                branch: branch.to_string(),
                reason: reason.clone(),
            })
    }
}

#[async_trait]
impl UpgradeTester for CheckoutTester {
    async fn run_cell(&self, cell: &MatrixCell) -> VerifyResult<CellResult> {
        let branch = self.branch_override.as_deref().unwrap_or(&cell.branch);
        if self.dry_run {
            info!(
                cell = %cell.label(),
                branch = %branch,
                repository = %self.config.repository,
                "Dry run, not checking out or executing tests"
            );
            return Ok(CellResult::pass(cell.clone(), 0));
        }

        let checkout = self.checkout_for(branch).await?;
        let workspace = checkout.workspace().await?;
        debug!(cell = %cell.label(), root = %workspace.root().display(), "Running in private checkout");

        let command = self.command.clone().in_dir(workspace.root());
        CommandTester::new(command, false).run_cell(cell).await
    }
}
