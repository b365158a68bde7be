//! Upgrade test execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use crate::error::{VerifyError, VerifyResult};
use crate::matrix::MatrixCell;

/// Command that runs the upgrade tests in a checkout.
pub const DEFAULT_TEST_COMMAND: &[&str] = &["tox", "-e", "integration", "--", "-k", "test_version_upgrades"];

/// How to run one upgrade test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Working directory, usually the test checkout.
    pub workdir: Option<PathBuf>,

    /// Timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for TestCommand {
    fn default() -> Self {
        Self {
            command: DEFAULT_TEST_COMMAND.iter().map(|s| s.to_string()).collect(),
            workdir: None,
            timeout_secs: 3600,
        }
    }
}

impl TestCommand {
    pub fn custom(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            workdir: None,
            timeout_secs,
        }
    }

    pub fn in_dir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

/// Captured result of one command run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Outcome of one matrix cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellResult {
    pub cell: MatrixCell,
    pub passed: bool,
    pub duration_ms: u64,
    /// Failure output; empty on success.
    pub diagnostics: String,
}

impl CellResult {
    pub fn pass(cell: MatrixCell, duration_ms: u64) -> Self {
        Self {
            cell,
            passed: true,
            duration_ms,
            diagnostics: String::new(),
        }
    }

    pub fn fail(cell: MatrixCell, duration_ms: u64, diagnostics: impl Into<String>) -> Self {
        Self {
            cell,
            passed: false,
            duration_ms,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Runs a single upgrade test.
///
/// `Ok` with a failed [`CellResult`] means the test ran and failed; `Err`
/// means it could not be run. The coordinator treats both as a failed cell.
#[async_trait]
pub trait UpgradeTester: Send + Sync {
    async fn run_cell(&self, cell: &MatrixCell) -> VerifyResult<CellResult>;
}

/// Runs [`TestCommand`] as a child process per cell.
#[derive(Debug, Clone)]
pub struct CommandTester {
    command: TestCommand,
    dry_run: bool,
}

impl CommandTester {
    pub fn new(command: TestCommand, dry_run: bool) -> Self {
        Self { command, dry_run }
    }

    pub fn command(&self) -> &TestCommand {
        &self.command
    }

    /// Run the command once with extra environment variables.
    pub async fn execute(&self, label: &str, env: &[(&str, String)]) -> VerifyResult<CommandOutput> {
        let start = Instant::now();

        let (program, args) = self
            .command
            .command
            .split_first()
            .ok_or(VerifyError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.workdir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| VerifyError::Spawn {
            program: program.clone(),
            source,
        })?;

        let waited = if self.command.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.command.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| VerifyError::Timeout {
                cell: label.to_string(),
                secs: self.command.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| VerifyError::Spawn {
            program: program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl UpgradeTester for CommandTester {
    async fn run_cell(&self, cell: &MatrixCell) -> VerifyResult<CellResult> {
        let label = cell.label();
        if self.dry_run {
            info!(cell = %label, command = ?self.command.command, "Dry run, not executing test");
            return Ok(CellResult::pass(cell.clone(), 0));
        }

        let output = self.execute(&label, &cell.env()).await?;
        if output.passed() {
            Ok(CellResult::pass(cell.clone(), output.duration_ms))
        } else {
            let code = output
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Ok(CellResult::fail(
                cell.clone(),
                output.duration_ms,
                format!("exit {code}: {}", output.stderr.trim()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel_store::Revision;
    use promote_core::UpgradePath;

    fn cell() -> MatrixCell {
        MatrixCell {
            proposal_index: 0,
            proposal: "k8s-1.32-beta-amd64".to_string(),
            branch: "release-1.32".to_string(),
            revision: Revision(7),
            image: "ubuntu:24.04".to_string(),
            upgrade: UpgradePath::new("1.32/beta", "1.32/edge"),
        }
    }

    fn sh(script: &str) -> TestCommand {
        TestCommand::custom(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            60,
        )
    }

    #[test]
    fn test_default_command_runs_upgrade_tests() {
        let command = TestCommand::default();
        assert_eq!(command.command[0], "tox");
        assert!(command.command.contains(&"test_version_upgrades".to_string()));
    }

    #[tokio::test]
    async fn test_passing_cell() {
        let tester = CommandTester::new(sh("exit 0"), false);
        let result = tester.run_cell(&cell()).await.unwrap();
        assert!(result.passed);
        assert!(result.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_failing_cell_keeps_stderr() {
        let tester = CommandTester::new(sh("echo boom >&2; exit 3"), false);
        let result = tester.run_cell(&cell()).await.unwrap();
        assert!(!result.passed);
        assert!(result.diagnostics.contains("exit 3"));
        assert!(result.diagnostics.contains("boom"));
    }

    #[tokio::test]
    async fn test_cell_env_is_passed() {
        let tester = CommandTester::new(
            sh(r#"[ "$TEST_IMAGE" = "ubuntu:24.04" ] && [ "$UPGRADE_FROM" = "1.32/beta" ] && [ "$SNAP_REVISION" = "7" ]"#),
            false,
        );
        assert!(tester.run_cell(&cell()).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_workdir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "x").unwrap();
        let tester = CommandTester::new(sh("test -f marker").in_dir(dir.path()), false);
        assert!(tester.run_cell(&cell()).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_timeout() {
        let tester = CommandTester::new(
            TestCommand::custom(vec!["sleep".to_string(), "5".to_string()], 1),
            false,
        );
        let err = tester.run_cell(&cell()).await.unwrap_err();
        assert!(matches!(err, VerifyError::Timeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let tester = CommandTester::new(TestCommand::custom(Vec::new(), 1), false);
        assert!(matches!(
            tester.run_cell(&cell()).await.unwrap_err(),
            VerifyError::EmptyCommand
        ));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let tester = CommandTester::new(
            TestCommand::custom(vec!["/nonexistent/upgrade-test".to_string()], 1),
            false,
        );
        assert!(matches!(
            tester.run_cell(&cell()).await.unwrap_err(),
            VerifyError::Spawn { .. }
        ));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_execute() {
        let tester = CommandTester::new(sh("exit 1"), true);
        assert!(tester.run_cell(&cell()).await.unwrap().passed);
    }
}
