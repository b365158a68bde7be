//! snap-promote - automated risk-level promotion for snap tracks
//!
//! ## Commands
//!
//! - `propose`: print the promotions that are due, as a JSON list
//! - `test`: run upgrade tests for proposals (or a plain test run for a branch)
//! - `promote`: release one revision into one channel
//! - `run`: propose, verify and promote in one go

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use channel_store::{
    Channel, ChannelStore, Revision, SnapStoreClient, SnapStoreConfig, StoreCredentials,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use promote_core::{
    parse_threshold, propose, ExclusionPreset, PromoteSettings, PromotionOutcome, Promoter,
    ProposalSet, METRICS,
};
use promote_verify::{
    checkout_tests, CheckoutConfig, CheckoutTester, CommandTester, CoordinatorConfig,
    PromotionCycle, TestCommand, VerificationCoordinator, DEFAULT_TEST_COMMAND,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "snap-promote")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Promote snap revisions through risk levels", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the promotions that are due and print them as JSON
    Propose {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        select: ProposeArgs,

        /// Write the proposal list here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run upgrade tests
    Test {
        /// Branch to take tests from (overrides each proposal's branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Proposal list from `propose`; `-` reads stdin
        #[arg(short, long)]
        proposals: Option<PathBuf>,

        #[command(flatten)]
        tests: TestArgs,

        /// Log what would run without cloning or executing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Release a revision into a channel
    Promote {
        #[command(flatten)]
        store: StoreArgs,

        /// Revision to release (`42` or `r42`)
        #[arg(short, long)]
        revision: String,

        /// Destination channel (`track/risk`)
        #[arg(short, long)]
        channel: String,

        /// Report instead of releasing
        #[arg(long)]
        dry_run: bool,
    },

    /// Propose, verify and promote in one go
    Run {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        select: ProposeArgs,

        #[command(flatten)]
        tests: TestArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct StoreArgs {
    /// Snap whose channels are managed
    #[arg(long, env = "SNAP_PROMOTE_SNAP")]
    snap: Option<String>,

    /// Store info API base URL
    #[arg(long, env = "SNAP_PROMOTE_STORE_URL")]
    store_url: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct ProposeArgs {
    /// TOML settings file; flags override its values
    #[arg(long, env = "SNAP_PROMOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Only consider this track
    #[arg(long)]
    track: Option<String>,

    /// Dwell threshold override, repeatable
    #[arg(long = "threshold", value_name = "RISK=DAYS")]
    thresholds: Vec<String>,

    /// Track regex to skip, repeatable
    #[arg(long = "ignore-track", value_name = "REGEX")]
    ignore_tracks: Vec<String>,

    /// Architecture to skip, repeatable
    #[arg(long = "ignore-arch", value_name = "ARCH")]
    ignore_architectures: Vec<String>,

    /// Built-in exclusion preset: `scheduled` or `manual`
    #[arg(long)]
    schedule: Option<String>,

    /// Test image, repeatable; replaces the configured list
    #[arg(long = "image")]
    images: Vec<String>,

    /// Also test upgrades from the previous version line
    #[arg(long)]
    upgrade_from_previous_track: bool,

    /// Allow the first stable release of a track without manual approval
    #[arg(long)]
    allow_first_stable: bool,

    /// Promote edge immediately when its version differs from beta
    #[arg(long)]
    promote_new_edge_patches: bool,

    /// Compute everything but never mutate the store
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug, Clone)]
struct TestArgs {
    /// Repository holding the upgrade tests
    #[arg(long, default_value = promote_verify::checkout::DEFAULT_REPOSITORY)]
    repository: String,

    /// Per-test timeout in seconds (0 disables)
    #[arg(long, default_value = "3600")]
    timeout_secs: u64,

    /// Maximum number of tests running at once
    #[arg(long, default_value = "4")]
    max_concurrent: usize,

    /// Test command, after `--`
    #[arg(last = true)]
    command: Vec<String>,
}

impl TestArgs {
    fn test_command(&self) -> TestCommand {
        let command = if self.command.is_empty() {
            DEFAULT_TEST_COMMAND.iter().map(|s| s.to_string()).collect()
        } else {
            self.command.clone()
        };
        TestCommand::custom(command, self.timeout_secs)
    }

    fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            repository: self.repository.clone(),
            ..CheckoutConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    promote_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Propose {
            store,
            select,
            output,
        } => cmd_propose(&store, &select, output.as_deref()).await,
        Commands::Test {
            branch,
            proposals,
            tests,
            dry_run,
        } => cmd_test(branch.as_deref(), proposals.as_deref(), &tests, dry_run).await,
        Commands::Promote {
            store,
            revision,
            channel,
            dry_run,
        } => cmd_promote(&store, &revision, &channel, dry_run).await,
        Commands::Run {
            store,
            select,
            tests,
        } => cmd_run(&store, &select, &tests).await,
    };

    METRICS.flush();
    result
}

/// Settings file (or defaults) with flag overrides applied.
fn build_settings(store: &StoreArgs, args: &ProposeArgs) -> Result<PromoteSettings> {
    let mut settings = match &args.config {
        Some(path) => PromoteSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => PromoteSettings::default(),
    };

    if let Some(snap) = &store.snap {
        settings.snap_name = snap.clone();
    }
    if let Some(track) = &args.track {
        settings.track_filter = Some(track.clone());
    }
    for raw in &args.thresholds {
        let (risk, days) = parse_threshold(raw)?;
        settings.thresholds.insert(risk, days);
    }
    settings.ignore_tracks.extend(args.ignore_tracks.iter().cloned());
    settings
        .ignore_architectures
        .extend(args.ignore_architectures.iter().cloned());
    if let Some(schedule) = &args.schedule {
        settings.schedule = schedule.parse::<ExclusionPreset>()?;
    }
    if !args.images.is_empty() {
        settings.images = args.images.clone();
    }
    settings.upgrade_from_previous_track |= args.upgrade_from_previous_track;
    settings.promote_new_edge_patches |= args.promote_new_edge_patches;
    if args.allow_first_stable {
        settings.require_stable_blessing = false;
    }
    settings.dry_run |= args.dry_run;

    Ok(settings)
}

fn store_client(store: &StoreArgs, snap_name: &str) -> Result<SnapStoreClient> {
    let mut config = SnapStoreConfig::new(snap_name);
    if let Some(url) = &store.store_url {
        config = config.with_info_url(url);
    }
    let credentials = StoreCredentials::from_env().context("malformed store credentials")?;
    SnapStoreClient::new(config, credentials).context("failed to build store client")
}

fn read_proposals(path: &Path) -> Result<ProposalSet> {
    let raw = if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read proposals from stdin")?;
        raw
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read proposals from {}", path.display()))?
    };
    ProposalSet::from_json(&raw).context("malformed proposal list")
}

async fn cmd_propose(store: &StoreArgs, args: &ProposeArgs, output: Option<&Path>) -> Result<()> {
    let config = build_settings(store, args)?
        .compile()
        .context("invalid configuration")?;
    let client = store_client(store, &config.snap_name)?;

    let run = propose(&client, &config, Utc::now())
        .await
        .context("failed to compute proposals")?;

    let json = run.report.proposals.to_json()?;
    match output {
        Some(path) => std::fs::write(path, &json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    info!(
        run_id = %run.run_id,
        proposals = run.report.proposals.len(),
        rejected = run.report.rejected.len(),
        skipped = run.evaluation.skipped.len(),
        digest = %run.digest,
        "Proposals computed"
    );
    Ok(())
}

async fn cmd_test(
    branch: Option<&str>,
    proposals: Option<&Path>,
    tests: &TestArgs,
    dry_run: bool,
) -> Result<()> {
    let Some(path) = proposals else {
        let branch = branch.context("either --proposals or --branch is required")?;
        return cmd_test_branch(branch, tests, dry_run).await;
    };

    let proposals = read_proposals(path)?;
    let mut tester = CheckoutTester::new(tests.checkout_config(), tests.test_command(), dry_run);
    if let Some(branch) = branch {
        tester = tester.with_branch(branch);
    }
    let coordinator = VerificationCoordinator::new(
        Arc::new(tester),
        CoordinatorConfig {
            max_concurrent: tests.max_concurrent,
        },
    );

    let outcomes = coordinator.verify(&proposals).await;
    for outcome in &outcomes {
        let status = if outcome.passed { "PASS" } else { "FAIL" };
        println!("{status} {}", outcome.proposal.display_name);
        for violation in &outcome.violations {
            println!("    {violation}");
        }
    }

    let failed = outcomes.iter().filter(|o| !o.passed).count();
    println!("Summary: {}/{} proposals verified", outcomes.len() - failed, outcomes.len());
    if failed > 0 {
        anyhow::bail!("{failed} proposal(s) failed verification");
    }
    Ok(())
}

/// One plain test run on `branch`, without a matrix.
async fn cmd_test_branch(branch: &str, tests: &TestArgs, dry_run: bool) -> Result<()> {
    let command = tests.test_command();
    if dry_run {
        println!(
            "Would run {:?} from {} at {branch}",
            command.command, tests.repository
        );
        return Ok(());
    }

    let checkout = checkout_tests(&tests.checkout_config(), branch)
        .await
        .context("failed to check out upgrade tests")?;
    println!("Testing {} from branch {}", tests.repository, checkout.branch());

    let tester = CommandTester::new(command.in_dir(checkout.root()), false);
    let output = tester.execute(branch, &[]).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);

    if !output.passed() {
        anyhow::bail!(
            "upgrade tests failed on {} (exit {:?})",
            checkout.branch(),
            output.exit_code
        );
    }
    println!("Upgrade tests passed ({}ms)", output.duration_ms);
    Ok(())
}

async fn cmd_promote(store: &StoreArgs, revision: &str, channel: &str, dry_run: bool) -> Result<()> {
    let revision: Revision = revision.parse().context("invalid revision")?;
    let channel: Channel = channel.parse().context("invalid channel")?;
    let snap_name = store
        .snap
        .clone()
        .unwrap_or_else(|| PromoteSettings::default().snap_name);

    let client = store_client(store, &snap_name)?;
    let promoter = Promoter::new(Arc::new(client), dry_run);
    let outcome = promoter
        .promote(revision, &channel)
        .await
        .with_context(|| format!("failed to promote r{revision} to {channel}"))?;

    match outcome {
        PromotionOutcome::Promoted => println!("Promoted r{revision} -> {channel}"),
        PromotionOutcome::AlreadyPublished => println!("r{revision} already in {channel}"),
        PromotionOutcome::DryRun => println!("Dry run: would promote r{revision} -> {channel}"),
    }
    Ok(())
}

#[derive(Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    digest: &'a str,
    proposals: usize,
    verification_failures: usize,
    promotion_failures: usize,
}

async fn cmd_run(store: &StoreArgs, args: &ProposeArgs, tests: &TestArgs) -> Result<()> {
    let config = build_settings(store, args)?
        .compile()
        .context("invalid configuration")?;
    let client: Arc<dyn ChannelStore> = Arc::new(store_client(store, &config.snap_name)?);
    let tester = CheckoutTester::new(tests.checkout_config(), tests.test_command(), config.dry_run);

    let cycle = PromotionCycle::new(
        client,
        Arc::new(tester),
        CoordinatorConfig {
            max_concurrent: tests.max_concurrent,
        },
    );
    let report = cycle
        .run(&config, Utc::now())
        .await
        .context("promotion cycle failed")?;

    for entry in report.entries() {
        println!("{}", serde_json::to_string(&entry)?);
    }
    let summary = RunSummary {
        run_id: &report.run.run_id,
        digest: &report.run.digest,
        proposals: report.outcomes.len(),
        verification_failures: report.verification_failures(),
        promotion_failures: report.promotion_failures(),
    };
    println!("{}", serde_json::to_string(&summary)?);

    if report.promotion_failures() > 0 {
        anyhow::bail!("{} promotion(s) failed", report.promotion_failures());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_propose_flags() {
        let cli = Cli::try_parse_from([
            "snap-promote",
            "propose",
            "--threshold",
            "edge=2",
            "--ignore-track",
            r"1\.31",
            "--ignore-arch",
            "s390x",
            "--schedule",
            "manual",
            "--dry-run",
        ])
        .unwrap();
        let Commands::Propose { store, select, .. } = cli.command else {
            panic!("expected propose");
        };

        let config = build_settings(&store, &select).unwrap().compile().unwrap();
        assert_eq!(config.thresholds.edge, 2);
        assert_eq!(config.schedule, ExclusionPreset::Manual);
        assert!(config.exclusions.matching_pattern("1.31").is_some());
        assert!(config.exclusions.matching_pattern("1.30").is_none());
        assert!(config.exclusions.excludes_architecture("s390x"));
        assert!(config.dry_run);
    }

    #[test]
    fn test_bad_threshold_is_rejected_before_store() {
        let args = ProposeArgs {
            thresholds: vec!["edge".to_string()],
            ..ProposeArgs::default()
        };
        assert!(build_settings(&StoreArgs::default(), &args).is_err());
    }

    #[test]
    fn test_flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promote.toml");
        std::fs::write(
            &path,
            "snap_name = \"k8s\"\nimages = [\"ubuntu:22.04\"]\nrequire_stable_blessing = true\n",
        )
        .unwrap();

        let store = StoreArgs {
            snap: Some("k8s-test".to_string()),
            store_url: None,
        };
        let args = ProposeArgs {
            config: Some(path),
            allow_first_stable: true,
            ..ProposeArgs::default()
        };
        let settings = build_settings(&store, &args).unwrap();
        assert_eq!(settings.snap_name, "k8s-test");
        assert_eq!(settings.images, vec!["ubuntu:22.04".to_string()]);
        assert!(!settings.require_stable_blessing);
    }

    #[test]
    fn test_parse_test_command_after_separator() {
        let cli = Cli::try_parse_from([
            "snap-promote",
            "test",
            "--branch",
            "release-1.32",
            "--dry-run",
            "--",
            "pytest",
            "-k",
            "upgrade",
        ])
        .unwrap();
        let Commands::Test { branch, tests, dry_run, .. } = cli.command else {
            panic!("expected test");
        };
        assert_eq!(branch.as_deref(), Some("release-1.32"));
        assert!(dry_run);
        assert_eq!(tests.test_command().command, vec!["pytest", "-k", "upgrade"]);
    }

    #[test]
    fn test_default_test_command() {
        let cli = Cli::try_parse_from(["snap-promote", "test", "--branch", "main"]).unwrap();
        let Commands::Test { tests, .. } = cli.command else {
            panic!("expected test");
        };
        assert_eq!(tests.test_command().command[0], "tox");
        assert_eq!(tests.max_concurrent, 4);
    }

    #[test]
    fn test_read_proposals_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proposals.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(read_proposals(&path).unwrap().is_empty());

        std::fs::write(&path, "{not json").unwrap();
        assert!(read_proposals(&path).is_err());
    }

    #[tokio::test]
    async fn test_test_requires_branch_or_proposals() {
        let cli = Cli::try_parse_from(["snap-promote", "test"]).unwrap();
        let Commands::Test { tests, .. } = cli.command else {
            panic!("expected test");
        };
        assert!(cmd_test(None, None, &tests, true).await.is_err());
    }
}
