mod browser;
mod common;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use browser::{BrowserConfig, BrowserKind, PageHarness, new_session};
use common::{PlaytestConfig, capture_artifacts, failure_dir};
use playtest_core::{
    ArtifactStore, DriverConfig, GameHarness, PlaytestDriver, PolicyPreset, RunSummary, TestType,
    arena_harness,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RunMode {
    /// In-process arena game (fast, no browser)
    Sandbox,
    /// Attach to a page exposing window.__playtestHarness
    Browser,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HeadlessMode {
    /// Run browsers in headless mode
    Headless,
    /// Run browsers with visible windows
    Windowed,
}

impl HeadlessMode {
    const fn is_headless(self) -> bool {
        matches!(self, Self::Headless)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReportFormat {
    Console,
    Json,
    Markdown,
}

#[derive(Debug, Parser)]
#[command(name = "playtest-tester", version)]
#[command(about = "Automated playtesting: drive a game through its harness and record every iteration")]
struct Args {
    /// Where the game runs
    #[arg(long, value_enum, default_value_t = RunMode::Sandbox)]
    mode: RunMode,

    /// Test type (general_playtest, bug_repro, feature_test)
    #[arg(long = "type")]
    test_type: Option<TestType>,

    /// Invariant or issue id a bug_repro run targets
    #[arg(long)]
    target: Option<String>,

    /// Index of the first iteration
    #[arg(long)]
    iteration: Option<u32>,

    /// Number of iterations to run
    #[arg(long)]
    iterations: Option<u32>,

    /// Executed-action ceiling per iteration
    #[arg(long)]
    max_steps: Option<u32>,

    /// Hold duration per action, in milliseconds
    #[arg(long)]
    duration: Option<u64>,

    /// Periodic screenshot interval in milliseconds (0 disables)
    #[arg(long)]
    screenshot_interval: Option<u64>,

    /// Agent id written into recordings
    #[arg(long)]
    agent: Option<String>,

    /// Decision policy preset
    #[arg(long, default_value = "shooter")]
    policy: PolicyPreset,

    /// Seed for the policy and the sandbox game
    #[arg(long, default_value_t = 1337)]
    seed: u64,

    /// Reload the host every N iterations (0 disables)
    #[arg(long)]
    checkpoint_every: Option<u32>,

    /// JSON config file (driver, policy, keymap, arena sections)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for recordings, iteration logs and the run summary
    #[arg(long, default_value = "recordings")]
    recordings_dir: PathBuf,

    /// Output report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Console)]
    report: ReportFormat,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    // Browser-specific options
    /// URL of the game page
    #[arg(long, default_value = "http://localhost:5173/?playtest=1")]
    base_url: String,

    /// Browser to drive (browser mode only)
    #[arg(long, value_enum, default_value_t = BrowserKind::Chrome)]
    browser: BrowserKind,

    /// Connect to a Selenium Grid/Appium hub instead of local drivers
    #[arg(long)]
    hub: Option<String>,

    /// Run headless where supported
    #[arg(long, value_enum, default_value_t = HeadlessMode::Headless)]
    headless: HeadlessMode,

    /// Seconds to wait for the page harness to appear
    #[arg(long, default_value_t = 15)]
    attach_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    announce_banner();

    let start_time = Instant::now();
    let config = resolve_config(&args)?;
    let store = ArtifactStore::new(&args.recordings_dir);

    let summary = match args.mode {
        RunMode::Sandbox => run_sandbox(&args, &config, store).await,
        RunMode::Browser => run_browser(&args, &config, store).await,
    };

    write_report(&args, &summary, start_time)?;

    if summary.aborted {
        eprintln!(
            "❌ Run aborted: {}",
            summary.abort_reason.as_deref().unwrap_or("unknown reason")
        );
        std::process::exit(1);
    }

    Ok(())
}

fn announce_banner() {
    println!("{}", "🎮 Automated Playtester".bright_cyan().bold());
    println!("{}", "=======================".cyan());
}

/// Config file first, then command-line overrides.
fn resolve_config(args: &Args) -> Result<PlaytestConfig> {
    let mut config = PlaytestConfig::load(args.config.as_deref())?;
    apply_overrides(args, &mut config.driver);
    Ok(config)
}

fn apply_overrides(args: &Args, driver: &mut DriverConfig) {
    if let Some(kind) = args.test_type {
        driver.test_type = kind;
    }
    if let Some(target) = &args.target {
        driver.target = Some(target.clone());
    }
    if let Some(first) = args.iteration {
        driver.first_iteration = first;
    }
    if let Some(n) = args.iterations {
        driver.iterations = n;
    }
    if let Some(n) = args.max_steps {
        driver.max_steps = n;
    }
    if let Some(ms) = args.duration {
        driver.step_duration_ms = ms;
    }
    if let Some(ms) = args.screenshot_interval {
        driver.screenshot_interval_ms = ms;
    }
    if let Some(agent) = &args.agent {
        driver.agent_id.clone_from(agent);
    }
    if let Some(n) = args.checkpoint_every {
        driver.checkpoint_every = n;
    }
}

async fn drive<H: GameHarness>(
    harness: H,
    args: &Args,
    config: &PlaytestConfig,
    store: ArtifactStore,
) -> RunSummary {
    let policy = args.policy.create_policy(&config.policy, args.seed);
    if args.verbose {
        println!(
            "🧭 policy {} (seed {}), {} iteration(s) from #{}",
            args.policy.to_string().bold(),
            args.seed,
            config.driver.iterations,
            config.driver.first_iteration
        );
    }
    let mut driver = PlaytestDriver::new(harness, policy, config.driver.clone()).with_store(store);
    driver.run().await
}

async fn run_sandbox(args: &Args, config: &PlaytestConfig, store: ArtifactStore) -> RunSummary {
    println!("{}", "🧪 Running Sandbox Playtest".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());
    let harness = arena_harness(config.arena.clone(), config.keymap.clone(), args.seed);
    drive(harness, args, config, store).await
}

fn build_browser_config(args: &Args) -> BrowserConfig {
    BrowserConfig {
        headless: args.headless.is_headless(),
        remote_hub: args.hub.clone(),
        ..BrowserConfig::default()
    }
}

/// Run that ended before the harness attached: record why and move on to
/// the report.
fn abort_before_attach(config: &PlaytestConfig, store: &ArtifactStore, err: &anyhow::Error) -> RunSummary {
    let summary = RunSummary::aborted(&config.driver, format!("{err:#}"));
    match store.write_summary(&summary) {
        Ok(path) => log::info!("run summary written to {}", path.display()),
        Err(write_err) => log::warn!("could not write run summary: {write_err}"),
    }
    summary
}

async fn run_browser(args: &Args, config: &PlaytestConfig, store: ArtifactStore) -> RunSummary {
    println!("{}", "🌐 Running Browser Playtest".bright_blue().bold());
    println!("{}", "-".repeat(30).blue());

    let kind = args.browser;
    let cfg = build_browser_config(args);
    let driver = match new_session(kind, &cfg)
        .await
        .with_context(|| format!("could not start {} at {}", kind.label(), cfg.endpoint(kind)))
    {
        Ok(driver) => driver,
        Err(err) => return abort_before_attach(config, &store, &err),
    };

    let attach_timeout = Duration::from_secs(args.attach_timeout);
    let page = match PageHarness::attach(driver.clone(), &args.base_url, attach_timeout).await {
        Ok(page) => page,
        Err(err) => {
            let err = anyhow!(err).context(format!("harness did not attach at {}", args.base_url));
            let dir = failure_dir(&args.recordings_dir, kind.label());
            if capture_artifacts(&driver, &dir, &err).await.is_ok() {
                eprintln!("📁 failure artifacts in {}", dir.display());
            }
            let _ = driver.quit().await;
            return abort_before_attach(config, &store, &err);
        }
    };

    let summary = drive(page, args, config, store).await;
    if summary.aborted {
        let reason = summary.abort_reason.clone().unwrap_or_default();
        let dir = failure_dir(&args.recordings_dir, kind.label());
        let _ = capture_artifacts(&driver, &dir, &anyhow!(reason)).await;
    }
    let _ = driver.quit().await;
    summary
}

fn write_report(args: &Args, summary: &RunSummary, start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report {
        ReportFormat::Json => common::reports::generate_json_report(&mut output_target, summary)?,
        ReportFormat::Markdown => {
            common::reports::generate_markdown_report(&mut output_target, summary)?;
        }
        ReportFormat::Console => {
            common::reports::generate_console_report(
                &mut output_target,
                summary,
                start_time.elapsed(),
            )?;
            writeln!(&mut output_target)?;
            writeln!(
                &mut output_target,
                "📁 Recordings: {}",
                args.recordings_dir.display()
            )?;
        }
    }

    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["playtest-tester"])
    }

    #[test]
    fn defaults_parse() {
        let args = base_args();
        assert!(matches!(args.mode, RunMode::Sandbox));
        assert_eq!(args.policy, PolicyPreset::Shooter);
        assert_eq!(args.recordings_dir, PathBuf::from("recordings"));
    }

    #[test]
    fn flags_override_config_values() {
        let args = Args::parse_from([
            "playtest-tester",
            "--type",
            "bug_repro",
            "--target",
            "healthNotNegative",
            "--iteration",
            "10",
            "--iterations",
            "3",
            "--max-steps",
            "77",
            "--duration",
            "40",
            "--agent",
            "nightly",
            "--checkpoint-every",
            "0",
        ]);
        let mut driver = DriverConfig::default();
        apply_overrides(&args, &mut driver);
        assert_eq!(driver.test_type, TestType::BugRepro);
        assert_eq!(driver.target.as_deref(), Some("healthNotNegative"));
        assert_eq!(driver.first_iteration, 10);
        assert_eq!(driver.iterations, 3);
        assert_eq!(driver.max_steps, 77);
        assert_eq!(driver.step_duration_ms, 40);
        assert_eq!(driver.agent_id, "nightly");
        assert_eq!(driver.checkpoint_every, 0);
    }

    #[test]
    fn absent_flags_keep_config_values() {
        let mut driver = DriverConfig {
            max_steps: 12,
            ..DriverConfig::default()
        };
        apply_overrides(&base_args(), &mut driver);
        assert_eq!(driver.max_steps, 12);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Args::try_parse_from(["playtest-tester", "--policy", "speedrun"]).is_err());
    }

    #[test]
    fn build_browser_config_respects_headless_and_hub() {
        let mut args = base_args();
        args.headless = HeadlessMode::Windowed;
        args.hub = Some("http://remote.example".to_string());
        let cfg = build_browser_config(&args);
        assert!(!cfg.headless);
        assert_eq!(cfg.remote_hub.as_deref(), Some("http://remote.example"));
    }

    #[test]
    fn sandbox_run_writes_recordings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = Args::parse_from([
            "playtest-tester",
            "--iterations",
            "1",
            "--max-steps",
            "8",
            "--duration",
            "50",
        ]);
        let mut config = resolve_config(&args).unwrap();
        config.driver.screenshot_interval_ms = 0;
        let store = ArtifactStore::new(dir.path());
        let summary = tokio_test::block_on(run_sandbox(&args, &config, store));
        assert_eq!(summary.iterations_completed, 1);
        assert!(dir.path().join("iter-001-general_playtest.json").exists());
        assert!(dir.path().join("summary.json").exists());
    }

    #[test]
    fn write_report_to_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.md");
        let mut args = base_args();
        args.report = ReportFormat::Markdown;
        args.output = Some(path.clone());
        let summary = tokio_test::block_on(run_sandbox(
            &args,
            &PlaytestConfig::default(),
            ArtifactStore::new(dir.path().join("rec")),
        ));
        write_report(&args, &summary, Instant::now()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("# Playtest Results: arena"));
    }

    #[test]
    fn failed_attach_still_writes_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let err = anyhow!("connection refused").context("could not start chrome");
        let summary = abort_before_attach(&PlaytestConfig::default(), &store, &err);
        assert!(summary.aborted);

        let written: RunSummary =
            serde_json::from_slice(&std::fs::read(dir.path().join("summary.json")).unwrap())
                .unwrap();
        assert!(written.aborted);
        assert!(
            written
                .abort_reason
                .is_some_and(|reason| reason.contains("connection refused"))
        );
    }

    #[test]
    fn output_target_stdout_writes() {
        let mut target = OutputTarget::new(None).unwrap();
        target.write_all(b"ok").unwrap();
        target.flush().unwrap();
    }
}
