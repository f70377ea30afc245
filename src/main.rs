//! Test Launcher - test-run orchestration
//!
//! Runs local functional, API and load tests through external launchers, or
//! starts test collections on a test-management server and follows them to
//! completion, keeping an incremental JSON report current as tests finish.
//!
//! ## Features
//!
//! - Directories, list files (`.mtb`, `.txt`, `.lst`, `.yaml`, `.json`) and load scenarios
//! - GUI tests fanned out over several environments in parallel
//! - Remote collections with name and status filters
//! - Stop file and timeout budget, checked between tests and poll cycles
//! - Exit status: 0 success, 1 failed, 2 aborted, 3 connection failed
//!
//! ## Usage
//!
//! ```bash
//! # Run all tests below a directory
//! test-launcher run ./tests --report-dir ./reports
//!
//! # Run a remote collection
//! test-launcher remote "Root\Release\Nightly" --server https://alm.example.com/qcbin
//!
//! # Stop a running launcher
//! test-launcher --token 1a2b3c4d stop
//!
//! # Render the last report
//! test-launcher report test-launcher-report.json --format markdown
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod cancel;
mod catalog;
mod cli;
mod config;
mod executor;
mod models;
mod orchestrator;
mod remote;
mod results;
mod utils;

use cancel::{generate_token, CancellationSignal, Sentinel};
use catalog::{Source, TestCatalog};
use cli::{Args, Command};
use config::env::{print_env_help, EnvConfig};
use config::file::ConfigFile;
use config::LauncherConfig;
use executor::ExecutorRegistry;
use models::ExitStatus;
use orchestrator::{DispatchOrchestrator, RemoteSetOrchestrator, RemoteSettings, RunOutcome};
use remote::{Credentials, HttpBackend, RemoteFilter};
use results::{load_from_path, write_csv, ExportFormat, ReportFormat, ReportGenerator, ReportStore};
use utils::{format_duration, init_logger, LogLevel, MonotonicClock};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::resolve(
        args.log_level.as_deref(),
        args.verbose,
        env.log.as_deref(),
    ));

    match execute(args, env).await {
        Ok(status) => status.into(),
        Err(e) => {
            error!("{:#}", e);
            ExitStatus::Failed.into()
        }
    }
}

async fn execute(args: Args, env: EnvConfig) -> Result<ExitStatus> {
    let Args {
        command,
        config: config_path,
        token,
        ..
    } = args;
    let config_path = config_path.or_else(|| env.config_file.as_ref().map(PathBuf::from));

    match command {
        Command::Run(run_args) => {
            let config = load_config(config_path.as_deref(), &env)?;
            run_local(run_args, config, token).await
        }
        Command::Remote(remote_args) => {
            let config = load_config(config_path.as_deref(), &env)?;
            run_remote(remote_args, config, token).await
        }
        Command::List(list_args) => {
            let config = load_config(config_path.as_deref(), &env)?;
            Ok(list_tests(list_args, &config))
        }
        Command::Stop(stop_args) => request_stop(stop_args, token),
        Command::Report(report_args) => show_report(report_args),
        Command::Config(config_args) => {
            manage_config(config_args.action, config_path.as_deref(), &env)
        }
    }
}

/// File settings with environment overrides; CLI flags are applied by each
/// command on top
fn load_config(path: Option<&Path>, env: &EnvConfig) -> Result<LauncherConfig> {
    let mut file = ConfigFile::load_or_default(path)?;
    env.apply(&mut file.launcher);
    Ok(file.launcher)
}

/// Cancellation gate for this run; prints the token that stops it
fn cancellation(
    config: &LauncherConfig,
    token: Option<String>,
    budget: Option<Duration>,
) -> Result<Arc<CancellationSignal>> {
    let token = token.unwrap_or_else(generate_token);
    let sentinel = Sentinel::new(&config.sentinel_dir, &token);
    sentinel.clear()?;

    println!("Run token: {token}  (stop with: test-launcher --token {token} stop)");
    if let Some(budget) = budget {
        info!("Timeout budget: {}", format_duration(budget));
    }

    Ok(Arc::new(
        CancellationSignal::new(MonotonicClock::shared())
            .with_sentinel(sentinel)
            .with_budget(budget),
    ))
}

fn open_report(config: &LauncherConfig, options: &cli::RunOptions) -> Result<Option<ReportStore>> {
    if options.no_report {
        return Ok(None);
    }
    let path = options
        .report_file
        .clone()
        .unwrap_or_else(|| config.report_file.clone());
    let store = ReportStore::begin(&path)
        .with_context(|| format!("Failed to start report: {}", path.display()))?;
    Ok(Some(store))
}

/// Decide the verdict, stamp it into the report and print the summary
fn conclude(outcome: RunOutcome, report: Option<&ReportStore>, cancel: &CancellationSignal) -> ExitStatus {
    let status = outcome.status();

    if let Some(store) = report {
        match store.record_status(status) {
            Ok(()) => info!("Report written to {}", store.path().display()),
            Err(e) => warn!("Failed to finalize report: {:#}", e),
        }
    }
    for unresolved in &outcome.unresolved {
        warn!("Not run: {}", unresolved);
    }
    if let Some(reason) = outcome.aborted {
        warn!("Run aborted ({})", reason);
    }

    println!("{}", ReportGenerator::run_summary(&outcome.suites, status));

    if let Some(sentinel) = cancel.sentinel() {
        if let Err(e) = sentinel.clear() {
            warn!("{:#}", e);
        }
    }
    status
}

async fn run_local(
    args: cli::RunArgs,
    mut config: LauncherConfig,
    token: Option<String>,
) -> Result<ExitStatus> {
    if let Some(timeout) = args.options.timeout {
        config.timeout_secs = Some(timeout);
    }
    if let Some(dir) = args.options.sentinel_dir.clone() {
        config.sentinel_dir = dir;
    }
    if let Some(dir) = args.report_dir {
        config.report_dir = Some(dir);
    }
    if args.cancel_on_failure {
        config.cancel_on_failure = true;
    }
    if !args.environments.is_empty() {
        config.executors.parallel.environments = args.environments;
    }
    config.validate()?;

    let sources: Vec<Source> = args.sources.into_iter().map(Source::Path).collect();
    let catalog = TestCatalog::build(&sources, config.report_dir.as_deref());
    if catalog.is_empty() {
        error!("No tests found in the given sources");
        return Ok(ExitStatus::Failed);
    }
    info!("{} tests to run", catalog.len());

    let cancel = cancellation(&config, token, config.timeout())?;
    let report = open_report(&config, &args.options)?;

    let mut orchestrator =
        DispatchOrchestrator::new(ExecutorRegistry::standard(&config.executors), Arc::clone(&cancel))
            .with_cancel_on_failure(config.cancel_on_failure)
            .with_parallel(config.executors.parallel.is_enabled())
            .with_report(report.clone());

    let outcome = orchestrator.run(catalog.specs()).await;
    Ok(conclude(outcome, report.as_ref(), &cancel))
}

async fn run_remote(
    args: cli::RemoteArgs,
    mut config: LauncherConfig,
    token: Option<String>,
) -> Result<ExitStatus> {
    let remote = &mut config.remote;
    if let Some(server) = args.server {
        remote.server = Some(server);
    }
    if let Some(user) = args.user {
        remote.user = Some(user);
    }
    if let Some(domain) = args.domain {
        remote.domain = domain;
    }
    if let Some(project) = args.project {
        remote.project = project;
    }
    if let Some(run_mode) = args.run_mode {
        remote.run_mode = run_mode.into();
    }
    if let Some(host) = args.host {
        remote.host = Some(host);
    }
    if let Some(name) = args.filter_name {
        remote.filter_name = Some(name);
    }
    if !args.filter_statuses.is_empty() {
        remote.filter_statuses = args.filter_statuses;
    }
    if args.insecure_tls {
        remote.insecure_tls = true;
    }
    if let Some(timeout) = args.options.timeout {
        remote.timeout_secs = Some(timeout);
    }
    if let Some(dir) = args.options.sentinel_dir.clone() {
        config.sentinel_dir = dir;
    }
    config.validate()?;

    let sources: Vec<Source> = args.collections.into_iter().map(Source::Remote).collect();
    let catalog = TestCatalog::build(&sources, None);
    if catalog.is_empty() {
        error!("No valid collections given");
        return Ok(ExitStatus::Failed);
    }
    let collections: Vec<String> = catalog
        .specs()
        .iter()
        .filter_map(|spec| spec.collection().map(str::to_string))
        .collect();

    let remote = &config.remote;
    let server = remote
        .server
        .clone()
        .context("No server configured; pass --server or set TEST_LAUNCHER_SERVER")?;
    let settings = RemoteSettings {
        server,
        credentials: Credentials {
            user: remote.user.clone().unwrap_or_default(),
            password: remote.password.clone(),
            client_id: remote.client_id.clone(),
            api_key: remote.api_key.clone(),
            domain: remote.domain.clone(),
            project: remote.project.clone(),
        },
        run_mode: remote.run_mode()?,
        filter: RemoteFilter::new(remote.filter_name.clone(), remote.filter_statuses.clone()),
        poll_interval: config.poll_interval(),
    };

    let budget = remote.timeout().or(config.timeout());
    let cancel = cancellation(&config, token, budget)?;
    let report = open_report(&config, &args.options)?;

    if config.remote.insecure_tls {
        warn!("Server certificate verification is disabled");
    }
    let backend = HttpBackend::new(config.remote.insecure_tls)?;
    let mut orchestrator = RemoteSetOrchestrator::new(backend, settings, Arc::clone(&cancel))
        .with_report(report.clone());

    let outcome = orchestrator.run(&collections).await;
    Ok(conclude(outcome, report.as_ref(), &cancel))
}

fn list_tests(args: cli::ListArgs, config: &LauncherConfig) -> ExitStatus {
    let sources: Vec<Source> = args.sources.into_iter().map(Source::Path).collect();
    let catalog = TestCatalog::build(&sources, config.report_dir.as_deref());
    if catalog.is_empty() {
        println!("No tests found");
        return ExitStatus::Failed;
    }

    println!("\nTests ({} total)\n", catalog.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (i, spec) in catalog.specs().iter().enumerate() {
        if args.detailed {
            let test_type = spec.test_type.map(|t| t.name()).unwrap_or("unknown");
            println!("  {:3}. {:50} [{}] {}", i + 1, spec.name, test_type, spec.group);
            for parameter in &spec.parameters {
                println!("         {} = {}", parameter.name, parameter.value);
            }
        } else {
            println!("  {:3}. {}", i + 1, spec.name);
        }
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    if catalog.has_load_tests() {
        println!("Includes load scenarios\n");
    }

    ExitStatus::Success
}

fn request_stop(args: cli::StopArgs, token: Option<String>) -> Result<ExitStatus> {
    let token = token.context("Pass the run token with --token")?;
    let sentinel = Sentinel::new(&args.sentinel_dir, &token);
    sentinel.raise()?;
    println!("✓ Stop requested: {}", sentinel.path().display());
    Ok(ExitStatus::Success)
}

fn show_report(args: cli::ReportArgs) -> Result<ExitStatus> {
    let report = load_from_path(&args.file)?;

    if let Some(format) = ReportFormat::from_str(&args.format) {
        let rendered = ReportGenerator::render(&report, format);
        match &args.output {
            Some(path) => {
                std::fs::write(path, rendered)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("✓ Report written to {}", path.display());
            }
            None => println!("{rendered}"),
        }
        return Ok(ExitStatus::Success);
    }

    let format = ExportFormat::from_str(&args.format)
        .with_context(|| format!("Unknown report format: {}", args.format))?;
    match (&args.output, format) {
        (Some(path), format) => {
            ReportStore::export(&report, path, format)?;
            println!("✓ Exported {} cases to {}", report.total_cases(), path.display());
        }
        (None, ExportFormat::Csv) => write_csv(&report, std::io::stdout().lock())?,
        (None, ExportFormat::Json) => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &report).context("Failed to write report")?;
            writeln!(stdout)?;
        }
    }
    Ok(ExitStatus::Success)
}

fn manage_config(
    action: cli::ConfigAction,
    path: Option<&Path>,
    env: &EnvConfig,
) -> Result<ExitStatus> {
    match action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }
            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let mut config = ConfigFile::load_or_default(path)?;
            env.apply(&mut config.launcher);
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Env => {
            env.print_summary();
            println!();
            print_env_help();
        }

        cli::ConfigAction::Schema => println!("{}", ConfigFile::schema()?),
    }

    Ok(ExitStatus::Success)
}
