//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::RunModeKind;

/// Run local tests and remote test collections
#[derive(Parser, Debug)]
#[command(name = "test-launcher")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run local tests and remote test collections with incremental reports")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Run token naming the stop file; generated when omitted
    #[arg(long, global = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run local tests from directories, list files or scenarios
    Run(RunArgs),

    /// Run collections on the test-management server
    Remote(RemoteArgs),

    /// List the tests a set of sources resolves to
    List(ListArgs),

    /// Ask a running launcher to stop
    Stop(StopArgs),

    /// Render a saved report
    Report(ReportArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Options shared by run and remote
#[derive(Parser, Debug, Default)]
pub struct RunOptions {
    /// Overall timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Incremental JSON report file
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    /// Do not write the incremental report
    #[arg(long)]
    pub no_report: bool,

    /// Directory watched for the stop file
    #[arg(long)]
    pub sentinel_dir: Option<PathBuf>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test directories, list files (.mtb, .txt, .lst, .yaml, .json) or .lrs scenarios
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Base directory for per-test reports
    #[arg(short, long)]
    pub report_dir: Option<PathBuf>,

    /// Skip the remaining tests after the first failure or error
    #[arg(long)]
    pub cancel_on_failure: bool,

    /// Environments to run GUI tests against in parallel (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub environments: Vec<String>,

    #[command(flatten)]
    pub options: RunOptions,
}

/// Arguments for remote command
#[derive(Parser, Debug)]
pub struct RemoteArgs {
    /// Collection paths, e.g. `Root\Release\Nightly "user":"qa"`
    #[arg(required = true)]
    pub collections: Vec<String>,

    /// Server URL
    #[arg(short, long)]
    pub server: Option<String>,

    #[arg(short, long)]
    pub user: Option<String>,

    #[arg(long)]
    pub domain: Option<String>,

    #[arg(long)]
    pub project: Option<String>,

    /// Where the tests execute
    #[arg(long, value_enum)]
    pub run_mode: Option<RunModeArg>,

    /// Host for the remote run mode
    #[arg(long)]
    pub host: Option<String>,

    /// Keep tests whose name contains this text
    #[arg(long)]
    pub filter_name: Option<String>,

    /// Keep tests whose last status is one of these (repeatable)
    #[arg(long = "filter-status")]
    pub filter_statuses: Vec<String>,

    /// Accept server certificates that cannot be verified
    #[arg(long)]
    pub insecure_tls: bool,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunModeArg {
    Local,
    Remote,
    PlannedHost,
}

impl From<RunModeArg> for RunModeKind {
    fn from(arg: RunModeArg) -> Self {
        match arg {
            RunModeArg::Local => RunModeKind::Local,
            RunModeArg::Remote => RunModeKind::Remote,
            RunModeArg::PlannedHost => RunModeKind::PlannedHost,
        }
    }
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Show group, type and parameters
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for stop command
#[derive(Parser, Debug)]
pub struct StopArgs {
    /// Directory watched by the running launcher
    #[arg(long, default_value = ".")]
    pub sentinel_dir: PathBuf,
}

/// Arguments for report command
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Report file written by a run
    pub file: PathBuf,

    /// Output format (text, markdown, csv)
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = "./test-launcher.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Show environment variable overrides
    Env,

    /// Print the JSON schema of the configuration
    Schema,
}
