//! Configuration module
//!
//! Handles loading and managing configuration.

pub mod env;
pub mod file;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::TestType;
use crate::remote::RunMode;

/// Default interval between remote status refreshes
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default incremental report file name
pub const DEFAULT_REPORT_FILE: &str = "test-launcher-report.json";

/// Launcher configuration
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LauncherConfig {
    /// Overall timeout budget for a run, in seconds
    pub timeout_secs: Option<u64>,

    /// Remote poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Skip the remaining tests after the first failure or error
    pub cancel_on_failure: bool,

    /// Base directory for per-test reports
    pub report_dir: Option<PathBuf>,

    /// Incremental JSON report written during the run
    pub report_file: PathBuf,

    /// Directory watched for the stop sentinel
    pub sentinel_dir: PathBuf,

    /// Launchers per test type
    pub executors: ExecutorConfig,

    /// Remote test-management server
    pub remote: RemoteConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            cancel_on_failure: false,
            report_dir: None,
            report_file: PathBuf::from(DEFAULT_REPORT_FILE),
            sentinel_dir: PathBuf::from("."),
            executors: ExecutorConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl LauncherConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.executors.parallel.max_concurrent == 0 {
            anyhow::bail!("executors.parallel.max_concurrent must be greater than zero");
        }
        self.executors.validate()?;
        self.remote.run_mode()?;
        Ok(())
    }
}

/// External program invocation
///
/// Arguments may use the `{test}`, `{report}`, `{name}` and `{env}`
/// placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Parallel fan-out settings for GUI tests
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ParallelConfig {
    /// Environments each GUI test runs against; empty disables fan-out
    pub environments: Vec<String>,
    pub max_concurrent: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            environments: Vec::new(),
            max_concurrent: 4,
        }
    }
}

impl ParallelConfig {
    pub fn is_enabled(&self) -> bool {
        !self.environments.is_empty()
    }
}

/// Executor settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExecutorConfig {
    pub gui: Option<CommandConfig>,
    pub api: Option<CommandConfig>,
    pub load: Option<CommandConfig>,

    /// Run once per executor when the run ends
    pub cleanup: Option<CommandConfig>,

    /// Per-test timeout in seconds
    pub test_timeout_secs: Option<u64>,

    pub parallel: ParallelConfig,
}

impl ExecutorConfig {
    /// Launcher for a test type; parallel runs reuse the GUI launcher
    pub fn command(&self, test_type: TestType) -> Option<&CommandConfig> {
        match test_type {
            TestType::Gui | TestType::Parallel => self.gui.as_ref(),
            TestType::Api => self.api.as_ref(),
            TestType::Load => self.load.as_ref(),
        }
    }

    pub fn test_timeout(&self) -> Option<Duration> {
        self.test_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        let commands = [&self.gui, &self.api, &self.load, &self.cleanup];
        for command in commands.into_iter().flatten() {
            if command.program.trim().is_empty() {
                anyhow::bail!("Executor program must not be empty");
            }
        }
        Ok(())
    }
}

/// How a remote collection is executed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunModeKind {
    #[default]
    Local,
    Remote,
    PlannedHost,
}

/// Remote test-management server settings
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RemoteConfig {
    /// Server URL
    pub server: Option<String>,
    pub user: Option<String>,
    pub client_id: Option<String>,
    pub domain: String,
    pub project: String,

    /// Password, taken only from the environment
    #[serde(skip)]
    pub password: Option<String>,

    /// API key, taken only from the environment
    #[serde(skip)]
    pub api_key: Option<String>,

    pub run_mode: RunModeKind,

    /// Host for the `remote` run mode
    pub host: Option<String>,

    /// Keep tests whose name contains this text
    pub filter_name: Option<String>,

    /// Keep tests whose last status is one of these
    pub filter_statuses: Vec<String>,

    /// Overall timeout for remote runs, in seconds
    pub timeout_secs: Option<u64>,

    /// Accept self-signed or otherwise unverifiable server certificates
    pub insecure_tls: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server: None,
            user: None,
            client_id: None,
            domain: "DEFAULT".to_string(),
            project: String::new(),
            password: None,
            api_key: None,
            run_mode: RunModeKind::Local,
            host: None,
            filter_name: None,
            filter_statuses: Vec::new(),
            timeout_secs: None,
            insecure_tls: false,
        }
    }
}

impl RemoteConfig {
    pub fn run_mode(&self) -> Result<RunMode> {
        match self.run_mode {
            RunModeKind::Local => Ok(RunMode::Local),
            RunModeKind::PlannedHost => Ok(RunMode::PlannedHost),
            RunModeKind::Remote => match self.host.as_deref().map(str::trim) {
                Some(host) if !host.is_empty() => Ok(RunMode::Remote(host.to_string())),
                _ => anyhow::bail!("Run mode 'remote' requires a host"),
            },
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LauncherConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert!(!config.cancel_on_failure);
        assert!(!config.remote.insecure_tls);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remote_run_mode_requires_host() {
        let mut remote = RemoteConfig {
            run_mode: RunModeKind::Remote,
            ..Default::default()
        };
        assert!(remote.run_mode().is_err());

        remote.host = Some("lab-01".to_string());
        assert_eq!(remote.run_mode().unwrap(), RunMode::Remote("lab-01".to_string()));
    }

    #[test]
    fn test_parallel_reuses_gui_command() {
        let executors = ExecutorConfig {
            gui: Some(CommandConfig::new("gui-runner")),
            ..Default::default()
        };
        assert_eq!(
            executors.command(TestType::Parallel).map(|c| c.program.as_str()),
            Some("gui-runner")
        );
        assert!(executors.command(TestType::Api).is_none());
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let mut config = LauncherConfig::default();
        config.executors.api = Some(CommandConfig::new("  "));
        assert!(config.validate().is_err());
    }
}
