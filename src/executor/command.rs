//! External launcher executor
//!
//! Runs a configured program once per test and maps its exit code to a test
//! state. The child is polled for exit, for cancellation and for the
//! per-test timeout.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::Executor;
use crate::cancel::CancellationSignal;
use crate::config::{CommandConfig, ExecutorConfig};
use crate::models::{TestRunResult, TestSpec, TestState, TestType};

const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to keep reading output after the launcher exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of environment variables carrying test parameters
const PARAM_ENV_PREFIX: &str = "TEST_LAUNCHER_PARAM_";

/// Values substituted into launcher arguments
#[derive(Clone, Debug, Default)]
pub(crate) struct Placeholders {
    pub test: String,
    pub report: String,
    pub name: String,
    pub env: String,
}

impl Placeholders {
    pub fn for_spec(spec: &TestSpec, report_dir: Option<&Path>) -> Self {
        Self {
            test: spec.path().map(|p| p.display().to_string()).unwrap_or_default(),
            report: report_dir.map(|p| p.display().to_string()).unwrap_or_default(),
            name: spec.name.clone(),
            env: String::new(),
        }
    }

    pub fn apply(&self, arg: &str) -> String {
        arg.replace("{test}", &self.test)
            .replace("{report}", &self.report)
            .replace("{name}", &self.name)
            .replace("{env}", &self.env)
    }
}

/// How a launched process ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ProcessOutcome {
    Exited(Option<i32>),
    Cancelled,
    TimedOut(Duration),
}

/// Exit outcome mapped to a test state
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Verdict {
    pub state: TestState,
    pub warnings: bool,
    pub message: Option<String>,
}

impl ProcessOutcome {
    /// 0 passes, 1 fails, 2 passes with warnings, anything else is an error.
    /// A cancelled process is an error without a message.
    pub fn verdict(&self) -> Verdict {
        let (state, warnings, message) = match self {
            ProcessOutcome::Exited(Some(0)) => (TestState::Passed, false, None),
            ProcessOutcome::Exited(Some(1)) => (
                TestState::Failed,
                false,
                Some("Test failed with exit code 1".to_string()),
            ),
            ProcessOutcome::Exited(Some(2)) => (TestState::Passed, true, None),
            ProcessOutcome::Exited(Some(code)) => (
                TestState::Error,
                false,
                Some(format!("Test process exited with code {code}")),
            ),
            ProcessOutcome::Exited(None) => (
                TestState::Error,
                false,
                Some("Test process was terminated by a signal".to_string()),
            ),
            ProcessOutcome::Cancelled => (TestState::Error, false, None),
            ProcessOutcome::TimedOut(limit) => (
                TestState::Error,
                false,
                Some(format!("Test exceeded its timeout of {}s", limit.as_secs())),
            ),
        };
        Verdict {
            state,
            warnings,
            message,
        }
    }
}

/// Finished process with its captured console output
#[derive(Debug)]
pub(crate) struct ProcessRun {
    pub outcome: ProcessOutcome,
    pub output: Vec<String>,
}

/// Launch `command` and wait for it, killing it on cancellation or timeout
pub(crate) async fn run_process(
    command: &CommandConfig,
    vars: &Placeholders,
    parameters: &[(String, String)],
    cancel: &CancellationSignal,
    timeout: Option<Duration>,
) -> Result<ProcessRun> {
    let args: Vec<String> = command.args.iter().map(|a| vars.apply(a)).collect();
    debug!("Launching {} {:?}", command.program, args);

    let mut child = Command::new(&command.program)
        .args(&args)
        .envs(parameters.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to launch {}", command.program))?;

    let captured = Arc::new(Mutex::new(Vec::new()));
    let reader = child.stdout.take().map(|stdout| {
        let captured = Arc::clone(&captured);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                captured
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(line);
            }
        })
    });

    let start = Instant::now();
    let outcome = loop {
        if let Some(status) = child
            .try_wait()
            .context("Failed to poll test process")?
        {
            break ProcessOutcome::Exited(status.code());
        }

        if cancel.check() {
            warn!("Stopping {}: run cancelled", command.program);
            break ProcessOutcome::Cancelled;
        }

        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                warn!("Stopping {}: exceeded {}s", command.program, limit.as_secs());
                break ProcessOutcome::TimedOut(limit);
            }
        }

        sleep(PROCESS_POLL_INTERVAL).await;
    };

    if matches!(outcome, ProcessOutcome::Exited(_)) {
        // A process left behind by the launcher may still hold the pipe open
        if let Some(mut reader) = reader {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader).await.is_err() {
                warn!(
                    "Output of {} still open {}s after exit; keeping what was read",
                    command.program,
                    OUTPUT_DRAIN_TIMEOUT.as_secs()
                );
                reader.abort();
            }
        }
    } else {
        if let Err(e) = child.kill().await {
            warn!("Failed to kill {}: {}", command.program, e);
        }
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    let output = std::mem::take(&mut *captured.lock().unwrap_or_else(|e| e.into_inner()));
    Ok(ProcessRun { outcome, output })
}

/// Create `base/<test name>_<timestamp>` for one test run
pub(crate) fn prepare_report_dir(spec: &TestSpec) -> Result<Option<PathBuf>> {
    let Some(base) = spec.report_dir.as_ref() else {
        return Ok(None);
    };

    let leaf = spec
        .path()
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| spec.name.clone());
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let dir = base.join(format!("{leaf}_{stamp}"));

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
    Ok(Some(dir))
}

/// Test parameters as environment variables
pub(crate) fn parameter_env(spec: &TestSpec) -> Vec<(String, String)> {
    spec.parameters
        .iter()
        .map(|p| (format!("{PARAM_ENV_PREFIX}{}", p.name.to_uppercase()), p.value.clone()))
        .collect()
}

/// Run the cleanup command once
pub(crate) fn run_cleanup(command: Option<&CommandConfig>, done: &mut bool) {
    if *done {
        return;
    }
    *done = true;

    let Some(command) = command else {
        return;
    };

    info!("Running cleanup: {}", command.program);
    let mut cleanup = std::process::Command::new(&command.program);
    cleanup.args(&command.args);
    // block_in_place is only allowed on the multi-threaded runtime
    let status = match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| cleanup.status())
        }
        _ => cleanup.status(),
    };
    match status {
        Ok(status) if status.success() => debug!("Cleanup finished"),
        Ok(status) => warn!("Cleanup exited with {}", status),
        Err(e) => warn!("Failed to run cleanup {}: {}", command.program, e),
    }
}

/// Executor running one launcher process per test
pub struct CommandExecutor {
    test_type: TestType,
    command: Option<CommandConfig>,
    cleanup: Option<CommandConfig>,
    test_timeout: Option<Duration>,
    cleaned_up: bool,
}

impl CommandExecutor {
    pub fn new(test_type: TestType, command: Option<CommandConfig>) -> Self {
        Self {
            test_type,
            command,
            cleanup: None,
            test_timeout: None,
            cleaned_up: false,
        }
    }

    pub fn from_config(test_type: TestType, config: &ExecutorConfig) -> Self {
        Self::new(test_type, config.command(test_type).cloned())
            .with_cleanup(config.cleanup.clone())
            .with_timeout(config.test_timeout())
    }

    pub fn gui(config: &ExecutorConfig) -> Box<dyn Executor> {
        Box::new(Self::from_config(TestType::Gui, config))
    }

    pub fn api(config: &ExecutorConfig) -> Box<dyn Executor> {
        Box::new(Self::from_config(TestType::Api, config))
    }

    pub fn load(config: &ExecutorConfig) -> Box<dyn Executor> {
        Box::new(Self::from_config(TestType::Load, config))
    }

    pub fn with_cleanup(mut self, cleanup: Option<CommandConfig>) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.test_timeout = timeout;
        self
    }

    async fn execute(&self, spec: &TestSpec, cancel: &CancellationSignal) -> Result<TestRunResult> {
        let command = self
            .command
            .as_ref()
            .with_context(|| format!("No launcher configured for {} tests", self.test_type))?;
        if spec.path().is_none() {
            anyhow::bail!("{} is not a local test", spec.name);
        }

        let report_dir = prepare_report_dir(spec)?;
        let vars = Placeholders::for_spec(spec, report_dir.as_deref());

        info!("Running {} test: {}", self.test_type, spec.name);
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let run = run_process(command, &vars, &parameter_env(spec), cancel, self.test_timeout).await?;
        let verdict = run.outcome.verdict();

        let mut result = TestRunResult::for_spec(spec)
            .with_state(verdict.state)
            .with_duration(start.elapsed());
        if verdict.warnings {
            result = result.with_warnings();
        }
        if let Some(dir) = report_dir {
            result = result.with_report_location(dir);
        }
        result.started_at = Some(started_at);
        result.output = run.output;
        match verdict.state {
            TestState::Failed => result.failure = verdict.message,
            _ => result.error = verdict.message,
        }
        Ok(result)
    }
}

impl Executor for CommandExecutor {
    fn run<'a>(
        &'a mut self,
        spec: &'a TestSpec,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<TestRunResult>> {
        self.execute(spec, cancel).boxed()
    }

    fn cleanup(&mut self) {
        run_cleanup(self.cleanup.as_ref(), &mut self.cleaned_up);
    }
}
