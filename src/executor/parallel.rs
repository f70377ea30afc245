//! Parallel test execution
//!
//! Runs one GUI test against several environments concurrently and folds
//! the per-environment outcomes into a single result.

use anyhow::{Context, Result};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::command::{
    parameter_env, prepare_report_dir, run_cleanup, run_process, Placeholders, Verdict,
};
use super::Executor;
use crate::cancel::CancellationSignal;
use crate::config::{CommandConfig, ExecutorConfig};
use crate::models::{TestRunResult, TestSpec, TestState, TestType};

/// Parallel test executor
pub struct ParallelExecutor {
    command: Option<CommandConfig>,
    environments: Vec<String>,
    max_concurrent: usize,
    test_timeout: Option<Duration>,
    cleanup: Option<CommandConfig>,
    cleaned_up: bool,
}

impl ParallelExecutor {
    pub fn new(command: Option<CommandConfig>, environments: Vec<String>) -> Self {
        Self {
            command,
            environments,
            max_concurrent: 4,
            test_timeout: None,
            cleanup: None,
            cleaned_up: false,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.command(TestType::Parallel).cloned(),
            config.parallel.environments.clone(),
        )
        .with_max_concurrent(config.parallel.max_concurrent)
        .with_timeout(config.test_timeout())
        .with_cleanup(config.cleanup.clone())
    }

    pub fn boxed(config: &ExecutorConfig) -> Box<dyn Executor> {
        Box::new(Self::from_config(config))
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn with_cleanup(mut self, cleanup: Option<CommandConfig>) -> Self {
        self.cleanup = cleanup;
        self
    }

    async fn execute(&self, spec: &TestSpec, cancel: &CancellationSignal) -> Result<TestRunResult> {
        let command = self
            .command
            .as_ref()
            .context("No launcher configured for GUI tests")?;
        if self.environments.is_empty() {
            anyhow::bail!("No parallel environments configured");
        }

        let report_dir = prepare_report_dir(spec)?;
        let parameters = parameter_env(spec);

        info!(
            "Running {} across {} environments (max {} concurrent)",
            spec.name,
            self.environments.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let runs = self.environments.iter().map(|env| {
            let semaphore = Arc::clone(&semaphore);
            let mut vars = Placeholders::for_spec(spec, report_dir.as_deref());
            vars.env = env.clone();
            if let Some(dir) = report_dir.as_ref() {
                vars.report = dir.join(env).display().to_string();
            }
            let parameters = &parameters;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .context("Parallel executor semaphore closed")?;
                debug!("Starting {} on {}", spec.name, env);
                run_process(command, &vars, parameters, cancel, self.test_timeout).await
            }
        });

        let outcomes: Vec<(String, Verdict, Vec<String>)> = join_all(runs)
            .await
            .into_iter()
            .zip(&self.environments)
            .map(|(run, env)| match run {
                Ok(run) => (env.clone(), run.outcome.verdict(), run.output),
                Err(e) => (
                    env.clone(),
                    Verdict {
                        state: TestState::Error,
                        warnings: false,
                        message: Some(format!("{e:#}")),
                    },
                    Vec::new(),
                ),
            })
            .collect();

        let mut result = aggregate(spec, &outcomes).with_duration(start.elapsed());
        result.started_at = Some(started_at);
        result.report_location = report_dir;
        Ok(result)
    }
}

/// Severity used to pick the overall state; higher wins
fn severity(verdict: &Verdict) -> u8 {
    match (verdict.state, verdict.warnings) {
        (TestState::Error, _) => 3,
        (TestState::Failed, _) => 2,
        (TestState::Passed, true) | (TestState::Warning, _) => 1,
        _ => 0,
    }
}

/// Worst outcome wins; messages are joined in environment order
fn aggregate(spec: &TestSpec, outcomes: &[(String, Verdict, Vec<String>)]) -> TestRunResult {
    let worst = outcomes
        .iter()
        .map(|(_, verdict, _)| severity(verdict))
        .max()
        .unwrap_or(0);

    let state = match worst {
        3 => TestState::Error,
        2 => TestState::Failed,
        _ => TestState::Passed,
    };

    let messages: Vec<String> = outcomes
        .iter()
        .filter_map(|(env, verdict, _)| verdict.message.as_ref().map(|m| format!("[{env}] {m}")))
        .collect();
    let message = (!messages.is_empty()).then(|| messages.join("; "));

    let mut result = TestRunResult::for_spec(spec)
        .with_state(state);
    result.test_type = Some(TestType::Parallel);
    result.has_warnings = worst == 1;
    result.output = outcomes
        .iter()
        .flat_map(|(env, _, lines)| lines.iter().map(move |line| format!("[{env}] {line}")))
        .collect();
    match state {
        TestState::Failed => result.failure = message,
        TestState::Error => result.error = message,
        _ => {}
    }
    result
}

impl Executor for ParallelExecutor {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MonotonicClock;

    fn verdict(state: TestState, warnings: bool, message: Option<&str>) -> Verdict {
        Verdict {
            state,
            warnings,
            message: message.map(String::from),
        }
    }

    fn spec() -> TestSpec {
        TestSpec::with_type("/tests/Login", "g", Some(TestType::Gui))
    }

    #[test]
    fn test_executor_creation() {
        let executor = ParallelExecutor::new(None, vec!["chrome".into()]).with_max_concurrent(0);
        assert_eq!(executor.max_concurrent, 1);
    }

    #[test]
    fn test_worst_state_wins() {
        let outcomes = vec![
            ("chrome".to_string(), verdict(TestState::Passed, false, None), vec![]),
            ("firefox".to_string(), verdict(TestState::Failed, false, Some("step 3")), vec![]),
            ("edge".to_string(), verdict(TestState::Passed, true, None), vec![]),
        ];
        let result = aggregate(&spec(), &outcomes);
        assert_eq!(result.state, TestState::Failed);
        assert_eq!(result.failure.as_deref(), Some("[firefox] step 3"));
        assert!(!result.has_warnings);
    }

    #[test]
    fn test_error_beats_failure_and_messages_keep_order() {
        let outcomes = vec![
            ("a".to_string(), verdict(TestState::Failed, false, Some("f")), vec![]),
            ("b".to_string(), verdict(TestState::Error, false, Some("e")), vec![]),
        ];
        let result = aggregate(&spec(), &outcomes);
        assert_eq!(result.state, TestState::Error);
        assert_eq!(result.error.as_deref(), Some("[a] f; [b] e"));
    }

    #[test]
    fn test_warning_only() {
        let outcomes = vec![
            ("a".to_string(), verdict(TestState::Passed, true, None), vec!["ok".to_string()]),
            ("b".to_string(), verdict(TestState::Passed, false, None), vec![]),
        ];
        let result = aggregate(&spec(), &outcomes);
        assert_eq!(result.state, TestState::Passed);
        assert!(result.has_warnings);
        assert_eq!(result.output, vec!["[a] ok".to_string()]);
    }

    #[tokio::test]
    async fn test_runs_each_environment() {
        let command = CommandConfig::new("sh").with_args(["-c", "echo {env}; test {env} != bad"]);
        let mut executor = ParallelExecutor::new(
            Some(command),
            vec!["good".into(), "bad".into(), "fine".into()],
        )
        .with_max_concurrent(2);
        let cancel = CancellationSignal::new(MonotonicClock::shared());

        let result = executor.run(&spec(), &cancel).await.unwrap();
        assert_eq!(result.state, TestState::Failed);
        assert_eq!(result.output, vec!["[good] good", "[bad] bad", "[fine] fine"]);
        assert!(result.failure.unwrap().starts_with("[bad]"));
    }

    #[tokio::test]
    async fn test_requires_environments() {
        let mut executor = ParallelExecutor::new(Some(CommandConfig::new("true")), Vec::new());
        let cancel = CancellationSignal::new(MonotonicClock::shared());
        assert!(executor.run(&spec(), &cancel).await.is_err());
    }
}
