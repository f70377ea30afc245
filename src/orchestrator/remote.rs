//! Remote collection runs
//!
//! Starts each collection on the test-management server and follows it by
//! polling until the server reports completion, the run is cancelled, or the
//! timeout budget runs out.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{persist_result, persist_suite, RunError, RunOutcome};
use crate::cancel::{CancelReason, CancellationSignal};
use crate::models::{SuiteResult, TestRunResult, TestState};
use crate::remote::{
    run_link, CollectionPath, Credentials, ExecutionHandle, RemoteBackend, RemoteFilter, RunMode,
    StatusEntry,
};
use crate::results::ReportStore;
use crate::utils::{format_duration, Timer};

const DID_NOT_COMPLETE: &str = "did not complete";
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection and selection settings for a remote run
#[derive(Clone, Debug)]
pub struct RemoteSettings {
    pub server: String,
    pub credentials: Credentials,
    pub run_mode: RunMode,
    pub filter: RemoteFilter,
    pub poll_interval: Duration,
}

/// A logged state change of a remote test
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub test_id: String,
    pub name: String,
    pub from: TestState,
    pub to: TestState,
    pub message: String,
}

struct ActiveTest {
    index: usize,
    test_id: String,
}

/// One started collection
struct CollectionRun {
    execution: ExecutionHandle,
    group: String,
    suite: SuiteResult,
    ids: HashMap<String, usize>,
}

/// Runs remote collections one after the other
pub struct RemoteSetOrchestrator<B> {
    backend: B,
    settings: RemoteSettings,
    cancel: Arc<CancellationSignal>,
    report: Option<ReportStore>,
    active: Option<ActiveTest>,
    transitions: Vec<Transition>,
}

impl<B: RemoteBackend> RemoteSetOrchestrator<B> {
    pub fn new(backend: B, settings: RemoteSettings, cancel: Arc<CancellationSignal>) -> Self {
        Self {
            backend,
            settings,
            cancel,
            report: None,
            active: None,
            transitions: Vec::new(),
        }
    }

    pub fn with_report(mut self, report: Option<ReportStore>) -> Self {
        self.report = report;
        self
    }

    /// Logged transitions in the order they were observed
    #[cfg(test)]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn run(&mut self, collections: &[String]) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        info!("Connecting to {}", self.settings.server);
        let connected = self
            .backend
            .connect(&self.settings.server, &self.settings.credentials)
            .await;
        let failure = match connected {
            Ok(true) => None,
            Ok(false) => Some("sign-in was rejected".to_string()),
            Err(e) => Some(format!("{e:#}")),
        };
        if let Some(message) = failure {
            error!(
                "{}",
                RunError::Connection {
                    server: self.settings.server.clone(),
                    message,
                }
            );
            outcome.connection_failed = true;
            return outcome;
        }

        for raw in collections {
            if self.cancel.check() {
                break;
            }
            match self.run_collection(raw).await {
                Ok(Some(suite)) => outcome.suites.push(suite),
                Ok(None) => {}
                Err(e) => {
                    error!("{}", e);
                    outcome.unresolved.push(raw.clone());
                }
            }
        }

        for t in &self.transitions {
            debug!(
                "Journal: {} ({}) {} -> {} {}",
                t.name, t.test_id, t.from, t.to, t.message
            );
        }

        if let Err(e) = self.backend.disconnect().await {
            warn!("Failed to disconnect from {}: {:#}", self.settings.server, e);
        }

        outcome.aborted = self.cancel.reason();
        outcome
    }

    async fn run_collection(&mut self, raw: &str) -> Result<Option<SuiteResult>, RunError> {
        let path = CollectionPath::parse(raw)
            .map_err(|e| RunError::Resolution(format!("{raw} ({e:#})")))?;
        let collection = self
            .backend
            .resolve_collection(&path)
            .await
            .map_err(RunError::backend)?
            .ok_or_else(|| RunError::Resolution(path.to_string()))?;

        let listed = self
            .backend
            .list_tests(&collection)
            .await
            .map_err(RunError::backend)?;
        let total = listed.len();
        let tests = self.settings.filter.apply(listed);
        if tests.is_empty() {
            info!("No tests to run in {} ({} listed before filtering)", path, total);
            return Ok(None);
        }

        info!(
            "Starting {} with {} tests, run mode: {}",
            path,
            tests.len(),
            self.settings.run_mode
        );
        let execution = self
            .backend
            .start(
                &collection,
                &tests,
                &self.settings.run_mode,
                &path.parameters,
            )
            .await
            .map_err(RunError::backend)?;

        let group = path.group();
        let mut run = CollectionRun {
            execution,
            group: group.clone(),
            suite: SuiteResult::new(path.to_string()),
            ids: HashMap::new(),
        };
        for test in &tests {
            let mut result = TestRunResult::tracking(&test.name, TestState::Waiting);
            result.group = group.clone();
            let index = run.suite.track(result);
            run.ids.insert(test.id.clone(), index);
        }

        let timer = Timer::start(format!("collection {path}"));
        self.active = None;
        if self.poll(&mut run).await {
            warn!("Execution of {} was aborted", path);
        }
        self.finish(&mut run, timer.stop()).await;

        Ok(Some(run.suite))
    }

    /// Returns true when the run was aborted
    async fn poll(&mut self, run: &mut CollectionRun) -> bool {
        loop {
            match self.backend.refresh_status(&run.execution).await {
                Ok(report) => {
                    for entry in &report.entries {
                        if self.observe(run, entry).await {
                            self.request_stop(&run.execution).await;
                            return true;
                        }
                    }
                    if report.finished {
                        return false;
                    }
                }
                Err(e) => warn!("Failed to refresh status of {}: {:#}", run.suite.name, e),
            }

            tokio::time::sleep(self.settings.poll_interval).await;

            if self.cancel.check() {
                match self.cancel.reason() {
                    Some(CancelReason::Timeout) => warn!(
                        "Timeout after {}, stopping {}",
                        format_duration(self.cancel.elapsed()),
                        run.suite.name
                    ),
                    _ => info!("Stop requested, stopping {}", run.suite.name),
                }
                self.request_stop(&run.execution).await;
                return true;
            }
        }
    }

    /// Apply one status entry; returns true when the run must stop
    async fn observe(&mut self, run: &mut CollectionRun, entry: &StatusEntry) -> bool {
        let index = match run.ids.get(&entry.test_id) {
            Some(&index) => index,
            None => {
                let mut result = TestRunResult::tracking(&entry.test_id, TestState::Waiting);
                result.group = run.group.clone();
                let index = run.suite.track(result);
                run.ids.insert(entry.test_id.clone(), index);
                index
            }
        };

        let state = TestState::from_remote_status(&entry.status);
        if !run.suite.results[index].observe(state) {
            return false;
        }
        let from = run.suite.results[index].prev_state;

        if state == TestState::Running {
            self.on_started(run, index, &entry.test_id).await;
        }

        if state != TestState::Waiting {
            let name = run.suite.results[index].name.clone();
            if entry.message.is_empty() {
                info!("Test: {}, Id: {}, Status: {}", name, entry.test_id, state);
            } else {
                info!(
                    "Test: {}, Id: {}, Status: {}, Message: {}",
                    name, entry.test_id, state, entry.message
                );
            }
            self.transitions.push(Transition {
                test_id: entry.test_id.clone(),
                name,
                from,
                to: state,
                message: entry.message.clone(),
            });
        }

        if state.is_terminal() {
            self.on_finished(run, index, entry);
        }

        if self.cancel.check_sentinel() {
            info!("Stop requested, stopping {}", run.suite.name);
            return true;
        }
        false
    }

    async fn on_started(&mut self, run: &mut CollectionRun, index: usize, test_id: &str) {
        let result = &mut run.suite.results[index];
        if result.started_at.is_none() {
            result.started_at = Some(Utc::now());
        }

        match self.backend.run_details(test_id).await {
            Ok(details) => run.suite.results[index].prev_run_id = details.run_id,
            Err(e) => warn!("Failed to fetch run details for {}: {:#}", test_id, e),
        }

        if self.active.as_ref().is_some_and(|active| active.index != index) {
            self.write_summary(run).await;
        }
        self.active = Some(ActiveTest {
            index,
            test_id: test_id.to_string(),
        });

        let result = &mut run.suite.results[index];
        result.group = run.group.clone();
        info!("Running test: {}, Test id: {}", result.name, test_id);
    }

    fn on_finished(&self, run: &mut CollectionRun, index: usize, entry: &StatusEntry) {
        let result = &mut run.suite.results[index];
        if let Some(started) = result.started_at {
            result.duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        }

        let message = Some(entry.message.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        match result.state {
            TestState::Failed => {
                result.failure = Some(message.unwrap_or_else(|| "Test failed".to_string()))
            }
            TestState::Error => {
                result.error = Some(message.unwrap_or_else(|| "Test run ended in error".to_string()))
            }
            TestState::NoRun => {
                result.skip_reason = Some(message.unwrap_or_else(|| "No Run".to_string()))
            }
            _ => {}
        }

        if run.suite.commit(index) {
            persist_result(self.report.as_ref(), &run.suite, index);
        }
    }

    /// Print the run summary of the active test and release it
    async fn write_summary(&mut self, run: &mut CollectionRun) {
        let Some(active) = self.active.take() else {
            return;
        };
        let details = match self.backend.run_details(&active.test_id).await {
            Ok(details) => details,
            Err(e) => {
                warn!("Failed to fetch run details for {}: {:#}", active.test_id, e);
                Default::default()
            }
        };

        let result = &mut run.suite.results[active.index];
        let mut lines = Vec::new();
        if let Some(run_id) = details.run_id.filter(|&id| Some(id) > result.prev_run_id) {
            let failed = details.failed_steps();
            let detail = if failed.is_empty() && result.state != TestState::Error {
                details.log.clone().unwrap_or_default()
            } else {
                failed
            };
            if !detail.trim().is_empty() {
                lines.push(detail);
            }
            if let Some(secs) = details.duration_secs {
                lines.push(format!("Duration: {}", format_duration(Duration::from_secs(secs))));
            }
            let credentials = &self.settings.credentials;
            lines.push(format!(
                "Link: {}",
                run_link(
                    &self.settings.server,
                    &credentials.domain,
                    &credentials.project,
                    run_id
                )
            ));
            result.run_id = Some(run_id);
        }
        lines.push(match result.run_id {
            Some(run_id) => format!("Test complete: {}, Run ID: {}", result.name, run_id),
            None => format!("Test complete: {}", result.name),
        });

        for line in lines {
            info!("{}", line);
            result.output.push(line);
        }
    }

    /// Close out a collection: the last summary, tests that never finished,
    /// and the suite totals
    async fn finish(&mut self, run: &mut CollectionRun, runtime: Duration) {
        self.write_summary(run).await;

        for index in 0..run.suite.results.len() {
            let result = &mut run.suite.results[index];
            if !result.state.is_terminal() {
                debug!("{} did not complete ({})", result.name, result.state);
                result.observe(TestState::NoRun);
                result.skip_reason = Some(DID_NOT_COMPLETE.to_string());
            }
            if run.suite.commit(index) {
                persist_result(self.report.as_ref(), &run.suite, index);
            }
        }

        run.suite.finalize(runtime);
        persist_suite(self.report.as_ref(), &run.suite);
    }

    async fn request_stop(&self, execution: &ExecutionHandle) {
        match tokio::time::timeout(STOP_TIMEOUT, self.backend.stop(execution)).await {
            Ok(Ok(())) => debug!("Stop requested for execution {}", execution.id),
            Ok(Err(e)) => warn!("Failed to stop execution {}: {:#}", execution.id, e),
            Err(_) => warn!("Stop request for execution {} timed out", execution.id),
        }
    }
}
