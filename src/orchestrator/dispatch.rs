//! Sequential dispatch of local tests
//!
//! Runs every spec of a catalog through the executor for its test type,
//! classifies the outcome and keeps the suite and the incremental report
//! current after each test.

use futures::FutureExt;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{panic_message, persist_result, persist_suite, RunOutcome};
use crate::cancel::CancellationSignal;
use crate::executor::{Executor, ExecutorRegistry};
use crate::models::{SuiteResult, TestRunResult, TestSpec, TestState, TestType};
use crate::results::ReportStore;
use crate::utils::Timer;

const CANCELLED_MESSAGE: &str = "Run was cancelled by user or the timeout expired";
const PROCESS_FAILURE_MESSAGE: &str = "External process failure";
const UNKNOWN_TYPE_MESSAGE: &str = "Unknown test type";

/// Runs local tests one after the other
pub struct DispatchOrchestrator {
    registry: ExecutorRegistry,
    executors: BTreeMap<TestType, Box<dyn Executor>>,
    cancel: Arc<CancellationSignal>,
    cancel_on_failure: bool,
    parallel_enabled: bool,
    skip_remaining: bool,
    report: Option<ReportStore>,
    suite_name: String,
}

impl DispatchOrchestrator {
    pub fn new(registry: ExecutorRegistry, cancel: Arc<CancellationSignal>) -> Self {
        Self {
            registry,
            executors: BTreeMap::new(),
            cancel,
            cancel_on_failure: false,
            parallel_enabled: false,
            skip_remaining: false,
            report: None,
            suite_name: "local".to_string(),
        }
    }

    /// Skip the remaining tests after the first failure or error
    pub fn with_cancel_on_failure(mut self, enabled: bool) -> Self {
        self.cancel_on_failure = enabled;
        self
    }

    /// Route GUI tests to the parallel executor
    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel_enabled = enabled;
        self
    }

    pub fn with_report(mut self, report: Option<ReportStore>) -> Self {
        self.report = report;
        self
    }

    /// Run all specs in order.
    ///
    /// Executors are cleaned up and the suite is finalized on every path out
    /// of the loop, including a panic inside it.
    pub async fn run(&mut self, specs: &[TestSpec]) -> RunOutcome {
        let mut suite = SuiteResult::new(self.suite_name.clone());
        let timer = Timer::start("dispatch loop");

        let dispatched = AssertUnwindSafe(self.dispatch_all(specs, &mut suite))
            .catch_unwind()
            .await;
        if let Err(payload) = dispatched {
            error!("Dispatch loop aborted: {}", panic_message(&*payload));
        }

        self.cleanup_executors();
        suite.finalize(timer.stop());
        persist_suite(self.report.as_ref(), &suite);

        RunOutcome {
            suites: vec![suite],
            aborted: self.cancel.reason(),
            ..Default::default()
        }
    }

    async fn dispatch_all(&mut self, specs: &[TestSpec], suite: &mut SuiteResult) {
        let total = specs.len();
        for (position, spec) in specs.iter().enumerate() {
            if self.skip_remaining || self.cancel.check() {
                self.skip_remaining = true;
                debug!("Skipping {}", spec.name);
                let index = suite.record(TestRunResult::cancelled(spec));
                persist_result(self.report.as_ref(), suite, index);
                continue;
            }

            info!("Test {}/{}: {}", position + 1, total, spec.name);
            let result = self.dispatch_one(spec).await;
            let result = self.classify(result);
            log_result(&result);

            let failed = result.state.is_failure();
            let index = suite.record(result);
            persist_result(self.report.as_ref(), suite, index);

            if failed && self.cancel_on_failure && !self.skip_remaining {
                warn!("{} did not pass, skipping the remaining tests", spec.name);
                self.skip_remaining = true;
            }
        }
    }

    fn route(&self, spec: &TestSpec) -> Option<TestType> {
        match spec.test_type? {
            TestType::Gui if self.parallel_enabled => Some(TestType::Parallel),
            TestType::Api if self.parallel_enabled => {
                info!(
                    "Parallel runs are not supported for API tests, running {} as a regular API test",
                    spec.name
                );
                Some(TestType::Api)
            }
            test_type => Some(test_type),
        }
    }

    async fn dispatch_one(&mut self, spec: &TestSpec) -> TestRunResult {
        let Some(test_type) = self.route(spec) else {
            return TestRunResult::error(spec, UNKNOWN_TYPE_MESSAGE);
        };

        let executor = match self.executors.entry(test_type) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match self.registry.create(test_type) {
                Some(executor) => {
                    debug!("Created {} executor", test_type.name());
                    entry.insert(executor)
                }
                None => {
                    return TestRunResult::error(
                        spec,
                        format!("No executor registered for {} tests", test_type.name()),
                    )
                }
            },
        };

        match AssertUnwindSafe(executor.run(spec, &self.cancel))
            .catch_unwind()
            .await
        {
            Ok(Ok(mut result)) => {
                result.test_type.get_or_insert(test_type);
                result
            }
            Ok(Err(e)) => {
                error!("Executor failed for {}: {:#}", spec.name, e);
                TestRunResult::error(spec, format!("{e:#}"))
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("Executor panicked for {}: {}", spec.name, message);
                TestRunResult::error(spec, message)
            }
        }
    }

    fn classify(&self, mut result: TestRunResult) -> TestRunResult {
        if !result.state.is_terminal() && result.state != TestState::Warning {
            error!("{} ended in non-terminal state {}", result.name, result.state);
            result.error = Some(format!("Executor returned non-terminal state {}", result.state));
            result.state = TestState::Error;
        }

        if result.state == TestState::Error
            && result.error.as_deref().map_or(true, |m| m.trim().is_empty())
        {
            let message = if self.cancel.check() {
                CANCELLED_MESSAGE
            } else {
                PROCESS_FAILURE_MESSAGE
            };
            result.error = Some(message.to_string());
            result.report_location = None;
        }

        if result.state == TestState::Passed && result.has_warnings {
            result = result.with_state(TestState::Warning);
        }
        result
    }

    /// Clean up each created executor once; a failing cleanup does not
    /// prevent the others.
    fn cleanup_executors(&mut self) {
        for (test_type, mut executor) in std::mem::take(&mut self.executors) {
            debug!("Cleaning up {} executor", test_type.name());
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| executor.cleanup())) {
                error!(
                    "Cleanup of {} executor failed: {}",
                    test_type.name(),
                    panic_message(&*payload)
                );
            }
        }
    }
}

fn log_result(result: &TestRunResult) {
    match result.state {
        TestState::Passed | TestState::Warning => {
            info!("{} {} ({}ms)", result.state.symbol(), result.name, result.duration_ms)
        }
        _ => warn!(
            "{} {}: {}",
            result.state.symbol(),
            result.name,
            result.message().unwrap_or(result.state.as_str())
        ),
    }
}
