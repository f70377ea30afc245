//! Test result models
//!
//! Defines per-test run results, the suite aggregate, and the final run
//! verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::{TestSpec, TestState, TestType};

/// Reason recorded on tests that were never started because the run was
/// cancelled.
pub const CANCELLED: &str = "cancelled";

/// Result of a single test execution
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestRunResult {
    pub name: String,
    pub path: String,
    pub group: String,
    pub test_type: Option<TestType>,
    pub state: TestState,
    /// State observed before the latest update
    #[serde(skip)]
    pub prev_state: TestState,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub failure: Option<String>,
    pub skip_reason: Option<String>,
    pub report_location: Option<PathBuf>,
    #[serde(default)]
    pub has_warnings: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub run_id: Option<i64>,
    #[serde(skip)]
    pub prev_run_id: Option<i64>,
    /// Console lines captured while this test was active
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    #[serde(skip)]
    counted: bool,
}

impl TestRunResult {
    /// Start tracking a test by name
    pub fn tracking(name: impl Into<String>, state: TestState) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            state,
            prev_state: state,
            ..Default::default()
        }
    }

    /// Start tracking the test described by `spec`
    pub fn for_spec(spec: &TestSpec) -> Self {
        Self {
            name: spec.name.clone(),
            path: spec.id.to_string(),
            group: spec.group.clone(),
            test_type: spec.test_type,
            ..Default::default()
        }
    }

    pub fn passed(spec: &TestSpec, duration: Duration) -> Self {
        Self::for_spec(spec).with_state(TestState::Passed).with_duration(duration)
    }

    pub fn failed(spec: &TestSpec, duration: Duration, failure: impl Into<String>) -> Self {
        let mut result = Self::for_spec(spec)
            .with_state(TestState::Failed)
            .with_duration(duration);
        result.failure = Some(failure.into());
        result
    }

    pub fn error(spec: &TestSpec, error: impl Into<String>) -> Self {
        let mut result = Self::for_spec(spec).with_state(TestState::Error);
        result.error = Some(error.into());
        result
    }

    /// A test that was skipped because the run was cancelled
    pub fn cancelled(spec: &TestSpec) -> Self {
        let mut result = Self::for_spec(spec).with_state(TestState::NoRun);
        result.skip_reason = Some(CANCELLED.to_string());
        result
    }

    pub fn with_state(mut self, state: TestState) -> Self {
        self.prev_state = self.state;
        self.state = state;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_warnings(mut self) -> Self {
        self.has_warnings = true;
        self
    }

    pub fn with_report_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.report_location = Some(location.into());
        self
    }

    /// Record a newly observed state, keeping the previous one for
    /// transition detection. Returns whether the state changed.
    pub fn observe(&mut self, state: TestState) -> bool {
        self.prev_state = self.state;
        self.state = state;
        self.prev_state != self.state
    }

    pub fn is_counted(&self) -> bool {
        self.counted
    }

    /// Most relevant message for display
    pub fn message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.failure.as_deref())
            .or(self.skip_reason.as_deref())
    }
}

impl fmt::Display for TestRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}ms]",
            self.state.symbol(),
            self.state,
            self.name,
            self.duration_ms
        )?;
        if let Some(msg) = self.message() {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Aggregate of one orchestration unit (a local run or a remote collection)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub results: Vec<TestRunResult>,
    pub num_tests: usize,
    pub num_passed: usize,
    pub num_failures: usize,
    pub num_errors: usize,
    pub num_skipped: usize,
    pub total_runtime_ms: u64,
    #[serde(default)]
    finalized: bool,
}

impl SuiteResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Vec::new(),
            num_tests: 0,
            num_passed: 0,
            num_failures: 0,
            num_errors: 0,
            num_skipped: 0,
            total_runtime_ms: 0,
            finalized: false,
        }
    }

    /// Start tracking a result; returns its index
    pub fn track(&mut self, result: TestRunResult) -> usize {
        self.results.push(result);
        self.results.len() - 1
    }

    /// Track a result that is already terminal and count it
    pub fn record(&mut self, result: TestRunResult) -> usize {
        let index = self.track(result);
        self.commit(index);
        index
    }

    /// Count the result at `index` if it has reached a terminal state and
    /// was not counted before. Returns whether the counters changed.
    pub fn commit(&mut self, index: usize) -> bool {
        let Some(result) = self.results.get_mut(index) else {
            return false;
        };
        if result.counted {
            return false;
        }

        match result.state {
            TestState::Passed | TestState::Warning => self.num_passed += 1,
            TestState::Failed => self.num_failures += 1,
            TestState::Error => self.num_errors += 1,
            TestState::NoRun => self.num_skipped += 1,
            TestState::Waiting | TestState::Running | TestState::Unknown => return false,
        }

        result.counted = true;
        self.num_tests += 1;
        true
    }

    /// Commit the total runtime. Only the first call has an effect.
    pub fn finalize(&mut self, runtime: Duration) -> bool {
        if self.finalized {
            return false;
        }
        self.total_runtime_ms = runtime.as_millis() as u64;
        self.finalized = true;
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn has_failures(&self) -> bool {
        self.num_failures > 0 || self.num_errors > 0
    }

    pub fn pass_rate(&self) -> f64 {
        if self.num_tests == 0 {
            0.0
        } else {
            (self.num_passed as f64 / self.num_tests as f64) * 100.0
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.results.iter().position(|r| r.name == name)
    }
}

impl fmt::Display for SuiteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suite {}", self.name)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {}",
            self.num_tests, self.num_passed, self.num_failures, self.num_errors, self.num_skipped
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_runtime_ms
        )
    }
}

/// Final verdict of a run, reported as the process exit code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failed,
    Aborted,
    ConnectionFailed,
}

impl ExitStatus {
    /// Decide the verdict from the finished suites.
    ///
    /// An aborted run is `Aborted` whatever its results; otherwise any
    /// failure, error, or unresolved unit makes the run `Failed`.
    pub fn decide(suites: &[SuiteResult], aborted: bool, unresolved: usize) -> Self {
        if aborted {
            ExitStatus::Aborted
        } else if unresolved > 0 || suites.iter().any(SuiteResult::has_failures) {
            ExitStatus::Failed
        } else {
            ExitStatus::Success
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failed => 1,
            ExitStatus::Aborted => 2,
            ExitStatus::ConnectionFailed => 3,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "SUCCESS"),
            ExitStatus::Failed => write!(f, "FAILED"),
            ExitStatus::Aborted => write!(f, "ABORTED"),
            ExitStatus::ConnectionFailed => write!(f, "CONNECTION FAILED"),
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> TestSpec {
        TestSpec::with_type(name, "group", Some(TestType::Api))
    }

    #[test]
    fn test_commit_counts_once() {
        let mut suite = SuiteResult::new("suite");
        let index = suite.track(TestRunResult::tracking("t1", TestState::Waiting));

        assert!(!suite.commit(index));
        assert_eq!(suite.num_tests, 0);

        suite.results[index].observe(TestState::Failed);
        assert!(suite.commit(index));
        assert!(!suite.commit(index));

        suite.results[index].observe(TestState::Failed);
        assert!(!suite.commit(index));
        assert_eq!(suite.num_tests, 1);
        assert_eq!(suite.num_failures, 1);
    }

    #[test]
    fn test_record_buckets() {
        let mut suite = SuiteResult::new("suite");
        suite.record(TestRunResult::passed(&spec("a"), Duration::from_millis(5)));
        suite.record(TestRunResult::passed(&spec("b"), Duration::ZERO).with_state(TestState::Warning));
        suite.record(TestRunResult::failed(&spec("c"), Duration::ZERO, "assert"));
        suite.record(TestRunResult::error(&spec("d"), "boom"));
        suite.record(TestRunResult::cancelled(&spec("e")));

        assert_eq!(suite.num_tests, 5);
        assert_eq!(suite.num_passed, 2);
        assert_eq!(suite.num_failures, 1);
        assert_eq!(suite.num_errors, 1);
        assert_eq!(suite.num_skipped, 1);
        assert!(suite.has_failures());
    }

    #[test]
    fn test_finalize_once() {
        let mut suite = SuiteResult::new("suite");
        assert!(suite.finalize(Duration::from_millis(30)));
        assert!(!suite.finalize(Duration::from_millis(90)));
        assert_eq!(suite.total_runtime_ms, 30);
        assert!(suite.is_finalized());
    }

    #[test]
    fn test_observe_tracks_previous_state() {
        let mut result = TestRunResult::tracking("t", TestState::Waiting);
        assert!(!result.observe(TestState::Waiting));
        assert!(result.observe(TestState::Running));
        assert_eq!(result.prev_state, TestState::Waiting);
        assert!(!result.observe(TestState::Running));
        assert_eq!(result.prev_state, TestState::Running);
    }

    #[test]
    fn test_exit_status() {
        let mut ok = SuiteResult::new("ok");
        ok.record(TestRunResult::passed(&spec("a"), Duration::ZERO));
        let mut bad = SuiteResult::new("bad");
        bad.record(TestRunResult::error(&spec("b"), "boom"));

        assert_eq!(ExitStatus::decide(&[ok.clone()], false, 0), ExitStatus::Success);
        assert_eq!(ExitStatus::decide(&[ok.clone()], false, 1), ExitStatus::Failed);
        assert_eq!(ExitStatus::decide(&[ok.clone(), bad.clone()], false, 0), ExitStatus::Failed);
        assert_eq!(ExitStatus::decide(&[ok, bad], true, 0), ExitStatus::Aborted);
        assert_eq!(ExitStatus::ConnectionFailed.code(), 3);
    }

    #[test]
    fn test_cancelled_result() {
        let result = TestRunResult::cancelled(&spec("x"));
        assert_eq!(result.state, TestState::NoRun);
        assert_eq!(result.skip_reason.as_deref(), Some(CANCELLED));
    }
}
