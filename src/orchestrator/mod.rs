//! Run orchestration
//!
//! Drives local tests through their executors and remote collections
//! through a backend, and folds everything into suites and a verdict.

mod dispatch;
mod remote;

pub use dispatch::DispatchOrchestrator;
pub use remote::{RemoteSetOrchestrator, RemoteSettings};

use std::any::Any;
use thiserror::Error;
use tracing::warn;

use crate::cancel::CancelReason;
use crate::models::{ExitStatus, SuiteResult};
use crate::results::ReportStore;

/// Orchestration errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to connect to {server}: {message}")]
    Connection { server: String, message: String },

    #[error("Collection not found: {0}")]
    Resolution(String),

    #[error("Remote backend error: {0}")]
    Backend(String),

    #[error("Failed to update report {path}: {message}")]
    Report { path: String, message: String },
}

impl RunError {
    pub(crate) fn backend(err: anyhow::Error) -> Self {
        RunError::Backend(format!("{err:#}"))
    }
}

/// Everything a finished run produced
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub suites: Vec<SuiteResult>,
    /// Units that could not be resolved and never ran
    pub unresolved: Vec<String>,
    pub aborted: Option<CancelReason>,
    pub connection_failed: bool,
}

impl RunOutcome {
    pub fn status(&self) -> ExitStatus {
        if self.connection_failed {
            return ExitStatus::ConnectionFailed;
        }
        ExitStatus::decide(&self.suites, self.aborted.is_some(), self.unresolved.len())
    }
}

/// Report writes never stop a run
fn persist_result(report: Option<&ReportStore>, suite: &SuiteResult, index: usize) {
    let Some(store) = report else { return };
    if let Err(e) = store.record(suite, index) {
        warn!(
            "{}",
            RunError::Report {
                path: store.path().display().to_string(),
                message: format!("{e:#}"),
            }
        );
    }
}

fn persist_suite(report: Option<&ReportStore>, suite: &SuiteResult) {
    let Some(store) = report else { return };
    if let Err(e) = store.record_suite(suite) {
        warn!(
            "{}",
            RunError::Report {
                path: store.path().display().to_string(),
                message: format!("{e:#}"),
            }
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestRunResult, TestSpec, TestType};
    use std::time::Duration;

    fn suite(failed: bool) -> SuiteResult {
        let spec = TestSpec::with_type("t", "g", Some(TestType::Api));
        let mut suite = SuiteResult::new("s");
        if failed {
            suite.record(TestRunResult::failed(&spec, Duration::ZERO, "x"));
        } else {
            suite.record(TestRunResult::passed(&spec, Duration::ZERO));
        }
        suite
    }

    #[test]
    fn test_outcome_status() {
        let mut outcome = RunOutcome {
            suites: vec![suite(false)],
            ..Default::default()
        };
        assert_eq!(outcome.status(), ExitStatus::Success);

        outcome.unresolved.push("Root\\Missing".into());
        assert_eq!(outcome.status(), ExitStatus::Failed);

        outcome.aborted = Some(CancelReason::Timeout);
        assert_eq!(outcome.status(), ExitStatus::Aborted);

        outcome.connection_failed = true;
        assert_eq!(outcome.status(), ExitStatus::ConnectionFailed);
    }

    #[test]
    fn test_failed_suite_fails_run() {
        let outcome = RunOutcome {
            suites: vec![suite(false), suite(true)],
            ..Default::default()
        };
        assert_eq!(outcome.status(), ExitStatus::Failed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "executor panicked");
    }
}
