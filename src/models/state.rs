//! Test state model
//!
//! Defines the lifecycle states of a single test and the mapping from raw
//! remote backend status strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a single test
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    NoRun,
    Waiting,
    Running,
    Passed,
    Failed,
    Error,
    Warning,
    #[default]
    Unknown,
}

/// Raw backend status strings and the state each one maps to.
///
/// Several strings map to `Passed`; different backend versions report
/// different spellings and all of them must keep working.
const REMOTE_STATUS_TABLE: &[(&str, TestState)] = &[
    ("Waiting", TestState::Waiting),
    ("Error", TestState::Error),
    ("No Run", TestState::NoRun),
    ("Running", TestState::Running),
    ("Connecting", TestState::Running),
    ("Success", TestState::Passed),
    ("Finished", TestState::Passed),
    ("FinishedPassed", TestState::Passed),
    ("FinishedFailed", TestState::Failed),
];

impl TestState {
    /// Map a raw remote status string to a state.
    ///
    /// Unrecognized strings map to `Unknown`.
    pub fn from_remote_status(raw: &str) -> TestState {
        REMOTE_STATUS_TABLE
            .iter()
            .find(|(status, _)| *status == raw)
            .map(|(_, state)| *state)
            .unwrap_or(TestState::Unknown)
    }

    /// No further transitions are expected once a test is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestState::Passed | TestState::Failed | TestState::Error | TestState::NoRun
        )
    }

    /// Failed or errored
    pub fn is_failure(&self) -> bool {
        matches!(self, TestState::Failed | TestState::Error)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TestState::Passed => "✓",
            TestState::Warning => "⚠",
            TestState::Failed => "✗",
            TestState::Error => "!",
            TestState::NoRun => "○",
            TestState::Waiting | TestState::Running => "…",
            TestState::Unknown => "?",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestState::NoRun => "NoRun",
            TestState::Waiting => "Waiting",
            TestState::Running => "Running",
            TestState::Passed => "Passed",
            TestState::Failed => "Failed",
            TestState::Error => "Error",
            TestState::Warning => "Warning",
            TestState::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
