//! Data models for test orchestration
//!
//! This module contains the data structures shared by the catalog, the
//! executors, and both orchestrators.

mod state;
mod test_result;
mod test_spec;

pub use state::TestState;
pub use test_result::{ExitStatus, SuiteResult, TestRunResult, CANCELLED};
pub use test_spec::{normalize_group, TestParameter, TestSpec, TestType};
pub(crate) use test_spec::has_extension;
