//! Test execution engine
//!
//! Defines the executor contract used by the dispatch loop and the table of
//! standard executors per test type.

mod command;
mod parallel;

pub use command::CommandExecutor;
pub use parallel::ParallelExecutor;

use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cancel::CancellationSignal;
use crate::config::ExecutorConfig;
use crate::models::{TestRunResult, TestSpec, TestType};

/// Runs tests of one technology.
///
/// `run` may poll `cancel` while the test is in flight. `cleanup` must be
/// safe to call more than once.
pub trait Executor: Send {
    fn run<'a>(
        &'a mut self,
        spec: &'a TestSpec,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<TestRunResult>>;

    fn cleanup(&mut self);
}

type Constructor = fn(&ExecutorConfig) -> Box<dyn Executor>;

/// Standard executor per test type
const STANDARD_EXECUTORS: &[(TestType, Constructor)] = &[
    (TestType::Gui, CommandExecutor::gui),
    (TestType::Api, CommandExecutor::api),
    (TestType::Load, CommandExecutor::load),
    (TestType::Parallel, ParallelExecutor::boxed),
];

pub type ExecutorFactory = Box<dyn Fn() -> Box<dyn Executor> + Send + Sync>;

/// Creates executor instances by test type
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: BTreeMap<TestType, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry backed by the configured external launchers
    pub fn standard(config: &ExecutorConfig) -> Self {
        let config = Arc::new(config.clone());
        STANDARD_EXECUTORS
            .iter()
            .fold(Self::empty(), |registry, &(test_type, construct)| {
                let config = Arc::clone(&config);
                registry.register(test_type, move || construct(&config))
            })
    }

    pub fn register<F>(mut self, test_type: TestType, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Executor> + Send + Sync + 'static,
    {
        self.factories.insert(test_type, Box::new(factory));
        self
    }

    pub fn create(&self, test_type: TestType) -> Option<Box<dyn Executor>> {
        self.factories.get(&test_type).map(|factory| factory())
    }
}
