//! Run cancellation
//!
//! A latched gate combining an out-of-band stop request (a sentinel file
//! dropped next to the run) with an overall timeout budget. Orchestrators
//! poll it between tests and poll cycles; it never interrupts work in
//! flight.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::utils::{format_duration, Clock};

/// Why a run was cancelled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The stop sentinel was raised
    UserAbort,
    /// The timeout budget ran out
    Timeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserAbort => write!(f, "user abort"),
            CancelReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Generate a token identifying one run
pub fn generate_token() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Stop request file `stop{token}.txt`
#[derive(Clone, Debug)]
pub struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    pub fn new(dir: impl AsRef<Path>, token: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("stop{token}.txt")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_raised(&self) -> bool {
        self.path.exists()
    }

    /// Request the run owning this token to stop
    pub fn raise(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create sentinel directory: {}", dir.display()))?;
        }
        std::fs::write(&self.path, "")
            .with_context(|| format!("Failed to write sentinel: {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove sentinel: {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Latched cancellation gate
pub struct CancellationSignal {
    sentinel: Option<Sentinel>,
    budget: Option<Duration>,
    clock: Arc<dyn Clock>,
    latched: OnceLock<CancelReason>,
}

impl CancellationSignal {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sentinel: None,
            budget: None,
            clock,
            latched: OnceLock::new(),
        }
    }

    pub fn with_sentinel(mut self, sentinel: Sentinel) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    /// True once the sentinel was seen or the budget ran out. Stays true.
    pub fn check(&self) -> bool {
        if self.is_latched() {
            return true;
        }

        if self.sentinel_raised() {
            self.latch(CancelReason::UserAbort);
            return true;
        }

        match self.budget {
            Some(budget) if self.clock.elapsed() > budget => {
                self.latch(CancelReason::Timeout);
                true
            }
            _ => false,
        }
    }

    /// Only consult the sentinel, ignoring the budget
    pub fn check_sentinel(&self) -> bool {
        if self.reason() == Some(CancelReason::UserAbort) {
            return true;
        }
        if self.sentinel_raised() {
            self.latch(CancelReason::UserAbort);
            return true;
        }
        false
    }

    /// First reason the signal latched for
    pub fn reason(&self) -> Option<CancelReason> {
        self.latched.get().copied()
    }

    pub fn is_latched(&self) -> bool {
        self.latched.get().is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn sentinel(&self) -> Option<&Sentinel> {
        self.sentinel.as_ref()
    }

    fn sentinel_raised(&self) -> bool {
        self.sentinel.as_ref().is_some_and(Sentinel::is_raised)
    }

    fn latch(&self, reason: CancelReason) {
        if self.latched.set(reason).is_err() {
            return;
        }
        match reason {
            CancelReason::UserAbort => info!("Stop requested, cancelling the run"),
            CancelReason::Timeout => warn!(
                "Timeout budget of {} expired after {}, cancelling the run",
                self.budget.map(format_duration).unwrap_or_default(),
                format_duration(self.clock.elapsed())
            ),
        }
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("sentinel", &self.sentinel)
            .field("budget", &self.budget)
            .field("latched", &self.latched.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::timer::ManualClock;
    use tempfile::tempdir;

    #[test]
    fn test_budget_latches() {
        let clock = ManualClock::new();
        let signal = CancellationSignal::new(clock.clone()).with_budget(Some(Duration::from_secs(5)));

        assert!(!signal.check());
        clock.advance(Duration::from_secs(5));
        assert!(!signal.check());
        clock.advance(Duration::from_millis(1));
        assert!(signal.check());
        assert_eq!(signal.reason(), Some(CancelReason::Timeout));
        assert_eq!(signal.elapsed(), Duration::from_millis(5001));
    }

    #[test]
    fn test_sentinel_latches_and_stays() {
        let dir = tempdir().unwrap();
        let sentinel = Sentinel::new(dir.path(), "abc");
        let signal = CancellationSignal::new(ManualClock::new()).with_sentinel(sentinel.clone());

        assert!(!signal.check());
        sentinel.raise().unwrap();
        assert!(signal.check());

        sentinel.clear().unwrap();
        assert!(!sentinel.is_raised());
        assert!(signal.check());
        assert_eq!(signal.reason(), Some(CancelReason::UserAbort));
    }

    #[test]
    fn test_first_reason_wins() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new();
        let sentinel = Sentinel::new(dir.path(), "t1");
        let signal = CancellationSignal::new(clock.clone())
            .with_sentinel(sentinel.clone())
            .with_budget(Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(2));
        assert!(signal.check());
        sentinel.raise().unwrap();
        assert!(signal.check());
        assert_eq!(signal.reason(), Some(CancelReason::Timeout));
    }

    #[test]
    fn test_check_sentinel_ignores_budget() {
        let clock = ManualClock::new();
        let signal = CancellationSignal::new(clock.clone()).with_budget(Some(Duration::ZERO));
        clock.advance(Duration::from_secs(1));
        assert!(!signal.check_sentinel());
        assert!(!signal.is_latched());
    }

    #[test]
    fn test_sentinel_file_name() {
        let sentinel = Sentinel::new("/tmp/runs", "42");
        assert_eq!(sentinel.path(), Path::new("/tmp/runs/stop42.txt"));
        assert_eq!(generate_token().len(), 8);
    }
}
