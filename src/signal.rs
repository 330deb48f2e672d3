//! Host collaborators: process-exit signal and stopwatch clock

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

/// Why the engine asked the host to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The configured maximum number of actions was recorded
    MaxActionsReached,
    /// The configured number of reaction-time samples was recorded
    SampleQuotaReached,
    /// Comparison mode made no progress within the time limit
    ComparisonTimeLimit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MaxActionsReached => write!(f, "maximum number of actions reached"),
            ExitReason::SampleQuotaReached => write!(f, "reaction-time sample quota reached"),
            ExitReason::ComparisonTimeLimit => write!(f, "comparison time limit exceeded"),
        }
    }
}

/// One-shot request to terminate the host process
///
/// The engine calls this at most once per instance.
pub trait ExitSignal {
    fn request_exit(&mut self, reason: ExitReason);
}

/// Shared flag the host loop polls to stop ticking
#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    reason: Rc<Cell<Option<ExitReason>>>,
}

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<ExitReason> {
        self.reason.get()
    }
}

impl ExitSignal for ExitFlag {
    fn request_exit(&mut self, reason: ExitReason) {
        self.reason.set(Some(reason));
    }
}

/// Monotonic stopwatch source in milliseconds
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall-clock stopwatch
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock for replay and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, ms: f64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now_ms.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_flag_shared_between_clones() {
        let flag = ExitFlag::new();
        let mut handle = flag.clone();
        assert!(!flag.is_set());

        handle.request_exit(ExitReason::MaxActionsReached);
        assert!(flag.is_set());
        assert_eq!(flag.reason(), Some(ExitReason::MaxActionsReached));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let view = clock.clone();
        clock.advance_ms(250.0);
        clock.advance_ms(50.0);
        assert!((view.now_ms() - 300.0).abs() < 1e-9);
    }
}
