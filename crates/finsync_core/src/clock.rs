//! Time sources.

use crate::types::Timestamp;
use parking_lot::Mutex;
use std::time::Duration;

/// Supplies `now()` to the stores and the reconciler.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// Wall clock that never repeats or goes backwards within a process.
///
/// If the system time has not moved past the last value handed out (same
/// millisecond, or a backwards step), the previous value plus one
/// millisecond is returned instead.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<i64>,
}

impl SystemClock {
    /// Creates a system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.lock();
        let next = if wall > *last { wall } else { *last + 1 };
        *last = next;
        Timestamp::from_millis(next)
    }
}

/// Deterministic clock for tests.
///
/// Each call to `now()` returns the current value and then advances it by
/// `step` (one millisecond unless configured otherwise).
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(i64, i64)>,
}

impl ManualClock {
    /// Creates a clock starting at `start`, ticking one millisecond per read.
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            state: Mutex::new((start.as_millis(), 1)),
        }
    }

    /// Sets the per-read step. A zero step freezes the clock.
    #[must_use]
    pub fn with_step(self, step: Duration) -> Self {
        let step = i64::try_from(step.as_millis()).unwrap_or(i64::MAX);
        self.state.lock().1 = step;
        self
    }

    /// Moves the clock to `to`.
    pub fn set(&self, to: Timestamp) {
        self.state.lock().0 = to.as_millis();
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.0 = Timestamp::from_millis(state.0).saturating_add(by).as_millis();
    }

    /// Returns the value the next `now()` will produce, without ticking.
    #[must_use]
    pub fn peek(&self) -> Timestamp {
        Timestamp::from_millis(self.state.lock().0)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_at(Timestamp::from_millis(1_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let mut state = self.state.lock();
        let current = state.0;
        state.0 = current.saturating_add(state.1);
        Timestamp::from_millis(current)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
