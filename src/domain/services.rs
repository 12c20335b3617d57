//! Injected services for pipeline components.
//!
//! The clock is a seam: production workers run on the system clock, tests
//! and simulation mode advance a manual clock deterministically instead of
//! waiting on real timers.

use crate::domain::types::TimestampUtc;
use chrono::Duration;
use std::sync::Mutex;

/// Time source injected into every time-dependent component.
pub trait Clock: Send + Sync {
    /// Returns the current UTC timestamp.
    fn now(&self) -> TimestampUtc;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampUtc {
        TimestampUtc::now()
    }
}

/// Manually advanced clock for tests and simulation runs.
pub struct ManualClock {
    now: Mutex<TimestampUtc>,
}

impl ManualClock {
    /// Creates a manual clock frozen at the given instant.
    pub fn starting_at(start: TimestampUtc) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.plus(duration);
    }

    /// Jumps the clock to an absolute instant. Never moves backwards.
    pub fn set(&self, instant: TimestampUtc) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if instant > *now {
            *now = instant;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampUtc {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = TimestampUtc::now();
        let clock = ManualClock::starting_at(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::hours(3));
        assert_eq!(clock.now(), start.plus(Duration::hours(3)));
    }

    #[test]
    fn manual_clock_never_moves_backwards() {
        let start = TimestampUtc::now();
        let clock = ManualClock::starting_at(start);
        clock.advance(Duration::days(1));

        clock.set(start);
        assert_eq!(clock.now(), start.plus(Duration::days(1)));
    }
}
