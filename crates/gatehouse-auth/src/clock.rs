//! Time source.
//!
//! Session idleness, debounce and token expiry all read the current time
//! through [`Clock`] so they can be driven deterministically in tests.

use std::sync::Mutex;
use time::OffsetDateTime;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jumps to an absolute time.
    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2024-01-01 00:00 UTC));
        clock.advance(time::Duration::milliseconds(250));
        assert_eq!(
            clock.now(),
            datetime!(2024-01-01 00:00:00.25 UTC)
        );
        clock.set(datetime!(2025-06-01 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-06-01 12:00 UTC));
    }
}
