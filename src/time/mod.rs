// SPDX-License-Identifier: MPL-2.0

//! Time sources for cache expiry decisions.

use std::time::Instant;

use crate::prelude::*;

/// A trait that can abstract clocks which have the ability to read time.
pub trait Clock: Send + Sync {
    /// Read the current time of this clock.
    fn read_time(&self) -> Duration;
}

/// A clock that reads the time elapsed since its creation.
///
/// Cache expiries are stored as offsets from the clock's epoch, which keeps
/// the zero offset free to mean "never expires".
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose epoch is the moment of creation.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn read_time(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// A clock whose time only advances when told to.
///
/// Useful for driving expiry decisions deterministically in tests.
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock whose current time is `now`.
    pub fn new(now: Duration) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Advances the current time by `duration`.
    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }

    /// Sets the current time to `now`.
    pub fn set_time(&self, now: Duration) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn read_time(&self) -> Duration {
        *self.now.lock()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.read_time();
        let second = clock.read_time();
        assert!(second >= first);
    }

    #[test]
    fn manual_clock_is_settable() {
        let clock = ManualClock::new(Duration::ZERO);
        assert_eq!(clock.read_time(), Duration::ZERO);

        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.read_time(), Duration::from_secs(3));

        clock.set_time(Duration::from_secs(1));
        assert_eq!(clock.read_time(), Duration::from_secs(1));
    }
}
