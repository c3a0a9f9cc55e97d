//! Monotonic millisecond timestamps.
//!
//! Lease and key-lease values are carried in seconds on the wire, but every
//! expiry computation happens in milliseconds against a single monotonic
//! clock so the lease and transaction timers share one time base.

use std::ops::Add;
use std::time::Duration;
use tokio::time::Instant;

/// A monotonic timestamp in milliseconds.
///
/// The zero point is arbitrary (the [`Clock`] pins it to process start);
/// only differences and orderings are meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeMilli(u64);

impl TimeMilli {
    /// A timestamp later than any expiry the server will ever compute.
    pub const DISTANT_FUTURE: TimeMilli = TimeMilli(u64::MAX);

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        TimeMilli(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Advance by a whole number of seconds, saturating at the far future.
    #[must_use]
    pub fn add_secs(self, secs: u32) -> Self {
        TimeMilli(self.0.saturating_add(u64::from(secs) * 1000))
    }

    /// Milliseconds from `self` until `later`, or zero if already past.
    #[must_use]
    pub fn millis_until(self, later: TimeMilli) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl Add<Duration> for TimeMilli {
    type Output = TimeMilli;

    fn add(self, rhs: Duration) -> TimeMilli {
        TimeMilli(
            self.0
                .saturating_add(u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX)),
        )
    }
}

/// Translates the tokio runtime clock into [`TimeMilli`] values.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    #[must_use]
    pub fn start() -> Self {
        Clock {
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> TimeMilli {
        TimeMilli(u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    /// Map a timestamp back onto the runtime clock for `sleep_until`.
    #[must_use]
    pub fn instant_at(&self, time: TimeMilli) -> Instant {
        self.epoch + Duration::from_millis(time.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_secs_converts_to_millis() {
        let t = TimeMilli::from_millis(500);
        assert_eq!(t.add_secs(2), TimeMilli::from_millis(2500));
    }

    #[test]
    fn add_secs_saturates() {
        assert_eq!(
            TimeMilli::DISTANT_FUTURE.add_secs(30),
            TimeMilli::DISTANT_FUTURE
        );
    }

    #[test]
    fn millis_until_is_zero_for_past_deadlines() {
        let now = TimeMilli::from_millis(10_000);
        assert_eq!(now.millis_until(TimeMilli::from_millis(4_000)), 0);
        assert_eq!(now.millis_until(TimeMilli::from_millis(10_250)), 250);
    }
}
