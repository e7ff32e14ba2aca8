use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex};
use std::thread;

/// Wall-clock abstraction used to timestamp loop cycles and judge data recency.
///
/// - now(): returns the current UTC instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - age_of(): helper to compute how old an instant is, saturating at zero
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, d: TimeDelta);

    /// Elapsed time since `at`, saturating at zero when `at` lies in the future.
    fn age_of(&self, at: DateTime<Utc>) -> TimeDelta {
        let age = self.now() - at;
        if age < TimeDelta::zero() {
            TimeDelta::zero()
        } else {
            age
        }
    }
}

/// Default, real-time clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    fn sleep(&self, d: TimeDelta) {
        if let Ok(std) = d.to_std()
            && !std.is_zero()
        {
            thread::sleep(std);
        }
    }
}

/// Deterministic clock whose time is set and advanced manually.
///
/// Used for history replay and tests. Clones share the same time source.
/// sleep(d) advances internal time by d without actually sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += d;
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|g| *g)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn sleep(&self, d: TimeDelta) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_shares_state() {
        let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::hours(10);
        let clock = ManualClock::new(start);
        let other = clock.clone();
        clock.sleep(TimeDelta::minutes(5));
        assert_eq!(other.now(), start + TimeDelta::minutes(5));
        other.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn age_of_saturates_for_future_instants() {
        let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::hours(1);
        let clock = ManualClock::new(start);
        assert_eq!(clock.age_of(start + TimeDelta::minutes(3)), TimeDelta::zero());
        assert_eq!(
            clock.age_of(start - TimeDelta::minutes(3)),
            TimeDelta::minutes(3)
        );
    }
}
