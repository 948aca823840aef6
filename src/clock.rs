//! Wall-clock sources
//!
//! Artifact expiration and run windows are computed against an injected
//! [`Clock`] so that ages can be controlled in tests.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock.
///
/// Stores milliseconds since the epoch; readers always observe the last value
/// written by [`ManualClock::set`] or [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now_ms.store(now.timestamp_millis(), Ordering::Release);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.now_ms
            .fetch_add(by.num_milliseconds(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.now_ms.load(Ordering::Acquire);
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// Truncates a timestamp to the start of its minute.
///
/// Run windows end on a minute boundary so that range queries with a
/// one-minute step hit the same sample timestamps on every run.
pub fn align_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(TimeDelta::hours(23));
        assert_eq!(clock.now() - start, TimeDelta::hours(23));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_align_to_minute_drops_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 59).unwrap()
            + TimeDelta::milliseconds(250);
        let aligned = align_to_minute(ts);
        assert_eq!(aligned, Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 0).unwrap());
        assert_eq!(align_to_minute(aligned), aligned);
    }

    #[test]
    fn test_system_clock_is_recent() {
        let now = SystemClock.now();
        assert!(now.timestamp() > 1_577_836_800, "timestamp should be after 2020");
    }
}
