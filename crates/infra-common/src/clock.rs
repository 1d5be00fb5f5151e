//! Time sources
//!
//! Components never call `Utc::now()` directly; they ask a [`Clock`]. The
//! production binary wires a [`SystemClock`], tests wire a [`ManualClock`] and
//! move it forward explicitly (usually through
//! [`ManualTicker::advance`](crate::ticker::ManualTicker::advance)).

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Source of the current instant
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Virtual clock shared between clones
///
/// Time only moves when [`set`](ManualClock::set) or
/// [`advance`](ManualClock::advance) is called.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an absolute instant. Moving backwards is ignored.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock();
        if instant > *now {
            *now = instant;
        }
    }

    /// Move forward by `by`
    pub fn advance(&self, by: std::time::Duration) {
        let delta = ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_advances_for_all_clones() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let shared = clock.clone();

        clock.advance(Duration::from_secs(90));
        assert_eq!(shared.now(), start + ChronoDuration::seconds(90));
    }

    #[test]
    fn test_manual_clock_never_moves_backwards() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.set(start - ChronoDuration::minutes(5));
        assert_eq!(clock.now(), start);
    }
}
