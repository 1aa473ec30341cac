//! Injectable wall-clock source (C1).
//!
//! Every freeze-window computation in this crate takes its notion of "now"
//! through a `Clock` rather than calling `chrono::Utc::now()` directly, so
//! scenario tests (`spec.md` §8) can pin the instant a schedule or exemption
//! is evaluated against.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Returns the current instant. Implementations must be cheap and
/// non-blocking — the evaluator calls this on every admission request.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double holding a fixed or manually-advanced instant.
///
/// Stores the instant as millis-since-epoch in an `AtomicI64` so it can be
/// shared (`Arc<FixedClock>`) and advanced from outside the component under
/// test without needing `&mut`.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.millis
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).expect("fixed clock millis always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_reports_pinned_instant() {
        let at = Utc.with_ymd_and_hms(2025, 12, 25, 10, 0, 0).unwrap();
        let clock = FixedClock::new(at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn fixed_clock_advances() {
        let at = Utc.with_ymd_and_hms(2025, 12, 25, 10, 0, 0).unwrap();
        let clock = FixedClock::new(at);
        clock.advance(chrono::Duration::minutes(11));
        assert_eq!(clock.now(), at + chrono::Duration::minutes(11));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = clock.now();
        assert!(second >= first);
    }
}
