//! Time service: the single source of "now".
//!
//! Every component that stamps or compares times takes an injected
//! `Arc<dyn Clock>` instead of consulting the system clock directly, so
//! tests control time deterministically.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Wall-clock time source
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC time as an RFC 3339 string (the persistence format)
    fn now_iso(&self) -> String {
        self.now().to_rfc3339()
    }
}

/// Production clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests
///
/// Starts at a fixed instant and only moves when advanced explicitly.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Fixed clock starting at the Unix epoch plus one day
    pub fn default_start() -> Self {
        Self::new(DateTime::from_timestamp(86_400, 0).expect("valid timestamp"))
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_fixed_clock_is_stable_until_advanced() {
        let clock = FixedClock::default_start();
        let a = clock.now();
        assert_eq!(clock.now(), a);

        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), a + Duration::seconds(90));
    }

    #[test]
    fn test_now_iso_is_rfc3339() {
        let clock = FixedClock::default_start();
        let iso = clock.now_iso();
        assert!(DateTime::parse_from_rfc3339(&iso).is_ok());
    }
}
