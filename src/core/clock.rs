//! Clock
//!
//! Time source abstraction so expiry policy can be tested deterministically.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Time source interface.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for testing.
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) -> &Self {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
        self
    }

    /// Set the clock to an instant.
    pub fn set(&self, to: DateTime<Utc>) -> &Self {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
        self
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert a std duration to chrono, saturating on overflow.
pub fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advance() {
        let start = Utc::now();
        let clock = MockClock::new(start);

        clock.advance(Duration::seconds(3599));
        assert_eq!(clock.now(), start + Duration::seconds(3599));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_to_chrono() {
        assert_eq!(
            to_chrono(std::time::Duration::from_secs(90)),
            Duration::seconds(90)
        );
        assert_eq!(to_chrono(std::time::Duration::MAX), Duration::MAX);
    }
}
