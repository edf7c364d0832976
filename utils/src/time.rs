//! Utility functions for `std::time`.

use std::time::{Duration, SystemTime};

/// Extension trait adding helpers to [SystemTime].
pub trait SystemTimeExt {
    /// Returns the duration since the Unix epoch (zero if the clock is before the epoch).
    fn epoch(&self) -> Duration;

    /// Returns the number of milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> u64;

    /// Returns the time elapsed since `earlier`, or zero if `earlier` is in the future.
    fn saturating_since(&self, earlier: SystemTime) -> Duration;
}

impl SystemTimeExt for SystemTime {
    fn epoch(&self) -> Duration {
        self.duration_since(std::time::UNIX_EPOCH).unwrap_or_default()
    }

    fn epoch_millis(&self) -> u64 {
        self.epoch().as_millis().min(u64::MAX as u128) as u64
    }

    fn saturating_since(&self, earlier: SystemTime) -> Duration {
        self.duration_since(earlier).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_since() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let later = now + Duration::from_millis(1500);
        assert_eq!(later.saturating_since(now), Duration::from_millis(1500));
        assert_eq!(now.saturating_since(later), Duration::ZERO);
        assert_eq!(later.epoch_millis(), 11_500);
    }
}
