//! Idle and validation aging of ready resources

use std::time::{Duration, Instant};

/// Aging limits for ready resources
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{EvictionPolicy, Freshness};
/// use std::time::{Duration, Instant};
///
/// let policy = EvictionPolicy::new(Duration::from_secs(30), Duration::from_secs(60));
/// let now = Instant::now();
///
/// assert_eq!(
///     policy.classify(now, now, now),
///     Freshness::Fresh(Duration::from_secs(30))
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Idle longer than this and the resource is destroyed
    pub max_idle: Duration,

    /// Untested longer than this and the resource is validated again
    pub validate_interval: Duration,
}

/// What the aging pass should do with a ready resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Idle too long, destroy it
    Expired,

    /// Due for validation
    Stale,

    /// Fine for now. Holds the time until it next needs attention.
    Fresh(Duration),
}

impl EvictionPolicy {
    pub fn new(max_idle: Duration, validate_interval: Duration) -> Self {
        Self {
            max_idle,
            validate_interval,
        }
    }

    /// Longest a pass may report as the next due time
    pub fn horizon(&self) -> Duration {
        self.max_idle.max(self.validate_interval)
    }

    pub fn classify(&self, last_used: Instant, last_tested: Instant, now: Instant) -> Freshness {
        let idle = now.saturating_duration_since(last_used);
        if idle >= self.max_idle {
            return Freshness::Expired;
        }

        let untested = now.saturating_duration_since(last_tested);
        if untested >= self.validate_interval {
            return Freshness::Stale;
        }

        Freshness::Fresh((self.max_idle - idle).min(self.validate_interval - untested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EvictionPolicy {
        EvictionPolicy::new(Duration::from_millis(100), Duration::from_millis(300))
    }

    #[test]
    fn test_expired_beats_stale() {
        let now = Instant::now();
        let long_ago = now - Duration::from_secs(1);
        assert_eq!(policy().classify(long_ago, long_ago, now), Freshness::Expired);
    }

    #[test]
    fn test_stale() {
        let now = Instant::now();
        let tested = now - Duration::from_millis(300);
        assert_eq!(policy().classify(now, tested, now), Freshness::Stale);
    }

    #[test]
    fn test_fresh_reports_nearest_deadline() {
        let now = Instant::now();
        let used = now - Duration::from_millis(40);
        let tested = now - Duration::from_millis(250);
        assert_eq!(
            policy().classify(used, tested, now),
            Freshness::Fresh(Duration::from_millis(50))
        );
    }

    #[test]
    fn test_stamps_after_now_count_as_fresh() {
        let now = Instant::now();
        let later = now + Duration::from_millis(10);
        assert_eq!(
            policy().classify(later, later, now),
            Freshness::Fresh(Duration::from_millis(100))
        );
        assert_eq!(policy().horizon(), Duration::from_millis(300));
    }
}
