//! Source failure tracking and broken-source open throttling

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;

use crate::errors::PoolError;

/// Circuit breaker state
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{CircuitBreaker, CircuitBreakerState, PoolError};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(Duration::from_secs(60));
/// assert_eq!(breaker.state(), CircuitBreakerState::Closed);
///
/// breaker.record_attempt();
/// breaker.record_failure(PoolError::Timeout(Duration::from_secs(1)));
/// assert_eq!(breaker.state(), CircuitBreakerState::Open);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// No failure recorded - opens are unrestricted
    Closed,

    /// Last open failed and the retry window hasn't passed
    Open,

    /// Last open failed but another attempt is allowed
    HalfOpen,
}

/// Remembers the last source failure and spaces out open attempts while it stands
///
/// There is no failure threshold: one failed open is enough to throttle, and one
/// successful open closes the circuit again.
pub struct CircuitBreaker {
    failure: ArcSwapOption<PoolError>,
    epoch: Instant,
    // Millis since `epoch`, offset by one so zero means "never"
    last_attempt: AtomicU64,
    retry_rate: Duration,
}

impl CircuitBreaker {
    /// Create a new circuit breaker allowing one attempt per `retry_rate` while open
    pub fn new(retry_rate: Duration) -> Self {
        Self {
            failure: ArcSwapOption::empty(),
            epoch: Instant::now(),
            last_attempt: AtomicU64::new(0),
            retry_rate,
        }
    }

    /// Get the current state
    pub fn state(&self) -> CircuitBreakerState {
        if self.failure.load().is_none() {
            CircuitBreakerState::Closed
        } else if self.retry_wait(Instant::now()).is_some() {
            CircuitBreakerState::Open
        } else {
            CircuitBreakerState::HalfOpen
        }
    }

    /// The failure currently recorded, if any
    pub fn failure(&self) -> Option<PoolError> {
        self.failure.load().as_deref().cloned()
    }

    pub fn is_failing(&self) -> bool {
        self.failure.load().is_some()
    }

    /// How long until the next open attempt is allowed, `None` if allowed now
    pub fn retry_wait(&self, now: Instant) -> Option<Duration> {
        if !self.is_failing() {
            return None;
        }
        let last = self.last_attempt.load(Ordering::Acquire);
        if last == 0 {
            return None;
        }
        let allowed_at = self.epoch + Duration::from_millis(last - 1) + self.retry_rate;
        let wait = allowed_at.saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }

    /// Note that an open attempt is starting now
    pub fn record_attempt(&self) {
        let since = Instant::now().saturating_duration_since(self.epoch);
        let millis = u64::try_from(since.as_millis()).unwrap_or(u64::MAX - 1);
        self.last_attempt.store(millis + 1, Ordering::Release);
    }

    /// Record a failure
    pub fn record_failure(&self, err: PoolError) {
        self.failure.store(Some(Arc::new(err)));
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.failure.store(None);
    }

    /// Reset the circuit breaker
    pub fn reset(&self) {
        self.record_success();
        self.last_attempt.store(0, Ordering::Release);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_closed_allows_attempts() {
        let breaker = CircuitBreaker::new(Duration::from_secs(60));
        breaker.record_attempt();
        assert_eq!(breaker.retry_wait(Instant::now()), None);
        assert!(breaker.failure().is_none());
    }

    #[test]
    fn test_open_then_half_open() {
        let breaker = CircuitBreaker::new(Duration::from_millis(50));
        breaker.record_attempt();
        breaker.record_failure(PoolError::Shutdown);

        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.retry_wait(Instant::now()).is_some_and(|w| w <= Duration::from_millis(50)));
        assert!(breaker.failure().is_some_and(|e| e.is_shutdown()));

        thread::sleep(Duration::from_millis(80));
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert_eq!(breaker.retry_wait(Instant::now()), None);
    }

    #[test]
    fn test_success_closes() {
        let breaker = CircuitBreaker::default();
        breaker.record_attempt();
        breaker.record_failure(PoolError::Shutdown);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        breaker.record_failure(PoolError::Shutdown);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }
}
