//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};

/// How eagerly checkouts capture a backtrace of their origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LeakMode {
    /// Never capture
    Off,

    /// Always capture. Costly on busy pools.
    On,

    /// Capture while a leak or an overly long checkout was seen recently
    #[default]
    Auto,
}

/// Which waiting caller receives a released resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Fairness {
    /// Oldest waiter first
    #[default]
    Fifo,

    /// Most recent waiter first. Less contention, less fairness.
    Lifo,
}

/// Named bundles of tuning constants for common load profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Profile {
    /// Small, conservative pools
    Tiny,

    /// Interactive services
    #[default]
    Gentle,

    /// Batch work that prefers waiting over failing
    Reliable,

    /// Low latency, fails fast
    Fast,
}

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Fairness, PoolConfiguration, Profile};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::from_profile(Profile::Fast)
///     .with_max_open(10)
///     .with_give_up(Duration::from_secs(2));
///
/// assert_eq!(config.max_open, 10);
/// assert_eq!(config.fairness, Fairness::Lifo);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfiguration {
    /// How many resources may be opening at once
    pub open_concurrent: usize,

    /// Maximum number of resources that may exist, counting ones being opened
    pub max_open: usize,

    /// How long a resource may sit idle before it is destroyed
    pub max_idle: Duration,

    /// How long a resource may go untested before it is validated again
    pub validate_interval: Duration,

    /// Checkouts held longer than this are logged and enable leak tracing in `Auto` mode
    pub warn_long_use: Duration,

    /// How long `acquire` waits while the source is healthy
    pub give_up: Duration,

    /// How long `acquire` waits while the source is failing
    pub give_up_broken: Duration,

    /// Minimum spacing between open attempts while the source is failing
    pub open_broken_rate: Duration,

    pub leak_mode: LeakMode,

    pub fairness: Fairness,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self::from_profile(Profile::default())
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a preset
    pub fn from_profile(profile: Profile) -> Self {
        let base = Self {
            open_concurrent: 6,
            max_open: 200,
            max_idle: Duration::from_secs(30),
            validate_interval: Duration::from_secs(30),
            warn_long_use: Duration::from_secs(15 * 60),
            give_up: Duration::from_secs(30),
            give_up_broken: Duration::from_secs(1),
            open_broken_rate: Duration::from_millis(500),
            leak_mode: LeakMode::Auto,
            fairness: Fairness::Fifo,
        };

        match profile {
            Profile::Tiny => Self {
                open_concurrent: 2,
                max_open: 64,
                max_idle: Duration::from_secs(2),
                give_up: Duration::from_secs(45),
                open_broken_rate: Duration::from_secs(1),
                ..base
            },
            Profile::Gentle => base,
            Profile::Reliable => Self {
                open_concurrent: 8,
                max_open: 1000,
                max_idle: Duration::from_secs(60),
                warn_long_use: Duration::from_secs(30 * 60),
                give_up: Duration::from_secs(60),
                give_up_broken: Duration::from_secs(30),
                ..base
            },
            Profile::Fast => Self {
                open_concurrent: 24,
                max_open: 1000,
                max_idle: Duration::from_secs(5 * 60),
                validate_interval: Duration::from_secs(60),
                warn_long_use: Duration::from_secs(60),
                give_up: Duration::from_secs(5),
                give_up_broken: Duration::from_millis(500),
                open_broken_rate: Duration::from_millis(250),
                fairness: Fairness::Lifo,
                ..base
            },
        }
    }

    /// Replace every tuning constant with those of a preset
    pub fn with_profile(self, profile: Profile) -> Self {
        Self {
            leak_mode: self.leak_mode,
            ..Self::from_profile(profile)
        }
    }

    /// Set how many resources may be opening at once
    pub fn with_open_concurrent(mut self, count: usize) -> Self {
        self.open_concurrent = count;
        self
    }

    /// Set the maximum number of resources
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_open(50);
    ///
    /// assert_eq!(config.max_open, 50);
    /// ```
    pub fn with_max_open(mut self, count: usize) -> Self {
        self.max_open = count;
        self
    }

    pub fn with_max_idle(mut self, idle: Duration) -> Self {
        self.max_idle = idle;
        self
    }

    pub fn with_validate_interval(mut self, interval: Duration) -> Self {
        self.validate_interval = interval;
        self
    }

    pub fn with_warn_long_use(mut self, threshold: Duration) -> Self {
        self.warn_long_use = threshold;
        self
    }

    /// Set how long `acquire` waits while the source is healthy
    pub fn with_give_up(mut self, timeout: Duration) -> Self {
        self.give_up = timeout;
        self
    }

    /// Set how long `acquire` waits while the source is failing
    pub fn with_give_up_broken(mut self, timeout: Duration) -> Self {
        self.give_up_broken = timeout;
        self
    }

    pub fn with_open_broken_rate(mut self, rate: Duration) -> Self {
        self.open_broken_rate = rate;
        self
    }

    pub fn with_leak_mode(mut self, mode: LeakMode) -> Self {
        self.leak_mode = mode;
        self
    }

    pub fn with_fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    /// Check that the pool can make progress with these settings
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_open == 0 {
            return Err(PoolError::InvalidConfiguration("max_open must be at least 1".to_string()));
        }
        if self.open_concurrent == 0 {
            return Err(PoolError::InvalidConfiguration(
                "open_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper bound for the delay between maintenance passes
    pub(crate) fn service_interval(&self) -> Duration {
        self.max_idle.min(self.validate_interval)
    }
}
