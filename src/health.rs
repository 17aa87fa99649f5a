//! Health monitoring for resource pools

use crate::errors::PoolError;
use crate::metrics::PoolMetrics;

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{Pool, PoolConfiguration, PoolSource};
/// use std::convert::Infallible;
///
/// struct Numbers;
///
/// impl PoolSource for Numbers {
///     type Resource = u32;
///     type Error = Infallible;
///
///     fn create(&self) -> Result<u32, Infallible> { Ok(1) }
///     fn destroy(&self, _: u32) -> Result<(), Infallible> { Ok(()) }
///     fn validate(&self, _: &u32) -> Result<bool, Infallible> { Ok(true) }
///     fn shutdown(&self) {}
/// }
///
/// let pool = Pool::new("numbers", Numbers, PoolConfiguration::default()).unwrap();
/// assert!(pool.get_health_status().is_healthy());
///
/// pool.shutdown();
/// let health = pool.get_health_status();
/// assert!(!health.is_healthy());
/// assert_eq!(health.warnings, vec!["Pool is shut down".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Checked-out share of `max_open` (0.0 to 1.0)
    pub utilization: f64,

    pub available: usize,

    pub in_use: usize,

    pub waiting: usize,

    pub max_open: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive health from a metrics snapshot and the pool's failure state
    pub fn new(metrics: &PoolMetrics, running: bool, failure: Option<&PoolError>) -> Self {
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if !running {
            warnings.push("Pool is shut down".to_string());
            is_healthy = false;
        } else if let Some(err) = failure {
            warnings.push(format!("Source is failing: {err}"));
            is_healthy = false;
        }

        if metrics.utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", metrics.utilization * 100.0));
            is_healthy = false;
        }

        if running && metrics.waiting > 0 && metrics.available == 0 {
            warnings.push(format!("{} callers waiting with nothing available", metrics.waiting));
        }

        if running && metrics.throttled {
            warnings.push("Opening is throttled".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization: metrics.utilization,
            available: metrics.available,
            in_use: metrics.in_use,
            waiting: metrics.waiting,
            max_open: metrics.max_open,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
