//! # EsoxSolutions.ResourcePool
//!
//! Non-blocking pool for resources that are expensive to open, such as database
//! connections, with leak detection and backoff when the source is failing.
//!
//! ## Features
//!
//! - Lock-free acquire and release over a compare-and-swap dual stack
//! - Blocking and async acquire with timeouts
//! - FIFO or LIFO hand-off to waiting callers
//! - Resources opened on demand in the background, bounded by `max_open`
//! - Idle eviction and periodic revalidation
//! - Throttled reopening while the source is failing, with fail-fast acquires
//! - Leak detection with optional checkout backtraces
//! - Health monitoring and metrics, including Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resourcepool::{Pool, PoolConfiguration, PoolSource};
//! use std::convert::Infallible;
//!
//! struct Connections;
//!
//! impl PoolSource for Connections {
//!     type Resource = String;
//!     type Error = Infallible;
//!
//!     fn create(&self) -> Result<String, Infallible> { Ok("connection".to_string()) }
//!     fn destroy(&self, _: String) -> Result<(), Infallible> { Ok(()) }
//!     fn validate(&self, _: &String) -> Result<bool, Infallible> { Ok(true) }
//!     fn shutdown(&self) {}
//! }
//!
//! let pool = Pool::new("db", Connections, PoolConfiguration::default()).unwrap();
//! let conn = pool.acquire().unwrap();
//! println!("Got: {}", *conn);
//! // Hand it back, or `abandon` it if it broke
//! pool.release(conn).unwrap();
//! ```

mod circuit_breaker;
mod config;
mod errors;
mod eviction;
mod executor;
mod health;
mod metrics;
mod pool;
mod scheduler;
mod source;
mod stack;
mod tracker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState};
pub use config::{Fairness, LeakMode, PoolConfiguration, Profile};
pub use errors::{PoolError, PoolResult};
pub use eviction::{EvictionPolicy, Freshness};
pub use health::HealthStatus;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{Lease, Pool};
pub use scheduler::{Scheduler, MAX_INTERVAL};
pub use source::PoolSource;
