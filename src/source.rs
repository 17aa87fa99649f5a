//! The contract between a pool and whatever produces its resources

use std::error::Error;

/// Creates, checks and tears down the raw resources a [`Pool`](crate::Pool) manages
///
/// Every method is called from background workers or from `release` on a
/// stopped pool, never while holding any pool state. `shutdown` is called once,
/// after the pool is shut down and every resource has been returned.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PoolSource;
/// use std::convert::Infallible;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl PoolSource for Counter {
///     type Resource = usize;
///     type Error = Infallible;
///
///     fn create(&self) -> Result<usize, Infallible> {
///         Ok(self.0.fetch_add(1, Ordering::Relaxed))
///     }
///
///     fn destroy(&self, _resource: usize) -> Result<(), Infallible> {
///         Ok(())
///     }
///
///     fn validate(&self, _resource: &usize) -> Result<bool, Infallible> {
///         Ok(true)
///     }
///
///     fn shutdown(&self) {}
/// }
/// ```
pub trait PoolSource: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;
    type Error: Error + Send + Sync + 'static;

    /// Open a new resource. May block for as long as it takes.
    fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Close a resource that is leaving the pool
    fn destroy(&self, resource: Self::Resource) -> Result<(), Self::Error>;

    /// Report whether an idle or long-held resource is still usable
    fn validate(&self, resource: &Self::Resource) -> Result<bool, Self::Error>;

    /// Release anything the source itself holds
    fn shutdown(&self);
}
