//! Error types for the resource pool

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("No resource became available within {0:?}")]
    Timeout(Duration),

    #[error("Resource source failed: {0}")]
    Source(#[source] Arc<dyn Error + Send + Sync>),

    #[error("Pool is shut down")]
    Shutdown,

    #[error("Resource is not tracked by this pool")]
    NotTracked,

    #[error("Resource is not checked out")]
    NotCheckedOut,

    #[error("Resource is already tracked by this pool")]
    AlreadyTracked,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    /// Wrap an error raised by a [`PoolSource`](crate::PoolSource)
    pub fn from_source<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        PoolError::Source(Arc::new(err))
    }

    /// Whether this error means the pool has stopped for good
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::Shutdown)
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct Refused;

    #[test]
    fn test_source_error_keeps_cause() {
        let err = PoolError::from_source(Refused);
        assert_eq!(err.to_string(), "Resource source failed: connection refused");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("connection refused"));
        assert!(!err.is_shutdown());
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = PoolError::from_source(Refused);
        let copy = err.clone();
        match (err, copy) {
            (PoolError::Source(a), PoolError::Source(b)) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
