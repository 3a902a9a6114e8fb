//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// The enum is `Clone` so that the outcome of one in-flight load can be
/// handed to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Cache key failed validation
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Tag failed validation
    #[error("Invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    /// More tags than allowed for a single entry
    #[error("Too many tags: {count} given, at most {max} allowed")]
    TooManyTags { count: usize, max: usize },

    /// Shared store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Shared store was reached but refused the command, e.g. a wrong value type
    #[error("Store rejected command: {0}")]
    StoreRejected(String),

    /// Another process held the key's lock and its value never appeared
    #[error("Timed out after {waited:?} waiting for the loader of '{key}'")]
    LockAcquisitionTimeout { key: String, waited: Duration },

    /// The caller-supplied loader failed
    #[error("Loader failed: {0}")]
    Loader(Arc<anyhow::Error>),

    /// A value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// L1 is full and no victim could be selected
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wraps a loader failure.
    pub fn loader(err: anyhow::Error) -> Self {
        CacheError::Loader(Arc::new(err))
    }

    /// Validation failures are fatal to the call and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey { .. }
                | CacheError::InvalidTag { .. }
                | CacheError::TooManyTags { .. }
        )
    }

    /// The shared store is down, so callers may degrade to L1.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::StoreUnavailable(_))
    }

    /// Failures of the cache itself, as opposed to the caller's loader.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CacheError::StoreUnavailable(_)
                | CacheError::StoreRejected(_)
                | CacheError::LockAcquisitionTimeout { .. }
                | CacheError::CacheFull(_)
                | CacheError::Internal(_)
        )
    }
}

// == Conversions ==
impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            CacheError::StoreUnavailable(err.to_string())
        } else {
            CacheError::StoreRejected(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::StoreUnavailable(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_error_keeps_message() {
        let err = CacheError::loader(anyhow::anyhow!("database down"));
        assert_eq!(err.to_string(), "Loader failed: database down");
        assert!(!err.is_infrastructure());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_classification() {
        let invalid = CacheError::TooManyTags { count: 11, max: 10 };
        assert!(invalid.is_validation());

        let down = CacheError::StoreUnavailable("connection refused".to_string());
        assert!(down.is_infrastructure());
        assert!(down.is_unavailable());
        assert!(!down.is_validation());
    }

    #[test]
    fn test_redis_reply_error_is_not_an_outage() {
        let reply = redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value".to_string(),
        ));
        let err = CacheError::from(reply);
        assert!(matches!(err, CacheError::StoreRejected(_)));
        assert!(!err.is_unavailable());

        let refused = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(CacheError::from(refused).is_unavailable());
    }

    #[test]
    fn test_clone_shares_loader_error() {
        let err = CacheError::loader(anyhow::anyhow!("boom"));
        let cloned = err.clone();
        match (&err, &cloned) {
            (CacheError::Loader(a), CacheError::Loader(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected loader errors"),
        }
    }
}
