//! Store error types.

use thiserror::Error;

/// Errors returned by [`SessionStore`](crate::SessionStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live entry under the key.
    #[error("no entry for key {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },
    /// The backend rejected the command or could not be reached.
    #[error("store backend error: {0}")]
    Unavailable(String),
    /// The backend did not answer within the per-operation timeout.
    #[error("store operation {op} timed out after {millis}ms")]
    Timeout {
        /// Operation name (`get`, `set`, ...).
        op: &'static str,
        /// Timeout that elapsed.
        millis: u64,
    },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StoreError::NotFound { key: "AB3F9".into() };
        assert_eq!(err.to_string(), "no entry for key AB3F9");
    }

    #[test]
    fn timeout_display() {
        let err = StoreError::Timeout {
            op: "get",
            millis: 2000,
        };
        assert_eq!(err.to_string(), "store operation get timed out after 2000ms");
    }

    #[test]
    fn redis_error_converts_to_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let err: StoreError = redis_err.into();
        assert!(matches!(err, StoreError::Unavailable(ref m) if m.contains("connection refused")));
    }
}
