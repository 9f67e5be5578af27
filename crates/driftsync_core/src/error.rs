//! Error types for the driftsync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
///
/// SQLite errors from an individual statement are local to the lease that ran the
/// statement; they never invalidate the pool or the database as a whole. Only a
/// failure while opening the database is fatal.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error reported by the underlying SQLite engine.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization error, e.g. for CRUD payloads or schema descriptions.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error acquiring a connection lease.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Invalid arguments supplied by the caller.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Errors raised by the connection pool itself, as opposed to the statements run
/// through its leases.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been closed; no further leases will be granted.
    #[error("connection pool is closed")]
    Closed,

    /// A lease could not be acquired within the configured bound.
    #[error("timed out waiting for a connection lease")]
    LeaseTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(PoolError::Closed.to_string(), "connection pool is closed");

        let err = CoreError::invalid_argument("bad table name");
        assert_eq!(err.to_string(), "invalid argument: bad table name");

        let err: CoreError = PoolError::LeaseTimeout.into();
        assert!(err.to_string().contains("timed out"));
    }
}
