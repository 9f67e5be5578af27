//! Error types for the sync engine.

use driftsync_core::CoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the sync engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The host's connector reported a failure. Always retryable.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// The local database failed.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// An upload pass saw the same queue head twice, meaning the connector
    /// returned success without completing the transaction it was given.
    #[error("connector reported success without completing the pending transaction")]
    UploadStalled,

    /// The sync client's tasks have shut down.
    #[error("sync client is stopped")]
    Stopped,
}

/// Failure reported by a [`crate::BackendConnector`] implementation.
///
/// The code is host-defined; the engine treats every connector error as
/// transient and surfaces it through the sync status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connector error {code}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct ConnectorError {
    /// Host-defined error code.
    pub code: i32,
    /// Optional human-readable description.
    pub message: Option<String>,
}

impl ConnectorError {
    /// Creates a connector error with a message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Error used when a connector drops a completion handle without completing
    /// it.
    pub(crate) fn abandoned() -> Self {
        Self::new(-1, "completion handle dropped without being completed")
    }
}

/// Misuse of a completion handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// The handle was already completed.
    #[error("completion handle was already completed")]
    AlreadyCompleted,

    /// The handle was dropped without being completed.
    #[error("completion handle was abandoned")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_error_display() {
        let err = ConnectorError::new(401, "token expired");
        assert_eq!(err.to_string(), "connector error 401: token expired");

        let bare = ConnectorError {
            code: 7,
            message: None,
        };
        assert_eq!(bare.to_string(), "connector error 7");
    }
}
