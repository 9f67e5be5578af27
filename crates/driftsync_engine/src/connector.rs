//! The host-implemented backend connector and its async bridge.
//!
//! Hosts (often on the far side of an FFI boundary) implement
//! [`BackendConnector`] in callback style: each method receives a
//! [`CompletionHandle`] and completes it whenever its work finishes, on any
//! thread. [`ConnectorBridge`] turns that into plain async calls for the engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::completion::CompletionHandle;
use crate::error::{CompletionError, ConnectorError};

/// Credentials for reaching the sync backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Backend endpoint URL.
    pub endpoint: String,
    /// Authentication token.
    pub token: String,
}

/// Host-side integration point for authentication and uploads.
///
/// Methods may be called concurrently and must not block; long work belongs on
/// the host's own threads, with the handle completed when it finishes.
pub trait BackendConnector: Send + Sync {
    /// Obtains fresh credentials. Called for every connection attempt; the
    /// engine never caches the result.
    fn fetch_token(&self, handle: CompletionHandle<Credentials>);

    /// Uploads pending local writes. The host enumerates the database's CRUD
    /// transactions and completes each one it has durably uploaded, then
    /// completes `handle`. Completing without having completed any transaction
    /// is reported as an upload failure.
    fn upload_data(&self, handle: CompletionHandle<()>);
}

/// Async view over a [`BackendConnector`].
#[derive(Clone)]
pub struct ConnectorBridge {
    connector: Arc<dyn BackendConnector>,
}

impl ConnectorBridge {
    /// Wraps `connector`.
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self { connector }
    }

    /// Calls [`BackendConnector::fetch_token`] and waits for its completion.
    pub async fn fetch_token(&self) -> Result<Credentials, ConnectorError> {
        let (handle, future) = CompletionHandle::channel();
        self.connector.fetch_token(handle);
        flatten(future.wait().await)
    }

    /// Calls [`BackendConnector::upload_data`] and waits for its completion.
    pub async fn upload_data(&self) -> Result<(), ConnectorError> {
        let (handle, future) = CompletionHandle::channel();
        self.connector.upload_data(handle);
        flatten(future.wait().await)
    }
}

fn flatten<T>(
    outcome: Result<Result<T, ConnectorError>, CompletionError>,
) -> Result<T, ConnectorError> {
    match outcome {
        Ok(result) => result,
        Err(_) => Err(ConnectorError::abandoned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticConnector;

    impl BackendConnector for StaticConnector {
        fn fetch_token(&self, handle: CompletionHandle<Credentials>) {
            handle
                .complete_ok(Credentials {
                    endpoint: "https://sync.example".into(),
                    token: "tok".into(),
                })
                .unwrap();
        }

        fn upload_data(&self, handle: CompletionHandle<()>) {
            drop(handle);
        }
    }

    #[tokio::test]
    async fn bridge_delivers_token() {
        let bridge = ConnectorBridge::new(Arc::new(StaticConnector));
        let creds = bridge.fetch_token().await.unwrap();
        assert_eq!(creds.endpoint, "https://sync.example");
    }

    #[tokio::test]
    async fn abandoned_handle_becomes_connector_error() {
        let bridge = ConnectorBridge::new(Arc::new(StaticConnector));
        let err = bridge.upload_data().await.unwrap_err();
        assert_eq!(err.code, -1);
    }
}
