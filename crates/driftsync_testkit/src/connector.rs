//! A scriptable backend connector for engine and FFI tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use driftsync_core::Database;
use driftsync_engine::{
    BackendConnector, CompletionHandle, ConnectorError, Credentials,
};
use parking_lot::Mutex;

/// What one `upload_data` call should do.
#[derive(Debug, Clone)]
pub enum UploadScript {
    /// Complete the oldest pending CRUD transaction, then report success.
    CompleteNext,
    /// Like [`UploadScript::CompleteNext`], recording a write checkpoint.
    CompleteNextWithCheckpoint(i64),
    /// Report failure without touching the queue.
    Fail(ConnectorError),
    /// Report success without completing anything. The engine must detect the
    /// unchanged queue head.
    SkipCompletion,
}

/// Connector whose behavior is scripted per call.
///
/// `fetch_token` pops from the token script (falling back to a fixed test
/// credential); `upload_data` pops from the upload script (falling back to
/// [`UploadScript::CompleteNext`]). All calls are counted.
pub struct ScriptedConnector {
    db: Database,
    token_script: Mutex<VecDeque<Result<Credentials, ConnectorError>>>,
    upload_script: Mutex<VecDeque<UploadScript>>,
    fetch_count: AtomicUsize,
    upload_count: AtomicUsize,
}

impl ScriptedConnector {
    /// Creates a connector operating on `db` with empty scripts.
    pub fn new(db: Database) -> Arc<Self> {
        Arc::new(Self {
            db,
            token_script: Mutex::new(VecDeque::new()),
            upload_script: Mutex::new(VecDeque::new()),
            fetch_count: AtomicUsize::new(0),
            upload_count: AtomicUsize::new(0),
        })
    }

    /// Queues an outcome for the next unscripted `fetch_token` call.
    pub fn script_token(&self, outcome: Result<Credentials, ConnectorError>) {
        self.token_script.lock().push_back(outcome);
    }

    /// Queues a behavior for the next unscripted `upload_data` call.
    pub fn script_upload(&self, script: UploadScript) {
        self.upload_script.lock().push_back(script);
    }

    /// Number of `fetch_token` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Number of `upload_data` calls so far.
    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::SeqCst)
    }

    /// The fallback credential handed out when no token is scripted.
    pub fn default_credentials() -> Credentials {
        Credentials {
            endpoint: "https://sync.test".into(),
            token: "test-token".into(),
        }
    }
}

impl BackendConnector for ScriptedConnector {
    fn fetch_token(&self, handle: CompletionHandle<Credentials>) {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .token_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::default_credentials()));
        let _ = handle.complete(outcome);
    }

    fn upload_data(&self, handle: CompletionHandle<()>) {
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        let script = self
            .upload_script
            .lock()
            .pop_front()
            .unwrap_or(UploadScript::CompleteNext);
        let db = self.db.clone();

        // upload_data must not block; finish the scripted work on the runtime.
        tokio::spawn(async move {
            let outcome = match script {
                UploadScript::Fail(err) => Err(err),
                UploadScript::SkipCompletion => Ok(()),
                UploadScript::CompleteNext => complete_next(&db, None).await,
                UploadScript::CompleteNextWithCheckpoint(cp) => {
                    complete_next(&db, Some(cp)).await
                }
            };
            let _ = handle.complete(outcome);
        });
    }
}

async fn complete_next(db: &Database, checkpoint: Option<i64>) -> Result<(), ConnectorError> {
    let result = async {
        let Some(tx) = db.crud_transactions().next_transaction().await? else {
            return Ok(());
        };
        match checkpoint {
            Some(cp) => tx.complete_with_checkpoint(cp).await,
            None => tx.complete().await,
        }
    }
    .await;

    result.map_err(|err: driftsync_core::CoreError| ConnectorError::new(500, err.to_string()))
}
