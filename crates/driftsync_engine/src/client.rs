//! The sync client: command handling and the upload actor.
//!
//! [`SyncClient::attach`] yields the client handle plus two background tasks.
//! The supervisor task consumes commands (connect, disconnect, trigger an
//! upload); the upload actor drains the CRUD queue through the connector
//! whenever local writes land or an upload is requested. Retry is event-driven:
//! after a failure the actor waits for the next wakeup instead of running its
//! own timer, which keeps the engine free of executor requirements. Hosts that
//! want timed backoff call [`SyncClient::trigger_upload`] on their own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use driftsync_core::{CoreError, Database, PoolError, SyncStatusTracker};

use crate::connector::{BackendConnector, ConnectorBridge};
use crate::error::{EngineError, EngineResult};
use crate::tasks::SyncTasks;

enum Command {
    Connect(Arc<dyn BackendConnector>),
    Disconnect,
    TriggerUpload,
}

struct Shared {
    db: Database,
    status: SyncStatusTracker,
    /// Present while connected; the upload actor clones it per pass.
    bridge: Mutex<Option<ConnectorBridge>>,
    wakeup: Arc<Notify>,
    stopped: AtomicBool,
}

/// Handle controlling the sync machinery for one database.
///
/// Dropping the client stops both background tasks; in-flight work finishes
/// first and no completion handle is abandoned by the engine itself.
pub struct SyncClient {
    commands: mpsc::UnboundedSender<Command>,
    db: Database,
}

impl SyncClient {
    /// Builds a client for `db` together with its background tasks. Nothing
    /// happens until the tasks are spawned (see [`SyncTasks`]).
    pub fn attach(db: Database) -> (SyncClient, SyncTasks) {
        let wakeup = Arc::new(Notify::new());
        let shared = Arc::new(Shared {
            status: db.status_tracker(),
            db: db.clone(),
            bridge: Mutex::new(None),
            wakeup: Arc::clone(&wakeup),
            stopped: AtomicBool::new(false),
        });

        // The watch callback captures only the notifier, so the registration
        // does not keep the database alive through the shared state.
        let crud_watch = {
            let wakeup = Arc::clone(&wakeup);
            db.watch_tables(["ps_crud"], move || wakeup.notify_one())
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        let supervisor = supervisor_task(Arc::clone(&shared), receiver);
        let uploader = {
            let shared = Arc::clone(&shared);
            async move {
                let _crud_watch = crud_watch;
                upload_task(shared).await;
            }
        };

        (
            SyncClient { commands, db },
            SyncTasks::new(vec![Box::pin(supervisor), Box::pin(uploader)]),
        )
    }

    /// The database this client syncs.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Requests a connection through `connector`: fetch credentials, mark the
    /// status connected, and start uploading pending writes.
    pub fn connect(&self, connector: Arc<dyn BackendConnector>) -> EngineResult<()> {
        self.send(Command::Connect(connector))
    }

    /// Tears the connection down and disarms uploads.
    pub fn disconnect(&self) -> EngineResult<()> {
        self.send(Command::Disconnect)
    }

    /// Requests an upload pass, e.g. as a host-driven retry after a failure.
    pub fn trigger_upload(&self) -> EngineResult<()> {
        self.send(Command::TriggerUpload)
    }

    fn send(&self, command: Command) -> EngineResult<()> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::Stopped)
    }
}

async fn supervisor_task(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Connect(connector) => {
                let bridge = ConnectorBridge::new(connector);
                shared.status.set_connecting();
                match bridge.fetch_token().await {
                    Ok(credentials) => {
                        debug!(endpoint = %credentials.endpoint, "credentials fetched");
                        *shared.bridge.lock() = Some(bridge);
                        shared.status.set_connected();
                        shared.wakeup.notify_one();
                    }
                    Err(err) => {
                        warn!(%err, "connection attempt failed");
                        shared.status.set_download_error(err.to_string());
                    }
                }
            }
            Command::Disconnect => {
                shared.bridge.lock().take();
                shared.status.set_disconnected();
            }
            Command::TriggerUpload => shared.wakeup.notify_one(),
        }
        if shared.db.is_closed() {
            break;
        }
    }

    info!("sync client stopping");
    shared.stopped.store(true, Ordering::Release);
    shared.wakeup.notify_one();
}

async fn upload_task(shared: Arc<Shared>) {
    loop {
        shared.wakeup.notified().await;
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
        let Some(bridge) = shared.bridge.lock().clone() else {
            continue;
        };

        match upload_pass(&shared, &bridge).await {
            Ok(()) => {}
            Err(EngineError::Database(CoreError::Pool(PoolError::Closed))) => break,
            Err(err) => {
                warn!(%err, "upload failed");
                shared.status.set_upload_error(err.to_string());
            }
        }
    }
}

/// Drains the CRUD queue: one [`ConnectorBridge::upload_data`] call per pending
/// transaction, with the host completing transactions as it uploads them. A
/// pass that sees the same queue head twice stops; a connector that reports
/// success without completing anything would otherwise spin forever.
async fn upload_pass(shared: &Shared, bridge: &ConnectorBridge) -> EngineResult<()> {
    let queue = shared.db.crud_transactions();
    let mut last_head = None;

    loop {
        let Some(tx) = queue.next_transaction().await? else {
            shared.status.update(|status| {
                status.uploading = false;
                status.upload_error = None;
            });
            return Ok(());
        };
        let head = tx.entries[0].client_id;
        drop(tx);

        if last_head == Some(head) {
            return Err(EngineError::UploadStalled);
        }
        last_head = Some(head);

        shared.status.set_uploading(true);
        bridge.upload_data().await?;
    }
}
