//! Sync client FFI: the connector vtable, connect/disconnect, and task start.

use std::collections::HashMap;
use std::sync::Arc;

use driftsync_engine::{BackendConnector, CompletionHandle, Credentials, SyncClient};
use parking_lot::Mutex;

use crate::completion::{Completion, COMPLETIONS};
use crate::database::DATABASES;
use crate::error::{clear_last_error, engine_error, fail, DriftSyncResult};
use crate::runtime::runtime;

/// Sync clients keyed by their database handle.
static CLIENTS: Mutex<Option<HashMap<u64, SyncClient>>> = Mutex::new(None);

pub(crate) fn drop_client(db: u64) {
    if let Some(clients) = CLIENTS.lock().as_mut() {
        clients.remove(&db);
    }
}

/// Host-implemented connector callbacks.
///
/// Each callback receives `user_data` and a completion handle key; the host
/// completes the key through the `driftsync_completion_*` functions, from any
/// thread, exactly once, then frees it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DriftSyncConnector {
    /// Opaque value passed back to every callback.
    pub user_data: u64,
    /// Fetch fresh credentials; complete with `complete_credentials`.
    pub fetch_token: extern "C" fn(user_data: u64, completion: u64),
    /// Upload pending CRUD transactions; complete with `complete_empty`.
    pub upload_data: extern "C" fn(user_data: u64, completion: u64),
}

struct CConnector {
    vtable: DriftSyncConnector,
}

impl BackendConnector for CConnector {
    fn fetch_token(&self, handle: CompletionHandle<Credentials>) {
        let key = COMPLETIONS.insert(Completion::Credentials(handle));
        (self.vtable.fetch_token)(self.vtable.user_data, key);
    }

    fn upload_data(&self, handle: CompletionHandle<()>) {
        let key = COMPLETIONS.insert(Completion::Empty(handle));
        (self.vtable.upload_data)(self.vtable.user_data, key);
    }
}

/// Starts the sync background tasks for `db` on the embedded runtime.
/// Idempotent; the tasks stop when the database is closed or freed.
#[no_mangle]
pub extern "C" fn driftsync_db_start_sync(db: u64) -> DriftSyncResult {
    clear_last_error();
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };

    let mut clients = CLIENTS.lock();
    let clients = clients.get_or_insert_with(HashMap::new);
    if clients.contains_key(&db) {
        return DriftSyncResult::Ok;
    }

    let (client, tasks) = SyncClient::attach(database);
    let rt = runtime();
    tasks.spawn_with(|task| {
        rt.spawn(task);
    });
    clients.insert(db, client);
    DriftSyncResult::Ok
}

/// Connects through the host's connector. Requires a prior
/// `driftsync_db_start_sync`.
///
/// # Safety
///
/// `connector` must be a valid pointer; its callbacks must stay callable until
/// the database is closed or freed.
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_connect(
    db: u64,
    connector: *const DriftSyncConnector,
) -> DriftSyncResult {
    clear_last_error();
    if connector.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let vtable = *connector;

    with_client(db, |client| client.connect(Arc::new(CConnector { vtable })))
}

/// Tears the sync connection down.
#[no_mangle]
pub extern "C" fn driftsync_db_disconnect(db: u64) -> DriftSyncResult {
    clear_last_error();
    with_client(db, |client| client.disconnect())
}

/// Requests an upload pass, e.g. as a host-scheduled retry after a failure.
#[no_mangle]
pub extern "C" fn driftsync_db_trigger_upload(db: u64) -> DriftSyncResult {
    clear_last_error();
    with_client(db, |client| client.trigger_upload())
}

fn with_client(
    db: u64,
    f: impl FnOnce(&SyncClient) -> driftsync_engine::EngineResult<()>,
) -> DriftSyncResult {
    let clients = CLIENTS.lock();
    let Some(client) = clients.as_ref().and_then(|clients| clients.get(&db)) else {
        return fail(
            DriftSyncResult::InvalidArgument,
            "sync not started for this database",
        );
    };
    match f(client) {
        Ok(()) => DriftSyncResult::Ok,
        Err(err) => engine_error(&err),
    }
}
