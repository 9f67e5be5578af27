//! Sync status FFI functions.

use std::ffi::c_char;
use std::sync::Arc;

use driftsync_core::SyncStatus;

use crate::database::DATABASES;
use crate::error::{clear_last_error, fail, DriftSyncResult};
use crate::handles::HandleArena;
use crate::strings::into_c_string;

pub(crate) static STATUSES: HandleArena<Arc<SyncStatus>> = HandleArena::new();

/// Flat view of a status snapshot. Error text and per-stream detail come from
/// `driftsync_status_streams_json`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DriftSyncStatusView {
    /// A connection to the backend is established.
    pub connected: bool,
    /// A connection attempt is in progress.
    pub connecting: bool,
    /// A CRUD upload batch is running.
    pub uploading: bool,
    /// Download application is in progress.
    pub downloading: bool,
    /// An upload failure is recorded.
    pub has_upload_error: bool,
    /// A connection or download failure is recorded.
    pub has_download_error: bool,
}

/// Captures the current status snapshot. The snapshot never changes; take a
/// new one after a status watcher fires.
///
/// # Safety
///
/// `out_status` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_status(db: u64, out_status: *mut u64) -> DriftSyncResult {
    clear_last_error();
    if out_status.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };

    *out_status = STATUSES.insert(database.status());
    DriftSyncResult::Ok
}

/// Reads the snapshot's flags into `out_view`.
///
/// # Safety
///
/// `out_view` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_status_read(
    status: u64,
    out_view: *mut DriftSyncStatusView,
) -> DriftSyncResult {
    clear_last_error();
    if out_view.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Some(snapshot) = STATUSES.get(status) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown status handle");
    };

    *out_view = DriftSyncStatusView {
        connected: snapshot.connected,
        connecting: snapshot.connecting,
        uploading: snapshot.uploading,
        downloading: snapshot.downloading,
        has_upload_error: snapshot.upload_error.is_some(),
        has_download_error: snapshot.download_error.is_some(),
    };
    DriftSyncResult::Ok
}

/// Serializes the snapshot (stream list and error text included) as JSON.
/// Free the string with `driftsync_string_free`.
///
/// # Safety
///
/// `out_json` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_status_streams_json(
    status: u64,
    out_json: *mut *mut c_char,
) -> DriftSyncResult {
    clear_last_error();
    if out_json.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Some(snapshot) = STATUSES.get(status) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown status handle");
    };

    match serde_json::to_string(snapshot.as_ref()) {
        Ok(json) => {
            *out_json = into_c_string(json);
            DriftSyncResult::Ok
        }
        Err(err) => fail(DriftSyncResult::Json, err.to_string()),
    }
}

/// Releases a status snapshot handle.
#[no_mangle]
pub extern "C" fn driftsync_status_free(status: u64) -> DriftSyncResult {
    clear_last_error();
    match STATUSES.remove(status) {
        Some(_) => DriftSyncResult::Ok,
        None => fail(DriftSyncResult::InvalidHandle, "unknown status handle"),
    }
}
