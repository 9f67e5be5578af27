//! CRUD queue FFI functions.

use std::ffi::c_char;

use driftsync_core::{CrudQueue, CrudTransaction};

use crate::database::DATABASES;
use crate::error::{clear_last_error, core_error, fail, DriftSyncResult};
use crate::handles::HandleArena;
use crate::runtime::block_on;
use crate::strings::into_c_string;

pub(crate) static CRUD_ITERS: HandleArena<CrudIter> = HandleArena::new();

/// Enumerator over pending CRUD transactions.
pub struct CrudIter {
    queue: CrudQueue,
    current: Option<CrudTransaction>,
}

/// Creates a CRUD transaction enumerator for the database.
///
/// # Safety
///
/// `out_iter` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_crud_iter_new(db: u64, out_iter: *mut u64) -> DriftSyncResult {
    clear_last_error();
    if out_iter.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };

    *out_iter = CRUD_ITERS.insert(CrudIter {
        queue: database.crud_transactions(),
        current: None,
    });
    DriftSyncResult::Ok
}

/// Loads the oldest pending transaction as the iterator's current element.
/// `out_has_current` is false when the queue is empty; the queue is
/// restartable, so a later call can find new entries.
///
/// # Safety
///
/// `out_has_current` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_crud_iter_next(
    iter: u64,
    out_has_current: *mut bool,
) -> DriftSyncResult {
    clear_last_error();
    if out_has_current.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }

    // The queue hits the database, so run it outside the arena lock.
    let Some(queue) = CRUD_ITERS.with(iter, |iter| iter.queue.clone()) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown iterator handle");
    };
    match block_on(queue.next_transaction()) {
        Ok(tx) => {
            let has_current = tx.is_some();
            if CRUD_ITERS.with(iter, |iter| iter.current = tx).is_none() {
                return fail(DriftSyncResult::InvalidHandle, "unknown iterator handle");
            }
            *out_has_current = has_current;
            DriftSyncResult::Ok
        }
        Err(err) => core_error(&err),
    }
}

/// Serializes the current transaction:
/// `{"tx_id", "last_item_id", "entries": [{"client_id", "op", "type", "id", ...}]}`.
/// Free the string with `driftsync_string_free`.
///
/// # Safety
///
/// `out_json` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_crud_iter_current_json(
    iter: u64,
    out_json: *mut *mut c_char,
) -> DriftSyncResult {
    clear_last_error();
    if out_json.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }

    let serialized = CRUD_ITERS.with(iter, |iter| {
        iter.current.as_ref().map(|tx| {
            let entries: Vec<serde_json::Value> = tx
                .entries
                .iter()
                .map(|entry| {
                    let mut value = serde_json::to_value(entry).unwrap_or_default();
                    value["client_id"] = entry.client_id.into();
                    value
                })
                .collect();
            serde_json::json!({
                "tx_id": tx.tx_id,
                "last_item_id": tx.last_client_id(),
                "entries": entries,
            })
            .to_string()
        })
    });
    match serialized {
        None => fail(DriftSyncResult::InvalidHandle, "unknown iterator handle"),
        Some(None) => fail(
            DriftSyncResult::InvalidArgument,
            "iterator has no current transaction",
        ),
        Some(Some(json)) => {
            *out_json = into_c_string(json);
            DriftSyncResult::Ok
        }
    }
}

/// Releases a CRUD iterator.
#[no_mangle]
pub extern "C" fn driftsync_crud_iter_free(iter: u64) -> DriftSyncResult {
    clear_last_error();
    match CRUD_ITERS.remove(iter) {
        Some(_) => DriftSyncResult::Ok,
        None => fail(DriftSyncResult::InvalidHandle, "unknown iterator handle"),
    }
}

/// Marks every entry up to `last_item_id` as uploaded. When `has_checkpoint`
/// is true and the queue drains, `checkpoint` is recorded as the write
/// checkpoint.
#[no_mangle]
pub extern "C" fn driftsync_crud_complete(
    db: u64,
    last_item_id: i64,
    has_checkpoint: bool,
    checkpoint: i64,
) -> DriftSyncResult {
    clear_last_error();
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };

    let checkpoint = has_checkpoint.then_some(checkpoint);
    match block_on(
        database
            .crud_transactions()
            .complete_up_to(last_item_id, checkpoint),
    ) {
        Ok(()) => DriftSyncResult::Ok,
        Err(err) => core_error(&err),
    }
}
