//! Completion handle FFI functions.

use std::ffi::c_char;

use driftsync_engine::{CompletionHandle, ConnectorError, Credentials};

use crate::error::{clear_last_error, completion_error, fail, DriftSyncResult};
use crate::handles::HandleArena;
use crate::strings::borrow_str;

/// A pending completion, typed by what it carries.
#[derive(Clone)]
pub(crate) enum Completion {
    /// Outcome of a `fetch_token` call.
    Credentials(CompletionHandle<Credentials>),
    /// Outcome of an `upload_data` call.
    Empty(CompletionHandle<()>),
}

pub(crate) static COMPLETIONS: HandleArena<Completion> = HandleArena::new();

/// Completes a `fetch_token` request with credentials. The handle stays
/// allocated until `driftsync_completion_free`; a second completion fails with
/// `AlreadyCompleted`.
///
/// # Safety
///
/// `endpoint` and `token` must be valid null-terminated UTF-8 strings.
#[no_mangle]
pub unsafe extern "C" fn driftsync_completion_complete_credentials(
    completion: u64,
    endpoint: *const c_char,
    token: *const c_char,
) -> DriftSyncResult {
    clear_last_error();
    if endpoint.is_null() || token.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let (Ok(endpoint), Ok(token)) = (borrow_str(endpoint), borrow_str(token)) else {
        return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 argument");
    };

    match COMPLETIONS.get(completion) {
        None => fail(DriftSyncResult::InvalidHandle, "unknown completion handle"),
        Some(Completion::Empty(_)) => fail(
            DriftSyncResult::InvalidArgument,
            "completion handle does not carry credentials",
        ),
        Some(Completion::Credentials(handle)) => {
            match handle.complete_ok(Credentials {
                endpoint: endpoint.to_owned(),
                token: token.to_owned(),
            }) {
                Ok(()) => DriftSyncResult::Ok,
                Err(err) => completion_error(err),
            }
        }
    }
}

/// Completes an `upload_data` request successfully.
#[no_mangle]
pub extern "C" fn driftsync_completion_complete_empty(completion: u64) -> DriftSyncResult {
    clear_last_error();
    match COMPLETIONS.get(completion) {
        None => fail(DriftSyncResult::InvalidHandle, "unknown completion handle"),
        Some(Completion::Credentials(_)) => fail(
            DriftSyncResult::InvalidArgument,
            "completion handle carries credentials",
        ),
        Some(Completion::Empty(handle)) => match handle.complete_ok(()) {
            Ok(()) => DriftSyncResult::Ok,
            Err(err) => completion_error(err),
        },
    }
}

/// Completes either kind of request with a connector error.
///
/// # Safety
///
/// `message` must be null or a valid null-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn driftsync_completion_complete_error(
    completion: u64,
    code: i32,
    message: *const c_char,
) -> DriftSyncResult {
    clear_last_error();
    let message = if message.is_null() {
        None
    } else {
        match borrow_str(message) {
            Ok(message) => Some(message.to_owned()),
            Err(_) => {
                return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 in message")
            }
        }
    };
    let error = ConnectorError { code, message };

    let completed = match COMPLETIONS.get(completion) {
        None => return fail(DriftSyncResult::InvalidHandle, "unknown completion handle"),
        Some(Completion::Credentials(handle)) => handle.complete_err(error),
        Some(Completion::Empty(handle)) => handle.complete_err(error),
    };
    match completed {
        Ok(()) => DriftSyncResult::Ok,
        Err(err) => completion_error(err),
    }
}

/// Releases a completion handle. Freeing an uncompleted handle resolves the
/// waiting engine operation as abandoned.
#[no_mangle]
pub extern "C" fn driftsync_completion_free(completion: u64) -> DriftSyncResult {
    clear_last_error();
    match COMPLETIONS.remove(completion) {
        Some(_) => DriftSyncResult::Ok,
        None => fail(DriftSyncResult::InvalidHandle, "unknown completion handle"),
    }
}
