//! Result codes and the thread-local last-error message.

use std::cell::RefCell;
use std::ffi::CString;

use driftsync_core::{CoreError, PoolError};
use driftsync_engine::{CompletionError, EngineError};

/// Result code for FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftSyncResult {
    /// Operation succeeded.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Invalid argument.
    InvalidArgument = 2,
    /// Null pointer.
    NullPointer = 3,
    /// Unknown, freed, or stale handle.
    InvalidHandle = 4,
    /// Database or pool is closed.
    Closed = 5,
    /// Timed out waiting for a connection lease.
    LeaseTimeout = 6,
    /// SQLite error.
    Sqlite = 7,
    /// JSON parse or encode error.
    Json = 8,
    /// Completion handle was already completed.
    AlreadyCompleted = 9,
    /// The sync client has stopped.
    Stopped = 10,
}

impl DriftSyncResult {
    /// Returns true if the result indicates success.
    pub fn is_ok(self) -> bool {
        self == DriftSyncResult::Ok
    }

    /// Returns true if the result indicates an error.
    pub fn is_err(self) -> bool {
        self != DriftSyncResult::Ok
    }
}

// Thread-local storage for last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub fn set_last_error(message: impl Into<String>) {
    let msg = message.into();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the last error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Records `message` and returns `code`, for one-line error returns.
pub fn fail(code: DriftSyncResult, message: impl Into<String>) -> DriftSyncResult {
    set_last_error(message);
    code
}

/// Maps a core error to a result code, recording its message.
pub fn core_error(err: &CoreError) -> DriftSyncResult {
    set_last_error(err.to_string());
    match err {
        CoreError::Sqlite(_) => DriftSyncResult::Sqlite,
        CoreError::Json(_) => DriftSyncResult::Json,
        CoreError::Pool(PoolError::Closed) => DriftSyncResult::Closed,
        CoreError::Pool(PoolError::LeaseTimeout) => DriftSyncResult::LeaseTimeout,
        CoreError::InvalidArgument { .. } => DriftSyncResult::InvalidArgument,
    }
}

/// Maps an engine error to a result code, recording its message.
pub fn engine_error(err: &EngineError) -> DriftSyncResult {
    match err {
        EngineError::Database(core) => core_error(core),
        EngineError::Stopped => fail(DriftSyncResult::Stopped, err.to_string()),
        _ => fail(DriftSyncResult::Error, err.to_string()),
    }
}

/// Maps a completion misuse error to a result code, recording its message.
pub fn completion_error(err: CompletionError) -> DriftSyncResult {
    set_last_error(err.to_string());
    match err {
        CompletionError::AlreadyCompleted => DriftSyncResult::AlreadyCompleted,
        CompletionError::Abandoned => DriftSyncResult::Error,
    }
}

/// Gets the last error message as a C string.
///
/// Returns null if no error is set.
///
/// # Safety
///
/// The returned pointer is valid until the next FFI call on this thread.
#[no_mangle]
pub extern "C" fn driftsync_last_error_message() -> *const std::ffi::c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Clears the last error message.
#[no_mangle]
pub extern "C" fn driftsync_clear_error() {
    clear_last_error();
}
