//! # DriftSync FFI
//!
//! Stable C ABI for DriftSync bindings (Dart, Swift, Kotlin).
//!
//! This crate provides:
//! - C-compatible function exports over the core database and sync engine
//! - Generation-tagged `u64` handles instead of raw pointers
//! - Error code mapping with a per-thread last-error message
//! - An embedded runtime so hosts need no async executor of their own
//!
//! Every export returns a [`DriftSyncResult`]; on failure the message is
//! available through [`driftsync_last_error_message`] until the next call on
//! the same thread.

#![warn(missing_docs)]

mod completion;
mod crud;
mod database;
mod error;
mod handles;
mod logger;
mod runtime;
mod status;
mod strings;
mod sync;

pub use completion::{
    driftsync_completion_complete_credentials, driftsync_completion_complete_empty,
    driftsync_completion_complete_error, driftsync_completion_free,
};
pub use crud::{
    driftsync_crud_complete, driftsync_crud_iter_current_json, driftsync_crud_iter_free,
    driftsync_crud_iter_new, driftsync_crud_iter_next,
};
pub use database::{
    driftsync_db_close, driftsync_db_free, driftsync_db_open, driftsync_db_open_in_memory,
    driftsync_db_reader, driftsync_db_watch_status, driftsync_db_watch_tables,
    driftsync_db_writer, driftsync_lease_exec, driftsync_lease_free, driftsync_lease_query_json,
    driftsync_watcher_free, DriftSyncCallback,
};
pub use error::{
    driftsync_clear_error, driftsync_last_error_message, DriftSyncResult,
};
pub use logger::{driftsync_install_logger, DriftSyncLogCallback};
pub use status::{
    driftsync_db_status, driftsync_status_free, driftsync_status_read,
    driftsync_status_streams_json, DriftSyncStatusView,
};
pub use strings::driftsync_string_free;
pub use sync::{
    driftsync_db_connect, driftsync_db_disconnect, driftsync_db_start_sync,
    driftsync_db_trigger_upload, DriftSyncConnector,
};
