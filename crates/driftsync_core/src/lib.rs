//! # driftsync core
//!
//! Local coordination layer for offline-first SQLite apps.
//!
//! This crate provides:
//! - Leased connection pool (one writer, pooled readers) over a SQLite file
//! - Schema application with trigger-based capture of local writes
//! - Durable CRUD queue grouping writes into upload transactions
//! - Change-watch registry with strict unregistration semantics
//! - Sync status snapshots and their tracker
//! - A process-wide installable log sink for embedding hosts
//!
//! ## Key invariants
//!
//! - At most one writer lease exists at any time
//! - Change notifications fire only after the commit is durable
//! - A watcher never runs after its handle's drop returns
//! - CRUD completion is monotonic; completed entries never reappear

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crud;
mod database;
mod error;
pub mod logger;
mod pool;
mod schema;
mod status;
mod watch;

pub use crud::{CrudEntry, CrudQueue, CrudTransaction, UpdateKind};
pub use database::{Database, DatabaseOptions};
pub use error::{CoreError, CoreResult, PoolError};
pub use pool::{ConnectionPool, LeasedConnection, PoolConfig, DEFAULT_READER_COUNT};
pub use schema::{Column, ColumnType, Schema, Table, TableOptions};
pub use status::{ProgressCounters, SyncStatus, SyncStatusTracker, SyncStreamStatus};
pub use watch::{CallbackListeners, ListenerHandle, WatchHandle};

// The SQL layer is rusqlite's; re-export it so lease users name types from one
// place.
pub use rusqlite;
