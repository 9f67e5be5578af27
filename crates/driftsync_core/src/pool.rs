//! Leased connection pool over a single SQLite database.
//!
//! The pool holds one write connection and a bounded set of read connections.
//! Leases are handed out through [`tokio::sync::Semaphore`] permits, so any
//! number of tasks can wait without blocking a thread. A [`LeasedConnection`]
//! dereferences to [`rusqlite::Connection`] and returns the connection to the
//! pool on drop.
//!
//! For file-backed databases the writer runs in WAL mode and readers are opened
//! `query_only`, so reads proceed concurrently with the single writer. An
//! in-memory database has exactly one connection and every lease, read or
//! write, serializes on it.

use std::collections::HashSet;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::hooks::Action;
use rusqlite::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::error::{CoreResult, PoolError};

/// Default number of read connections for file-backed databases.
pub const DEFAULT_READER_COUNT: usize = 5;

const BUSY_TIMEOUT_MS: u64 = 30_000;
const JOURNAL_SIZE_LIMIT: u64 = 6 * 1024 * 1024;
const CACHE_SIZE_KIB: i64 = -50_000;

/// How the pool opens its connections.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Path of the database file, or `None` for an in-memory database.
    pub path: Option<PathBuf>,
    /// Number of read connections (ignored for in-memory databases).
    pub reader_count: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            path: None,
            reader_count: DEFAULT_READER_COUNT,
        }
    }
}

impl PoolConfig {
    fn in_memory(&self) -> bool {
        self.path.is_none()
    }
}

/// Run on the write connection just before it returns to the pool, with the set
/// of tables changed while the lease was held.
pub(crate) type WriterReleaseFn = Box<dyn Fn(&Connection, HashSet<String>) + Send + Sync>;

struct PoolShared {
    config: PoolConfig,
    writer: Mutex<Option<Connection>>,
    writer_permit: Arc<Semaphore>,
    idle_readers: Mutex<Vec<Connection>>,
    reader_permits: Arc<Semaphore>,
    /// Tables touched on the write connection, collected by the update hook.
    changed_tables: Arc<Mutex<HashSet<String>>>,
    on_writer_release: Mutex<Option<WriterReleaseFn>>,
}

/// Pool of SQLite connections with leased access.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Opens the pool: creates the write connection eagerly and installs the
    /// update hook that records changed tables. Read connections are created on
    /// demand, up to `config.reader_count`.
    pub fn open(config: PoolConfig) -> CoreResult<Self> {
        let changed_tables = Arc::new(Mutex::new(HashSet::new()));

        let writer = match &config.path {
            Some(path) => {
                let conn = Connection::open(path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "journal_size_limit", JOURNAL_SIZE_LIMIT)?;
                apply_common_pragmas(&conn)?;
                conn
            }
            None => {
                let conn = Connection::open_in_memory()?;
                apply_common_pragmas(&conn)?;
                conn
            }
        };

        let hook_tables = Arc::clone(&changed_tables);
        writer.update_hook(Some(
            move |_action: Action, _db: &str, table: &str, _rowid: i64| {
                hook_tables.lock().insert(table.to_owned());
            },
        ));

        let reader_count = if config.in_memory() {
            0
        } else {
            config.reader_count.max(1)
        };

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                writer: Mutex::new(Some(writer)),
                writer_permit: Arc::new(Semaphore::new(1)),
                idle_readers: Mutex::new(Vec::new()),
                reader_permits: Arc::new(Semaphore::new(reader_count)),
                changed_tables,
                on_writer_release: Mutex::new(None),
            }),
        })
    }

    /// Installs the callback invoked each time a write lease is released.
    pub(crate) fn set_writer_release(&self, f: WriterReleaseFn) {
        *self.shared.on_writer_release.lock() = Some(f);
    }

    /// Acquires the write lease, waiting until the current holder releases it.
    pub async fn writer(&self) -> Result<LeasedConnection, PoolError> {
        let permit = Arc::clone(&self.shared.writer_permit)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        self.lease_writer_slot(permit, LeaseKind::Write)
    }

    /// Like [`Self::writer`], but fails with [`PoolError::LeaseTimeout`] if the
    /// lease is not available within `timeout`.
    pub async fn writer_timeout(&self, timeout: Duration) -> Result<LeasedConnection, PoolError> {
        tokio::time::timeout(timeout, self.writer())
            .await
            .map_err(|_| PoolError::LeaseTimeout)?
    }

    /// Acquires a read lease. For an in-memory database this takes the single
    /// connection instead. Fails with [`PoolError::Closed`] on a closed pool
    /// and with a storage error when a read connection cannot be opened.
    pub async fn reader(&self) -> CoreResult<LeasedConnection> {
        if self.shared.config.in_memory() {
            let permit = Arc::clone(&self.shared.writer_permit)
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?;
            return Ok(self.lease_writer_slot(permit, LeaseKind::Read)?);
        }

        let permit = Arc::clone(&self.shared.reader_permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let conn = match self.shared.idle_readers.lock().pop() {
            Some(conn) => conn,
            None => self.open_reader()?,
        };
        Ok(LeasedConnection {
            conn: Some(conn),
            kind: LeaseKind::Read,
            slot: Slot::Reader,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Like [`Self::reader`], but fails with [`PoolError::LeaseTimeout`] if no
    /// lease becomes available within `timeout`.
    pub async fn reader_timeout(&self, timeout: Duration) -> CoreResult<LeasedConnection> {
        tokio::time::timeout(timeout, self.reader())
            .await
            .map_err(|_| PoolError::LeaseTimeout)?
    }

    /// Closes the pool. Pending and future lease requests fail with
    /// [`PoolError::Closed`]; outstanding leases finish their work and their
    /// connections are discarded on release.
    pub fn close(&self) {
        self.shared.writer_permit.close();
        self.shared.reader_permits.close();
        self.shared.idle_readers.lock().clear();
        self.shared.writer.lock().take();
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.writer_permit.is_closed()
    }

    fn lease_writer_slot(
        &self,
        permit: OwnedSemaphorePermit,
        kind: LeaseKind,
    ) -> Result<LeasedConnection, PoolError> {
        let conn = self.shared.writer.lock().take().ok_or(PoolError::Closed)?;
        Ok(LeasedConnection {
            conn: Some(conn),
            kind,
            slot: Slot::Writer,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    fn open_reader(&self) -> CoreResult<Connection> {
        // reader() only reaches this for file-backed pools.
        let path = self.shared.config.path.as_deref().ok_or(PoolError::Closed)?;
        let conn = Connection::open(path)?;
        apply_common_pragmas(&conn)?;
        conn.pragma_update(None, "query_only", true)?;
        Ok(conn)
    }
}

fn apply_common_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)?;
    conn.pragma_update(None, "cache_size", CACHE_SIZE_KIB)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Writer,
    Reader,
}

/// An exclusive lease on one pooled connection. Dropping it returns the
/// connection; for write leases this also rolls back any transaction left open
/// and runs the writer-release callback with the changed tables.
pub struct LeasedConnection {
    conn: Option<Connection>,
    kind: LeaseKind,
    slot: Slot,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for LeasedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedConnection")
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl LeasedConnection {
    /// Whether this lease may write.
    pub fn is_writer(&self) -> bool {
        self.kind == LeaseKind::Write
    }
}

impl Deref for LeasedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("present until drop")
    }
}

impl DerefMut for LeasedConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("present until drop")
    }
}

impl Drop for LeasedConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.kind == LeaseKind::Write {
            if !conn.is_autocommit() {
                warn!("write lease dropped with an open transaction, rolling back");
                let _ = conn.execute_batch("ROLLBACK");
            }
            let changed = mem::take(&mut *self.shared.changed_tables.lock());
            if let Some(on_release) = &*self.shared.on_writer_release.lock() {
                on_release(&conn, changed);
            }
        }

        if self.shared.writer_permit.is_closed() {
            return;
        }
        match self.slot {
            Slot::Writer => *self.shared.writer.lock() = Some(conn),
            Slot::Reader => self.shared.idle_readers.lock().push(conn),
        }
        // The permit is released when the struct's fields drop, after the
        // connection is back in its slot.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn memory_pool() -> ConnectionPool {
        ConnectionPool::open(PoolConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn writer_lease_is_exclusive() {
        let pool = memory_pool();

        let lease = pool.writer().await.unwrap();
        let err = pool
            .writer_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::LeaseTimeout);

        drop(lease);
        pool.writer().await.unwrap();
    }

    #[tokio::test]
    async fn file_pool_reads_while_writer_held() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(PoolConfig {
            path: Some(dir.path().join("test.db")),
            reader_count: 2,
        })
        .unwrap();

        let writer = pool.writer().await.unwrap();
        writer
            .execute_batch("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('a');")
            .unwrap();
        drop(writer);

        let _writer = pool.writer().await.unwrap();
        let reader = pool.reader().await.unwrap();
        let count: i64 = reader
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn readers_are_query_only() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(PoolConfig {
            path: Some(dir.path().join("test.db")),
            reader_count: 1,
        })
        .unwrap();

        let reader = pool.reader().await.unwrap();
        assert!(reader.execute_batch("CREATE TABLE nope (v TEXT)").is_err());
    }

    #[tokio::test]
    async fn reader_open_failure_surfaces_storage_error() {
        use crate::error::CoreError;

        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("sub");
        std::fs::create_dir(&db_dir).unwrap();
        let pool = ConnectionPool::open(PoolConfig {
            path: Some(db_dir.join("test.db")),
            reader_count: 1,
        })
        .unwrap();

        // The writer keeps its open file descriptor, but a new read connection
        // can no longer be created once the directory is gone.
        std::fs::remove_dir_all(&db_dir).unwrap();
        let err = pool.reader().await.unwrap_err();
        assert!(matches!(err, CoreError::Sqlite(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_leases() {
        let pool = memory_pool();
        let held = pool.writer().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.writer().await })
        };

        pool.close();
        assert_eq!(waiter.await.unwrap().unwrap_err(), PoolError::Closed);
        assert_eq!(pool.writer().await.unwrap_err(), PoolError::Closed);

        // The held lease still works and its release is a no-op.
        held.execute_batch("CREATE TABLE t (v TEXT)").unwrap();
        drop(held);
    }

    #[tokio::test]
    async fn writer_release_reports_changed_tables() {
        let pool = memory_pool();
        let saw_change = Arc::new(AtomicBool::new(false));

        let saw = Arc::clone(&saw_change);
        pool.set_writer_release(Box::new(move |_conn, changed| {
            if changed.contains("t") {
                saw.store(true, Ordering::SeqCst);
            }
        }));

        let writer = pool.writer().await.unwrap();
        writer
            .execute_batch("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('x');")
            .unwrap();
        drop(writer);

        assert!(saw_change.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn open_transaction_rolls_back_on_drop() {
        let pool = memory_pool();

        let writer = pool.writer().await.unwrap();
        writer
            .execute_batch("CREATE TABLE t (v TEXT); BEGIN; INSERT INTO t VALUES ('x');")
            .unwrap();
        drop(writer);

        let reader = pool.reader().await.unwrap();
        let count: i64 = reader
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
