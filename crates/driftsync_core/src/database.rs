//! The database facade: schema application, leases, watchers, CRUD queue, and
//! sync status for one SQLite file.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::crud::CrudQueue;
use crate::error::{CoreResult, PoolError};
use crate::pool::{ConnectionPool, LeasedConnection, PoolConfig, DEFAULT_READER_COUNT};
use crate::schema::{Schema, TX_TABLE};
use crate::status::{SyncStatus, SyncStatusTracker};
use crate::watch::{CallbackListeners, WatchHandle};

/// Options for [`Database::open`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Path of the database file, or `None` for an in-memory database.
    pub path: Option<PathBuf>,
    /// Number of read connections (file-backed databases only).
    pub reader_count: usize,
    /// When set, plain `read_lease`/`write_lease` calls give up after this long
    /// instead of waiting indefinitely.
    pub lease_timeout: Option<Duration>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            path: None,
            reader_count: DEFAULT_READER_COUNT,
            lease_timeout: None,
        }
    }
}

impl DatabaseOptions {
    /// Options for a file-backed database at `path`.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

struct DbShared {
    pool: ConnectionPool,
    lease_timeout: Option<Duration>,
    schema: Schema,
    table_listeners: CallbackListeners<HashSet<String>>,
    status: SyncStatusTracker,
    crud: CrudQueue,
}

/// Handle to one open driftsync database. Cheap to clone; all clones share the
/// same pool, watchers, and status.
#[derive(Clone)]
pub struct Database {
    shared: Arc<DbShared>,
}

impl Database {
    /// Opens (creating if necessary) the database described by `options` and
    /// applies `schema`: tables, views, capture triggers, and the internal
    /// bookkeeping tables.
    pub async fn open(schema: Schema, options: DatabaseOptions) -> CoreResult<Self> {
        schema.validate()?;

        let pool = ConnectionPool::open(PoolConfig {
            path: options.path.clone(),
            reader_count: options.reader_count,
        })?;

        {
            let writer = pool.writer().await?;
            writer.execute_batch(&schema.create_statements())?;
        }

        let table_listeners = CallbackListeners::new();

        // Tables with a view override notify under both names.
        let view_names: HashMap<String, String> = schema
            .tables
            .iter()
            .filter_map(|t| Some((t.name.clone(), t.view_name()?.to_owned())))
            .collect();
        let listeners = table_listeners.clone();
        pool.set_writer_release(Box::new(move |conn, mut changed| {
            if let Err(err) = conn.execute(
                &format!("UPDATE {TX_TABLE} SET current_tx = current_tx + 1"),
                [],
            ) {
                error!(%err, "failed to advance the transaction counter");
            }
            if changed.is_empty() {
                return;
            }
            for (table, view) in &view_names {
                if changed.contains(table) {
                    changed.insert(view.clone());
                }
            }
            debug!(tables = changed.len(), "tables changed");
            listeners.notify(&changed);
        }));

        Ok(Self {
            shared: Arc::new(DbShared {
                crud: CrudQueue::new(pool.clone()),
                pool,
                lease_timeout: options.lease_timeout,
                schema,
                table_listeners,
                status: SyncStatusTracker::new(),
            }),
        })
    }

    /// Opens an in-memory database with default options.
    pub async fn open_in_memory(schema: Schema) -> CoreResult<Self> {
        Self::open(schema, DatabaseOptions::default()).await
    }

    /// The schema this database was opened with.
    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    /// Acquires a read lease. When [`DatabaseOptions::lease_timeout`] is set
    /// this gives up with [`PoolError::LeaseTimeout`] after that long.
    pub async fn read_lease(&self) -> CoreResult<LeasedConnection> {
        match self.shared.lease_timeout {
            Some(timeout) => self.shared.pool.reader_timeout(timeout).await,
            None => self.shared.pool.reader().await,
        }
    }

    /// Acquires the write lease. When [`DatabaseOptions::lease_timeout`] is set
    /// this gives up with [`PoolError::LeaseTimeout`] after that long.
    pub async fn write_lease(&self) -> CoreResult<LeasedConnection> {
        match self.shared.lease_timeout {
            Some(timeout) => Ok(self.shared.pool.writer_timeout(timeout).await?),
            None => Ok(self.shared.pool.writer().await?),
        }
    }

    /// Acquires a read lease, failing with [`PoolError::LeaseTimeout`] after
    /// `timeout`.
    pub async fn read_lease_timeout(&self, timeout: Duration) -> CoreResult<LeasedConnection> {
        self.shared.pool.reader_timeout(timeout).await
    }

    /// Acquires the write lease, failing with [`PoolError::LeaseTimeout`] after
    /// `timeout`.
    pub async fn write_lease_timeout(&self, timeout: Duration) -> CoreResult<LeasedConnection> {
        Ok(self.shared.pool.writer_timeout(timeout).await?)
    }

    /// The queue of local writes awaiting upload.
    pub fn crud_transactions(&self) -> CrudQueue {
        self.shared.crud.clone()
    }

    /// Registers `callback` to run after any commit touching one of `tables`
    /// becomes durable. Names matching a table's view override work too.
    /// Notifications carry no payload and may coalesce several commits.
    #[must_use = "dropping the handle unregisters the callback"]
    pub fn watch_tables(
        &self,
        tables: impl IntoIterator<Item = impl Into<String>>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> WatchHandle {
        let watched: HashSet<String> = tables.into_iter().map(Into::into).collect();
        let handle = self.shared.table_listeners.register(move |changed| {
            if changed.iter().any(|table| watched.contains(table)) {
                callback();
            }
        });
        WatchHandle::new(handle)
    }

    /// Registers `callback` to run after every sync-status change.
    #[must_use = "dropping the handle unregisters the callback"]
    pub fn watch_status(&self, callback: impl Fn() + Send + Sync + 'static) -> WatchHandle {
        WatchHandle::new(self.shared.status.watch(callback))
    }

    /// The current sync status snapshot.
    pub fn status(&self) -> Arc<SyncStatus> {
        self.shared.status.snapshot()
    }

    /// The mutable side of the status, for the sync machinery and download
    /// collaborators.
    pub fn status_tracker(&self) -> SyncStatusTracker {
        self.shared.status.clone()
    }

    /// Closes the underlying pool. Pending and future lease requests fail with
    /// [`PoolError::Closed`]; watchers receive no further notifications once
    /// outstanding leases are released.
    pub fn close(&self) {
        self.shared.pool.close();
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.pool.is_closed()
    }
}
