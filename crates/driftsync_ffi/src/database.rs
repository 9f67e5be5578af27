//! Database, lease, and watcher FFI functions.

use std::ffi::c_char;
use std::path::PathBuf;
use std::sync::Arc;

use driftsync_core::rusqlite::types::ValueRef;
use driftsync_core::{
    Database, DatabaseOptions, LeasedConnection, Schema, WatchHandle,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{clear_last_error, core_error, fail, DriftSyncResult};
use crate::handles::HandleArena;
use crate::runtime::block_on;
use crate::strings::{borrow_str, into_c_string};
use crate::sync;

pub(crate) static DATABASES: HandleArena<Database> = HandleArena::new();
// Each lease carries its own lock so SQL on one lease never blocks another.
pub(crate) static LEASES: HandleArena<Arc<Mutex<LeasedConnection>>> = HandleArena::new();
pub(crate) static WATCHERS: HandleArena<WatchHandle> = HandleArena::new();

/// Callback invoked with the token passed at registration time.
pub type DriftSyncCallback = extern "C" fn(token: u64);

unsafe fn open_database(
    path: Option<PathBuf>,
    schema_json: *const c_char,
    out_db: *mut u64,
) -> DriftSyncResult {
    let Ok(schema_json) = borrow_str(schema_json) else {
        return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 in schema");
    };
    let schema: Schema = match serde_json::from_str(schema_json) {
        Ok(schema) => schema,
        Err(err) => return fail(DriftSyncResult::Json, format!("invalid schema: {err}")),
    };

    let options = DatabaseOptions {
        path,
        ..DatabaseOptions::default()
    };
    match block_on(Database::open(schema, options)) {
        Ok(db) => {
            *out_db = DATABASES.insert(db);
            DriftSyncResult::Ok
        }
        Err(err) => core_error(&err),
    }
}

/// Opens (creating if necessary) a file-backed database.
///
/// # Safety
///
/// - `path` and `schema_json` must be valid null-terminated UTF-8 strings
/// - `out_db` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_open(
    path: *const c_char,
    schema_json: *const c_char,
    out_db: *mut u64,
) -> DriftSyncResult {
    clear_last_error();
    if path.is_null() || schema_json.is_null() || out_db.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Ok(path) = borrow_str(path) else {
        return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 in path");
    };
    open_database(Some(PathBuf::from(path)), schema_json, out_db)
}

/// Opens an in-memory database.
///
/// # Safety
///
/// - `schema_json` must be a valid null-terminated UTF-8 string
/// - `out_db` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_open_in_memory(
    schema_json: *const c_char,
    out_db: *mut u64,
) -> DriftSyncResult {
    clear_last_error();
    if schema_json.is_null() || out_db.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    open_database(None, schema_json, out_db)
}

/// Closes the database: pending and future lease requests fail, background
/// sync tasks stop. The handle itself stays valid until `driftsync_db_free`.
#[no_mangle]
pub extern "C" fn driftsync_db_close(db: u64) -> DriftSyncResult {
    clear_last_error();
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };
    sync::drop_client(db);
    database.close();
    DriftSyncResult::Ok
}

/// Releases the database handle.
#[no_mangle]
pub extern "C" fn driftsync_db_free(db: u64) -> DriftSyncResult {
    clear_last_error();
    sync::drop_client(db);
    match DATABASES.remove(db) {
        Some(_) => DriftSyncResult::Ok,
        None => fail(DriftSyncResult::InvalidHandle, "unknown database handle"),
    }
}

unsafe fn acquire_lease(db: u64, out_lease: *mut u64, writer: bool) -> DriftSyncResult {
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };
    let lease = block_on(async {
        if writer {
            database.write_lease().await
        } else {
            database.read_lease().await
        }
    });
    match lease {
        Ok(lease) => {
            *out_lease = LEASES.insert(Arc::new(Mutex::new(lease)));
            DriftSyncResult::Ok
        }
        Err(err) => core_error(&err),
    }
}

/// Acquires a read lease, blocking until one is available.
///
/// # Safety
///
/// `out_lease` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_reader(db: u64, out_lease: *mut u64) -> DriftSyncResult {
    clear_last_error();
    if out_lease.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    acquire_lease(db, out_lease, false)
}

/// Acquires the write lease, blocking until it is available.
///
/// # Safety
///
/// `out_lease` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_writer(db: u64, out_lease: *mut u64) -> DriftSyncResult {
    clear_last_error();
    if out_lease.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    acquire_lease(db, out_lease, true)
}

/// Executes one or more SQL statements on a leased connection.
///
/// # Safety
///
/// `sql` must be a valid null-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn driftsync_lease_exec(lease: u64, sql: *const c_char) -> DriftSyncResult {
    clear_last_error();
    if sql.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Ok(sql) = borrow_str(sql) else {
        return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 in sql");
    };

    // Clone the lease out of the arena so the statement runs under the
    // per-lease lock only.
    let Some(conn) = LEASES.get(lease) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown lease handle");
    };
    let result = match conn.lock().execute_batch(sql) {
        Ok(()) => DriftSyncResult::Ok,
        Err(err) => fail(DriftSyncResult::Sqlite, err.to_string()),
    };
    result
}

/// Runs a query on a leased connection, returning the rows as a JSON array of
/// objects. Free the string with `driftsync_string_free`.
///
/// # Safety
///
/// - `sql` must be a valid null-terminated UTF-8 string
/// - `out_json` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn driftsync_lease_query_json(
    lease: u64,
    sql: *const c_char,
    out_json: *mut *mut c_char,
) -> DriftSyncResult {
    clear_last_error();
    if sql.is_null() || out_json.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Ok(sql) = borrow_str(sql) else {
        return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 in sql");
    };

    let Some(conn) = LEASES.get(lease) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown lease handle");
    };
    let result = match query_to_json(&conn.lock(), sql) {
        Ok(json) => {
            *out_json = into_c_string(json);
            DriftSyncResult::Ok
        }
        Err(err) => fail(DriftSyncResult::Sqlite, err.to_string()),
    };
    result
}

fn query_to_json(
    conn: &LeasedConnection,
    sql: &str,
) -> driftsync_core::rusqlite::Result<String> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut out = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (i, name) in names.iter().enumerate() {
            object.insert(name.clone(), value_to_json(row.get_ref(i)?));
        }
        out.push(Value::Object(object));
    }
    Ok(Value::Array(out).to_string())
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

/// Releases a lease, returning its connection to the pool. A statement still
/// running on this lease from another thread finishes first.
#[no_mangle]
pub extern "C" fn driftsync_lease_free(lease: u64) -> DriftSyncResult {
    clear_last_error();
    match LEASES.remove(lease) {
        Some(_) => DriftSyncResult::Ok,
        None => fail(DriftSyncResult::InvalidHandle, "unknown lease handle"),
    }
}

/// Watches for committed changes to the named tables. `tables_json` is a JSON
/// array of table names; `callback` is invoked with `token` after each commit
/// touching one of them becomes durable.
///
/// # Safety
///
/// - `tables_json` must be a valid null-terminated UTF-8 string
/// - `out_watcher` must be a valid pointer
/// - `callback` must stay callable until `driftsync_watcher_free` returns
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_watch_tables(
    db: u64,
    tables_json: *const c_char,
    callback: DriftSyncCallback,
    token: u64,
    out_watcher: *mut u64,
) -> DriftSyncResult {
    clear_last_error();
    if tables_json.is_null() || out_watcher.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Ok(tables_json) = borrow_str(tables_json) else {
        return fail(DriftSyncResult::InvalidArgument, "invalid UTF-8 in tables");
    };
    let tables: Vec<String> = match serde_json::from_str(tables_json) {
        Ok(tables) => tables,
        Err(err) => return fail(DriftSyncResult::Json, format!("invalid table list: {err}")),
    };
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };

    let handle = database.watch_tables(tables, move || callback(token));
    *out_watcher = WATCHERS.insert(handle);
    DriftSyncResult::Ok
}

/// Watches for sync status changes.
///
/// # Safety
///
/// - `out_watcher` must be a valid pointer
/// - `callback` must stay callable until `driftsync_watcher_free` returns
#[no_mangle]
pub unsafe extern "C" fn driftsync_db_watch_status(
    db: u64,
    callback: DriftSyncCallback,
    token: u64,
    out_watcher: *mut u64,
) -> DriftSyncResult {
    clear_last_error();
    if out_watcher.is_null() {
        return fail(DriftSyncResult::NullPointer, "null pointer argument");
    }
    let Some(database) = DATABASES.get(db) else {
        return fail(DriftSyncResult::InvalidHandle, "unknown database handle");
    };

    let handle = database.watch_status(move || callback(token));
    *out_watcher = WATCHERS.insert(handle);
    DriftSyncResult::Ok
}

/// Unregisters a watcher. When this returns, the callback will not run again.
#[no_mangle]
pub extern "C" fn driftsync_watcher_free(watcher: u64) -> DriftSyncResult {
    clear_last_error();
    match WATCHERS.remove(watcher) {
        Some(_) => DriftSyncResult::Ok,
        None => fail(DriftSyncResult::InvalidHandle, "unknown watcher handle"),
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use crate::crud::{
        driftsync_crud_complete, driftsync_crud_iter_current_json, driftsync_crud_iter_free,
        driftsync_crud_iter_new, driftsync_crud_iter_next,
    };
    use crate::error::driftsync_last_error_message;
    use crate::strings::driftsync_string_free;

    use super::*;

    const SCHEMA: &str =
        r#"{"tables":[{"name":"todos","columns":[{"name":"title","type":"TEXT"}]}]}"#;

    fn open_memory() -> u64 {
        let schema = CString::new(SCHEMA).unwrap();
        let mut db = 0u64;
        let result = unsafe { driftsync_db_open_in_memory(schema.as_ptr(), &mut db) };
        assert!(result.is_ok());
        assert_ne!(db, 0);
        db
    }

    fn take_json(read: impl FnOnce(*mut *mut c_char) -> DriftSyncResult) -> String {
        let mut ptr: *mut c_char = std::ptr::null_mut();
        assert!(read(&mut ptr).is_ok());
        assert!(!ptr.is_null());
        let json = unsafe { borrow_str(ptr) }.unwrap().to_owned();
        unsafe { driftsync_string_free(ptr) };
        json
    }

    #[test]
    fn exec_and_query_round_trip() {
        let db = open_memory();

        let mut lease = 0u64;
        assert!(unsafe { driftsync_db_writer(db, &mut lease) }.is_ok());
        let sql = CString::new("INSERT INTO todos (id, title) VALUES ('t1', 'milk')").unwrap();
        assert!(unsafe { driftsync_lease_exec(lease, sql.as_ptr()) }.is_ok());
        assert!(driftsync_lease_free(lease).is_ok());

        let mut lease = 0u64;
        assert!(unsafe { driftsync_db_reader(db, &mut lease) }.is_ok());
        let sql = CString::new("SELECT id, title FROM todos ORDER BY id").unwrap();
        let rows = take_json(|out| unsafe { driftsync_lease_query_json(lease, sql.as_ptr(), out) });
        assert_eq!(rows, r#"[{"id":"t1","title":"milk"}]"#);
        assert!(driftsync_lease_free(lease).is_ok());

        assert!(driftsync_db_free(db).is_ok());
    }

    #[test]
    fn crud_entries_flow_through_the_iterator() {
        let db = open_memory();

        let mut lease = 0u64;
        assert!(unsafe { driftsync_db_writer(db, &mut lease) }.is_ok());
        let sql = CString::new("INSERT INTO todos (id, title) VALUES ('t1', 'milk')").unwrap();
        assert!(unsafe { driftsync_lease_exec(lease, sql.as_ptr()) }.is_ok());
        assert!(driftsync_lease_free(lease).is_ok());

        let mut iter = 0u64;
        assert!(unsafe { driftsync_crud_iter_new(db, &mut iter) }.is_ok());
        let mut has_current = false;
        assert!(unsafe { driftsync_crud_iter_next(iter, &mut has_current) }.is_ok());
        assert!(has_current);

        let json = take_json(|out| unsafe { driftsync_crud_iter_current_json(iter, out) });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][0]["op"], "PUT");
        assert_eq!(value["entries"][0]["type"], "todos");
        assert_eq!(value["entries"][0]["id"], "t1");
        let last_item_id = value["last_item_id"].as_i64().unwrap();

        assert!(driftsync_crud_complete(db, last_item_id, false, 0).is_ok());
        assert!(unsafe { driftsync_crud_iter_next(iter, &mut has_current) }.is_ok());
        assert!(!has_current);

        assert!(driftsync_crud_iter_free(iter).is_ok());
        assert!(driftsync_db_free(db).is_ok());
    }

    #[test]
    fn bad_inputs_map_to_codes() {
        let mut db = 0u64;
        assert_eq!(
            unsafe { driftsync_db_open_in_memory(std::ptr::null(), &mut db) },
            DriftSyncResult::NullPointer
        );

        let garbage = CString::new("not json").unwrap();
        assert_eq!(
            unsafe { driftsync_db_open_in_memory(garbage.as_ptr(), &mut db) },
            DriftSyncResult::Json
        );
        assert!(!unsafe { driftsync_last_error_message() }.is_null());

        let mut lease = 0u64;
        assert_eq!(
            unsafe { driftsync_db_reader(999, &mut lease) },
            DriftSyncResult::InvalidHandle
        );
    }

    #[test]
    fn file_database_reopens_with_its_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("app.db").to_str().unwrap()).unwrap();
        let schema = CString::new(SCHEMA).unwrap();

        let mut db = 0u64;
        assert!(unsafe { driftsync_db_open(path.as_ptr(), schema.as_ptr(), &mut db) }.is_ok());
        let mut lease = 0u64;
        assert!(unsafe { driftsync_db_writer(db, &mut lease) }.is_ok());
        let sql = CString::new("INSERT INTO todos (id, title) VALUES ('t1', 'keep')").unwrap();
        assert!(unsafe { driftsync_lease_exec(lease, sql.as_ptr()) }.is_ok());
        assert!(driftsync_lease_free(lease).is_ok());
        assert!(driftsync_db_close(db).is_ok());
        assert!(driftsync_db_free(db).is_ok());

        let mut db = 0u64;
        assert!(unsafe { driftsync_db_open(path.as_ptr(), schema.as_ptr(), &mut db) }.is_ok());
        let mut lease = 0u64;
        assert!(unsafe { driftsync_db_reader(db, &mut lease) }.is_ok());
        let sql = CString::new("SELECT count(*) AS n FROM todos").unwrap();
        let rows = take_json(|out| unsafe { driftsync_lease_query_json(lease, sql.as_ptr(), out) });
        assert_eq!(rows, r#"[{"n":1}]"#);
        assert!(driftsync_lease_free(lease).is_ok());
        assert!(driftsync_db_free(db).is_ok());
    }

    #[test]
    fn statements_on_distinct_leases_run_concurrently() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("app.db").to_str().unwrap()).unwrap();
        let schema = CString::new(SCHEMA).unwrap();
        let mut db = 0u64;
        assert!(unsafe { driftsync_db_open(path.as_ptr(), schema.as_ptr(), &mut db) }.is_ok());

        let mut slow = 0u64;
        assert!(unsafe { driftsync_db_reader(db, &mut slow) }.is_ok());
        let mut fast = 0u64;
        assert!(unsafe { driftsync_db_reader(db, &mut fast) }.is_ok());

        let started = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let started = Arc::clone(&started);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let sql = CString::new(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000000) \
                     SELECT count(*) AS n FROM c",
                )
                .unwrap();
                started.store(true, Ordering::SeqCst);
                let rows =
                    take_json(|out| unsafe { driftsync_lease_query_json(slow, sql.as_ptr(), out) });
                done.store(true, Ordering::SeqCst);
                assert_eq!(rows, r#"[{"n":5000000}]"#);
            })
        };

        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(50));

        let sql = CString::new("SELECT 1 AS one").unwrap();
        let rows = take_json(|out| unsafe { driftsync_lease_query_json(fast, sql.as_ptr(), out) });
        assert_eq!(rows, r#"[{"one":1}]"#);
        // The long statement must still be on its own lease while the short
        // one comes back.
        assert!(!done.load(Ordering::SeqCst));

        worker.join().unwrap();
        assert!(driftsync_lease_free(slow).is_ok());
        assert!(driftsync_lease_free(fast).is_ok());
        assert!(driftsync_db_free(db).is_ok());
    }

    #[test]
    fn close_fails_later_leases() {
        let db = open_memory();
        assert!(driftsync_db_close(db).is_ok());

        let mut lease = 0u64;
        assert_eq!(
            unsafe { driftsync_db_writer(db, &mut lease) },
            DriftSyncResult::Closed
        );
        assert!(driftsync_db_free(db).is_ok());
    }
}
