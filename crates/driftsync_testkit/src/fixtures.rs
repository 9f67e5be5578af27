//! Test fixtures and database helpers.

use driftsync_core::{Column, Database, DatabaseOptions, Schema, Table};
use tempfile::TempDir;

/// A small two-column schema used across the test suites.
pub fn todos_schema() -> Schema {
    Schema::new(vec![Table::create(
        "todos",
        vec![Column::text("description"), Column::integer("done")],
        |_| {},
    )])
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates an in-memory test database with the todos schema.
    pub async fn memory() -> Self {
        Self::memory_with(todos_schema()).await
    }

    /// Creates an in-memory test database with `schema`.
    pub async fn memory_with(schema: Schema) -> Self {
        Self {
            db: Database::open_in_memory(schema)
                .await
                .expect("failed to open in-memory database"),
            _temp_dir: None,
        }
    }

    /// Creates a file-backed test database with the todos schema.
    pub async fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db = Database::open(
            todos_schema(),
            DatabaseOptions::at_path(temp_dir.path().join("test.db")),
        )
        .await
        .expect("failed to open file database");
        Self {
            db,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Inserts a todo row through a write lease.
    pub async fn insert_todo(&self, id: &str, description: &str) {
        let writer = self.db.write_lease().await.expect("write lease");
        writer
            .execute(
                "INSERT INTO todos (id, description, done) VALUES (?1, ?2, 0)",
                [id, description],
            )
            .expect("insert todo");
    }

    /// Number of rows currently in the todos table.
    pub async fn todo_count(&self) -> i64 {
        let reader = self.db.read_lease().await.expect("read lease");
        reader
            .query_row("SELECT count(*) FROM todos", [], |row| row.get(0))
            .expect("count todos")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}
