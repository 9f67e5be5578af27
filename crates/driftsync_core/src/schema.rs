//! Schema descriptions supplied at database-open time.
//!
//! A [`Schema`] is a flat, fully-owned description of the tables the application
//! wants to sync. At open time the core materializes it: one SQLite table per
//! [`Table`] (plus an optional read view when the view name is overridden) and the
//! triggers that capture local writes into the internal CRUD queue.
//!
//! The schema is immutable once the database is open.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Name of the internal table holding captured local writes.
pub(crate) const CRUD_TABLE: &str = "ps_crud";
/// Name of the internal table holding the current transaction id.
pub(crate) const TX_TABLE: &str = "ps_tx";
/// Name of the internal table holding sync bookkeeping such as the write checkpoint.
pub(crate) const SYNC_STATE_TABLE: &str = "ps_sync_state";
/// Sentinel meaning "no write checkpoint recorded".
pub(crate) const MAX_OP_ID: i64 = i64::MAX;

/// An ordered set of table definitions.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// The tables managed by driftsync.
    pub tables: Vec<Table>,
}

impl Schema {
    /// Creates a schema from a list of tables.
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// Validates the schema: unique table names, and each table valid on its own.
    pub fn validate(&self) -> CoreResult<()> {
        let mut names = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "duplicate table name: {}",
                    table.name
                )));
            }
            table.validate()?;
        }
        Ok(())
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Returns the full SQL script materializing this schema: internal bookkeeping
    /// tables, one table (and optional view) per definition, and the CRUD-capture
    /// triggers. The script is idempotent; triggers are dropped and recreated so a
    /// reopened database picks up flag changes.
    pub(crate) fn create_statements(&self) -> String {
        let mut sql = String::new();

        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {CRUD_TABLE} (\n\
             id INTEGER PRIMARY KEY AUTOINCREMENT,\n\
             tx_id INTEGER NOT NULL,\n\
             data TEXT NOT NULL\n\
             );\n"
        ));
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {TX_TABLE} (id INTEGER PRIMARY KEY CHECK (id = 0), current_tx INTEGER NOT NULL);\n\
             INSERT OR IGNORE INTO {TX_TABLE} (id, current_tx) VALUES (0, 0);\n"
        ));
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {SYNC_STATE_TABLE} (name TEXT PRIMARY KEY, target_op INTEGER NOT NULL);\n\
             INSERT OR IGNORE INTO {SYNC_STATE_TABLE} (name, target_op) VALUES ('$local', {MAX_OP_ID});\n"
        ));

        for table in &self.tables {
            table.write_statements(&mut sql);
        }

        sql
    }

    fn is_invalid_name_char(c: char) -> bool {
        // Specialized implementation of the regex ["'%,.#\s\[\]]
        matches!(c, '"' | '\'' | '%' | ',' | '.' | '#' | '[' | ']') || c.is_whitespace()
    }

    fn validate_name(name: &str, kind: &'static str) -> CoreResult<()> {
        if name.is_empty() || name.contains(Self::is_invalid_name_char) {
            Err(CoreError::invalid_argument(format!(
                "name for {kind} ({name}) is empty or contains invalid characters"
            )))
        } else {
            Ok(())
        }
    }
}

/// A driftsync-managed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// The synced table name.
    pub name: String,
    /// Optional override for the name of the read view created over the table.
    #[serde(default)]
    pub view_name: Option<String>,
    /// Ordered list of columns. An `id TEXT PRIMARY KEY` column is added implicitly.
    pub columns: Vec<Column>,
    /// Behavioral flags.
    #[serde(flatten)]
    pub options: TableOptions,
}

impl Table {
    const MAX_COLUMNS: usize = 1999;
    const METADATA_COLUMN: &'static str = "_metadata";

    /// Creates a table from its name and columns, with options adjusted through the
    /// `build` callback.
    pub fn create(
        name: impl Into<String>,
        columns: Vec<Column>,
        build: impl FnOnce(&mut Table),
    ) -> Self {
        let mut table = Self {
            name: name.into(),
            view_name: None,
            columns,
            options: TableOptions::default(),
        };
        build(&mut table);
        table
    }

    /// The name of the read view for this table, when one is created.
    pub fn view_name(&self) -> Option<&str> {
        self.view_name.as_deref()
    }

    fn validate(&self) -> CoreResult<()> {
        if self.columns.len() > Self::MAX_COLUMNS {
            return Err(CoreError::invalid_argument(format!(
                "table {} has more than {} columns",
                self.name,
                Self::MAX_COLUMNS
            )));
        }

        Schema::validate_name(&self.name, "table")?;
        if let Some(view_name) = &self.view_name {
            Schema::validate_name(view_name, "table view")?;
        }

        self.options.validate(&self.name)?;

        let mut column_names = HashSet::new();
        column_names.insert("id");
        for column in &self.columns {
            if column.name == "id" {
                return Err(CoreError::invalid_argument(
                    "id column is added automatically, custom id columns are not supported",
                ));
            }
            if column.name == Self::METADATA_COLUMN {
                return Err(CoreError::invalid_argument(format!(
                    "{} is reserved for metadata tracking",
                    Self::METADATA_COLUMN
                )));
            }
            if !column_names.insert(column.name.as_str()) {
                return Err(CoreError::invalid_argument(format!(
                    "duplicate column: {}",
                    column.name
                )));
            }
            Schema::validate_name(&column.name, "column")?;
        }

        Ok(())
    }

    fn write_statements(&self, sql: &mut String) {
        let table = quote(&self.name);

        let mut columns = String::from("id TEXT PRIMARY KEY NOT NULL");
        for column in &self.columns {
            let _ = write!(
                columns,
                ", {} {}",
                quote(&column.name),
                column.column_type.sql_type()
            );
        }
        if self.options.track_metadata {
            let _ = write!(columns, ", {} TEXT", quote(Self::METADATA_COLUMN));
        }
        let _ = writeln!(sql, "CREATE TABLE IF NOT EXISTS {table} ({columns});");

        if let Some(view_name) = &self.view_name {
            let _ = writeln!(
                sql,
                "CREATE VIEW IF NOT EXISTS {} AS SELECT * FROM {table};",
                quote(view_name)
            );
        }

        for kind in ["insert", "update", "delete"] {
            let _ = writeln!(
                sql,
                "DROP TRIGGER IF EXISTS {};",
                quote(&format!("__driftsync_{kind}_{}", self.name))
            );
        }

        if self.options.local_only {
            return;
        }

        self.write_insert_trigger(sql, &table);
        if !self.options.insert_only {
            self.write_update_trigger(sql, &table);
            self.write_delete_trigger(sql, &table);
        }
    }

    fn write_insert_trigger(&self, sql: &mut String, table: &str) {
        let mut payload = format!(
            "json_object('op', 'PUT', 'type', {}, 'id', NEW.id, 'data', {}",
            sql_string(&self.name),
            self.row_object("NEW")
        );
        if self.options.track_metadata {
            let _ = write!(
                payload,
                ", 'metadata', NEW.{}",
                quote(Self::METADATA_COLUMN)
            );
        }
        payload.push(')');

        let _ = writeln!(
            sql,
            "CREATE TRIGGER {name} AFTER INSERT ON {table}\nBEGIN\n  {insert};\nEND;",
            name = quote(&format!("__driftsync_insert_{}", self.name)),
            insert = self.crud_insert(&payload),
        );
    }

    fn write_update_trigger(&self, sql: &mut String, table: &str) {
        let mut payload = format!(
            "json_object('op', 'PATCH', 'type', {}, 'id', NEW.id, 'data', {}",
            sql_string(&self.name),
            self.row_object("NEW")
        );
        if self.options.track_metadata {
            let _ = write!(
                payload,
                ", 'metadata', NEW.{}",
                quote(Self::METADATA_COLUMN)
            );
        }
        if self.options.track_previous_values {
            let _ = write!(payload, ", 'old', {}", self.row_object("OLD"));
        }
        payload.push(')');

        let guard = if self.options.ignore_empty_updates {
            format!(
                "WHEN {} IS NOT {}\n",
                self.comparison_object("NEW"),
                self.comparison_object("OLD")
            )
        } else {
            String::new()
        };

        let _ = writeln!(
            sql,
            "CREATE TRIGGER {name} AFTER UPDATE ON {table}\n{guard}BEGIN\n  {insert};\nEND;",
            name = quote(&format!("__driftsync_update_{}", self.name)),
            insert = self.crud_insert(&payload),
        );
    }

    fn write_delete_trigger(&self, sql: &mut String, table: &str) {
        let mut payload = format!(
            "json_object('op', 'DELETE', 'type', {}, 'id', OLD.id",
            sql_string(&self.name)
        );
        if self.options.track_previous_values {
            let _ = write!(payload, ", 'old', {}", self.row_object("OLD"));
        }
        payload.push(')');

        let _ = writeln!(
            sql,
            "CREATE TRIGGER {name} AFTER DELETE ON {table}\nBEGIN\n  {insert};\nEND;",
            name = quote(&format!("__driftsync_delete_{}", self.name)),
            insert = self.crud_insert(&payload),
        );
    }

    fn crud_insert(&self, payload: &str) -> String {
        format!(
            "INSERT INTO {CRUD_TABLE} (tx_id, data) VALUES ((SELECT current_tx FROM {TX_TABLE}), {payload})"
        )
    }

    /// A `json_object(...)` expression over the declared columns of `row` (NEW/OLD).
    fn row_object(&self, row: &str) -> String {
        let mut object = String::from("json_object(");
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                object.push_str(", ");
            }
            let _ = write!(
                object,
                "{}, {row}.{}",
                sql_string(&column.name),
                quote(&column.name)
            );
        }
        object.push(')');
        object
    }

    /// Like [`Self::row_object`] but including the metadata column, used for the
    /// `ignore_empty_updates` guard.
    fn comparison_object(&self, row: &str) -> String {
        if !self.options.track_metadata {
            return self.row_object(row);
        }

        let mut object = self.row_object(row);
        object.truncate(object.len() - 1);
        if !self.columns.is_empty() {
            object.push_str(", ");
        }
        let _ = write!(
            object,
            "{}, {row}.{})",
            sql_string(Self::METADATA_COLUMN),
            quote(Self::METADATA_COLUMN)
        );
        object
    }
}

/// Behavioral flags for a [`Table`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableOptions {
    /// The table is never synced; no CRUD entries are captured for it.
    #[serde(default)]
    pub local_only: bool,
    /// Only inserts are forwarded to the CRUD queue; updates and deletes are not.
    #[serde(default)]
    pub insert_only: bool,
    /// Adds a hidden `_metadata` column whose value is attached to CRUD entries.
    #[serde(default)]
    pub track_metadata: bool,
    /// An `UPDATE` that changes no values produces no CRUD entry.
    #[serde(default)]
    pub ignore_empty_updates: bool,
    /// Include previous column values (`old`) in update and delete entries.
    #[serde(default)]
    pub track_previous_values: bool,
}

impl TableOptions {
    fn validate(&self, table: &str) -> CoreResult<()> {
        if self.local_only && self.track_metadata {
            return Err(CoreError::invalid_argument(format!(
                "can't track metadata for local-only table {table}"
            )));
        }
        if self.local_only && self.track_previous_values {
            return Err(CoreError::invalid_argument(format!(
                "can't track previous values for local-only table {table}"
            )));
        }
        Ok(())
    }
}

/// A single column definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    /// Creates a text column.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Text,
        }
    }

    /// Creates an integer column.
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Integer,
        }
    }

    /// Creates a real column.
    pub fn real(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Real,
        }
    }
}

/// Storage type of a [`Column`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text.
    #[serde(rename = "TEXT")]
    Text,
    /// 64-bit signed integer.
    #[serde(rename = "INTEGER")]
    Integer,
    /// 64-bit float.
    #[serde(rename = "REAL")]
    Real,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

fn sql_string(value: &str) -> String {
    format!("'{value}'")
}
