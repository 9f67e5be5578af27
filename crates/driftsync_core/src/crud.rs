//! Durable queue of local writes awaiting upload.
//!
//! Local writes are captured into the internal CRUD table by the triggers
//! generated at schema-apply time. The queue reads them back grouped by the
//! transaction id assigned at capture time; [`CrudTransaction::complete`]
//! removes uploaded entries and, once the queue drains, records the write
//! checkpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreResult;
use crate::pool::ConnectionPool;
use crate::schema::{CRUD_TABLE, MAX_OP_ID, SYNC_STATE_TABLE};

/// Kind of a captured write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Row inserted; `data` holds the full row.
    #[serde(rename = "PUT")]
    Put,
    /// Row updated; `data` holds the row after the update.
    #[serde(rename = "PATCH")]
    Patch,
    /// Row deleted.
    #[serde(rename = "DELETE")]
    Delete,
}

/// One captured write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrudEntry {
    /// Queue position, unique and increasing across the database lifetime.
    #[serde(skip)]
    pub client_id: i64,
    /// Transaction this entry belongs to.
    #[serde(skip)]
    pub tx_id: i64,
    /// What happened.
    pub op: UpdateKind,
    /// The affected table.
    #[serde(rename = "type")]
    pub table: String,
    /// The affected row id.
    pub id: String,
    /// Column values, absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Value of the metadata column, when the table tracks metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Previous column values, when the table tracks them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Map<String, Value>>,
}

impl CrudEntry {
    fn from_row(client_id: i64, tx_id: i64, json: &str) -> CoreResult<Self> {
        let mut entry: CrudEntry = serde_json::from_str(json)?;
        entry.client_id = client_id;
        entry.tx_id = tx_id;
        Ok(entry)
    }
}

/// All entries of one local transaction, in write order.
#[derive(Debug)]
pub struct CrudTransaction {
    queue: CrudQueue,
    /// Transaction id shared by every entry.
    pub tx_id: i64,
    /// The captured writes, oldest first. Never empty.
    pub entries: Vec<CrudEntry>,
}

impl CrudTransaction {
    /// Queue position of the last entry.
    pub fn last_client_id(&self) -> i64 {
        self.entries.last().map_or(0, |entry| entry.client_id)
    }

    /// Removes this transaction's entries from the queue after a successful
    /// upload.
    pub async fn complete(self) -> CoreResult<()> {
        self.queue
            .complete_up_to(self.last_client_id(), None)
            .await
    }

    /// Like [`Self::complete`], but when the queue drains this also records
    /// `checkpoint` so downloads know which server state includes these writes.
    pub async fn complete_with_checkpoint(self, checkpoint: i64) -> CoreResult<()> {
        self.queue
            .complete_up_to(self.last_client_id(), Some(checkpoint))
            .await
    }
}

/// Reader side of the captured-write queue.
#[derive(Debug, Clone)]
pub struct CrudQueue {
    pool: ConnectionPool,
}

impl CrudQueue {
    pub(crate) fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Returns the oldest pending transaction, or `None` when the queue is
    /// empty. Repeated calls return the same transaction until it is completed.
    pub async fn next_transaction(&self) -> CoreResult<Option<CrudTransaction>> {
        let reader = self.pool.reader().await?;

        // Transaction ids increase monotonically and are never reused, so the
        // first transaction is exactly the rows sharing the smallest row's tx_id.
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT id, tx_id, data FROM {CRUD_TABLE} \
             WHERE tx_id = (SELECT tx_id FROM {CRUD_TABLE} ORDER BY id LIMIT 1) \
             ORDER BY id"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (client_id, tx_id, json) = row?;
            entries.push(CrudEntry::from_row(client_id, tx_id, &json)?);
        }
        drop(stmt);

        Ok(match entries.first() {
            None => None,
            Some(first) => Some(CrudTransaction {
                tx_id: first.tx_id,
                entries,
                queue: self.clone(),
            }),
        })
    }

    /// Whether any entries are pending.
    pub async fn has_pending(&self) -> CoreResult<bool> {
        let reader = self.pool.reader().await?;
        let count: i64 = reader.query_row(
            &format!("SELECT count(*) FROM {CRUD_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Removes every entry with `client_id <= last_client_id`, recording
    /// `write_checkpoint` if the queue drains. Prefer completing through a
    /// [`CrudTransaction`]; this entry point exists for hosts that track the
    /// last uploaded item id themselves.
    pub async fn complete_up_to(
        &self,
        last_client_id: i64,
        write_checkpoint: Option<i64>,
    ) -> CoreResult<()> {
        let mut writer = self.pool.writer().await?;
        let tx = writer.transaction()?;

        tx.execute(
            &format!("DELETE FROM {CRUD_TABLE} WHERE id <= ?1"),
            [last_client_id],
        )?;
        let remaining: i64 =
            tx.query_row(&format!("SELECT count(*) FROM {CRUD_TABLE}"), [], |row| {
                row.get(0)
            })?;
        if remaining == 0 {
            tx.execute(
                &format!("UPDATE {SYNC_STATE_TABLE} SET target_op = ?1 WHERE name = '$local'"),
                [write_checkpoint.unwrap_or(MAX_OP_ID)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::schema::{Column, Schema, Table};

    async fn queue_with_schema() -> (ConnectionPool, CrudQueue) {
        let pool = ConnectionPool::open(PoolConfig::default()).unwrap();
        let schema = Schema::new(vec![Table::create(
            "todos",
            vec![Column::text("description"), Column::integer("done")],
            |_| {},
        )]);

        let writer = pool.writer().await.unwrap();
        writer.execute_batch(&schema.create_statements()).unwrap();
        drop(writer);

        (pool.clone(), CrudQueue::new(pool))
    }

    async fn bump_tx(pool: &ConnectionPool) {
        let writer = pool.writer().await.unwrap();
        writer
            .execute("UPDATE ps_tx SET current_tx = current_tx + 1", [])
            .unwrap();
    }

    #[tokio::test]
    async fn empty_queue_yields_none() {
        let (_pool, queue) = queue_with_schema().await;
        assert!(queue.next_transaction().await.unwrap().is_none());
        assert!(!queue.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn captures_insert_update_delete() {
        let (pool, queue) = queue_with_schema().await;

        let writer = pool.writer().await.unwrap();
        writer
            .execute_batch(
                "INSERT INTO todos (id, description, done) VALUES ('t1', 'buy milk', 0);
                 UPDATE todos SET done = 1 WHERE id = 't1';
                 DELETE FROM todos WHERE id = 't1';",
            )
            .unwrap();
        drop(writer);

        let tx = queue.next_transaction().await.unwrap().unwrap();
        assert_eq!(tx.entries.len(), 3);

        assert_eq!(tx.entries[0].op, UpdateKind::Put);
        assert_eq!(tx.entries[0].table, "todos");
        assert_eq!(tx.entries[0].id, "t1");
        let data = tx.entries[0].data.as_ref().unwrap();
        assert_eq!(data["description"], "buy milk");
        assert_eq!(data["done"], 0);

        assert_eq!(tx.entries[1].op, UpdateKind::Patch);
        assert_eq!(tx.entries[1].data.as_ref().unwrap()["done"], 1);

        assert_eq!(tx.entries[2].op, UpdateKind::Delete);
        assert!(tx.entries[2].data.is_none());
    }

    #[tokio::test]
    async fn transactions_are_returned_one_at_a_time() {
        let (pool, queue) = queue_with_schema().await;

        let writer = pool.writer().await.unwrap();
        writer
            .execute("INSERT INTO todos (id, description) VALUES ('a', 'first')", [])
            .unwrap();
        drop(writer);

        bump_tx(&pool).await;
        let writer = pool.writer().await.unwrap();
        writer
            .execute("INSERT INTO todos (id, description) VALUES ('b', 'second')", [])
            .unwrap();
        drop(writer);

        let first = queue.next_transaction().await.unwrap().unwrap();
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.entries[0].id, "a");

        // Not completed yet, so the same transaction comes back.
        let again = queue.next_transaction().await.unwrap().unwrap();
        assert_eq!(again.tx_id, first.tx_id);
        drop(again);

        first.complete().await.unwrap();

        let second = queue.next_transaction().await.unwrap().unwrap();
        assert_eq!(second.entries[0].id, "b");
        assert!(second.tx_id > 0);
        second.complete().await.unwrap();

        assert!(queue.next_transaction().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completing_last_transaction_records_checkpoint() {
        let (pool, queue) = queue_with_schema().await;

        let writer = pool.writer().await.unwrap();
        writer
            .execute("INSERT INTO todos (id, description) VALUES ('a', 'x')", [])
            .unwrap();
        drop(writer);

        let tx = queue.next_transaction().await.unwrap().unwrap();
        tx.complete_with_checkpoint(42).await.unwrap();

        let reader = pool.reader().await.unwrap();
        let target: i64 = reader
            .query_row(
                "SELECT target_op FROM ps_sync_state WHERE name = '$local'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(target, 42);
    }

    #[tokio::test]
    async fn checkpoint_skipped_while_entries_remain() {
        let (pool, queue) = queue_with_schema().await;

        let writer = pool.writer().await.unwrap();
        writer
            .execute("INSERT INTO todos (id, description) VALUES ('a', 'x')", [])
            .unwrap();
        drop(writer);
        bump_tx(&pool).await;
        let writer = pool.writer().await.unwrap();
        writer
            .execute("INSERT INTO todos (id, description) VALUES ('b', 'y')", [])
            .unwrap();
        drop(writer);

        let tx = queue.next_transaction().await.unwrap().unwrap();
        tx.complete_with_checkpoint(42).await.unwrap();

        let reader = pool.reader().await.unwrap();
        let target: i64 = reader
            .query_row(
                "SELECT target_op FROM ps_sync_state WHERE name = '$local'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(target, MAX_OP_ID);
    }
}
