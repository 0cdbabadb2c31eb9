//! # Change Log
//!
//! Append-only ledger of row mutations keyed by `(height, log_index)`.
//! Rows are read back with a de-duplicating read in descending `log_index`
//! order, which is the order undo must follow.

use crate::domain::block::Height;
use crate::domain::change::{ChangeRecord, ChangeRow};
use crate::domain::row::{value_as_i64, Row};
use crate::domain::statement::{Order, Predicate, Select, Statement};
use crate::error::{HotStoreResult, StoreError};
use crate::ports::outbound::ColumnStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Reader/writer of the `hot_change_log` table for one chain.
pub struct ChangeLog<S: ColumnStore> {
    store: Arc<S>,
    table: String,
    chain_id: u64,
    cluster: Option<String>,
}

impl<S: ColumnStore> Clone for ChangeLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            table: self.table.clone(),
            chain_id: self.chain_id,
            cluster: self.cluster.clone(),
        }
    }
}

impl<S: ColumnStore> ChangeLog<S> {
    pub fn new(store: Arc<S>, table: impl Into<String>, chain_id: u64, cluster: Option<String>) -> Self {
        Self {
            store,
            table: table.into(),
            chain_id,
            cluster,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Start a tracking session for one block.
    pub fn tracker(&self, height: Height) -> ChangeTracker<S> {
        ChangeTracker {
            log: self.clone(),
            height,
            next_index: 0,
        }
    }

    /// Physically append positioned rows. Write failures propagate as-is.
    pub async fn append(&self, rows: &[ChangeRow]) -> HotStoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let encoded = rows
            .iter()
            .map(|row| self.encode(row))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.insert(&self.table, &encoded).await?;
        Ok(())
    }

    /// Change rows of `height`, highest `log_index` first.
    pub async fn changes_for(&self, height: Height) -> HotStoreResult<Vec<ChangeRow>> {
        let select = Select::from(self.table.as_str())
            .columns(&["height", "log_index", "changes"])
            .final_read()
            .filter(Predicate::eq("height", height))
            .filter(Predicate::eq("chain_id", self.chain_id))
            .order_by("log_index", Order::Desc);

        let rows = self.store.query(&select).await?;
        rows.iter().map(|row| self.decode(row)).collect()
    }

    /// Drop the log of one block.
    pub async fn remove_height(&self, height: Height) -> HotStoreResult<()> {
        let statement = Statement::delete(
            self.table.as_str(),
            self.cluster.as_deref(),
            vec![
                Predicate::eq("height", height),
                Predicate::eq("chain_id", self.chain_id),
            ],
        );
        self.store.exec(&statement).await?;
        Ok(())
    }

    /// Drop the logs of every block at or below `height`.
    pub async fn prune_up_to(&self, height: Height) -> HotStoreResult<()> {
        let statement = Statement::delete(
            self.table.as_str(),
            self.cluster.as_deref(),
            vec![
                Predicate::le("height", height),
                Predicate::eq("chain_id", self.chain_id),
            ],
        );
        self.store.exec(&statement).await?;
        Ok(())
    }

    fn encode(&self, row: &ChangeRow) -> HotStoreResult<Row> {
        let mut encoded = Row::new();
        encoded.insert("chain_id".into(), self.chain_id.into());
        encoded.insert("height".into(), row.height.into());
        encoded.insert("log_index".into(), row.log_index.into());
        encoded.insert(
            "changes".into(),
            Value::String(serde_json::to_string(&row.changes)?),
        );
        Ok(encoded)
    }

    fn decode(&self, row: &Row) -> HotStoreResult<ChangeRow> {
        let height = row
            .get("height")
            .and_then(value_as_i64)
            .ok_or_else(|| self.decode_error("missing height"))?;
        let log_index = row
            .get("log_index")
            .and_then(value_as_i64)
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| self.decode_error("missing log_index"))?;
        let changes = match row.get("changes") {
            Some(Value::String(text)) => serde_json::from_str(text)?,
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())?,
            _ => return Err(self.decode_error("missing changes").into()),
        };
        Ok(ChangeRow {
            height,
            log_index,
            changes,
        })
    }

    fn decode_error(&self, reason: &str) -> StoreError {
        StoreError::Decode {
            table: self.table.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Records the mutations of one block, assigning consecutive `log_index`
/// values starting at 0.
pub struct ChangeTracker<S: ColumnStore> {
    log: ChangeLog<S>,
    height: Height,
    next_index: u64,
}

impl<S: ColumnStore> ChangeTracker<S> {
    pub fn height(&self) -> Height {
        self.height
    }

    /// Next index to be assigned.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Append one change row per record, preserving call order.
    pub async fn record(&mut self, changes: Vec<ChangeRecord>) -> HotStoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let rows: Vec<ChangeRow> = changes
            .into_iter()
            .map(|changes| {
                let row = ChangeRow {
                    height: self.height,
                    log_index: self.next_index,
                    changes,
                };
                self.next_index += 1;
                row
            })
            .collect();
        debug!(
            "[reorg-store] block #{} change log += {} (next index {})",
            self.height,
            rows.len(),
            self.next_index
        );
        self.log.append(&rows).await
    }

    pub async fn track_insert(&mut self, table: &str, ids: Vec<String>) -> HotStoreResult<()> {
        let records = ids
            .into_iter()
            .map(|id| ChangeRecord::insert(table, id))
            .collect();
        self.record(records).await
    }

    /// Record an update together with the prior field values.
    pub async fn track_update(&mut self, table: &str, id: &str, previous: Row) -> HotStoreResult<()> {
        self.record(vec![ChangeRecord::update(table, id, previous)])
            .await
    }

    /// Record deletions together with the removed rows.
    pub async fn track_delete(&mut self, table: &str, removed: Vec<(String, Row)>) -> HotStoreResult<()> {
        let records = removed
            .into_iter()
            .map(|(id, fields)| ChangeRecord::delete(table, id, fields))
            .collect();
        self.record(records).await
    }
}
