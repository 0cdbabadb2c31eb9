//! # Write Buffer
//!
//! Per-transaction store handed to block handlers. Two write paths:
//!
//! - `insert` writes immediately (chunked) and, when a change tracker is
//!   active, records one `insert` change per row of a tracked table;
//! - `register` stages rows until `flush`, which writes each staged table
//!   through `insert` and then reloads its related dictionaries.

use crate::config::TablesConfig;
use crate::domain::block::Height;
use crate::domain::row::{value_as_id, Row};
use crate::domain::statement::{Select, Statement};
use crate::error::HotStoreResult;
use crate::ports::outbound::ColumnStore;
use crate::service::change_log::ChangeTracker;
use std::sync::Arc;
use tracing::debug;

pub struct WriteBuffer<S: ColumnStore> {
    store: Arc<S>,
    tracker: Option<ChangeTracker<S>>,
    tables: Arc<TablesConfig>,
    cluster: Option<String>,
    staged: Vec<(String, Vec<Row>)>,
}

impl<S: ColumnStore> WriteBuffer<S> {
    pub fn new(
        store: Arc<S>,
        tracker: Option<ChangeTracker<S>>,
        tables: Arc<TablesConfig>,
        cluster: Option<String>,
    ) -> Self {
        Self {
            store,
            tracker,
            tables,
            cluster,
            staged: Vec::new(),
        }
    }

    /// Read from the store. Writes must go through `insert` or `register`
    /// so that hot blocks stay undoable.
    pub async fn query(&self, select: &Select) -> HotStoreResult<Vec<Row>> {
        Ok(self.store.query(select).await?)
    }

    /// Whether writes are undoable (a hot block is being applied).
    pub fn is_tracked(&self) -> bool {
        self.tracker.is_some()
    }

    /// Height of the hot block being applied, if any.
    pub fn height(&self) -> Option<Height> {
        self.tracker.as_ref().map(ChangeTracker::height)
    }

    pub fn tracker_mut(&mut self) -> Option<&mut ChangeTracker<S>> {
        self.tracker.as_mut()
    }

    /// Write rows now. Returns the number of rows written.
    ///
    /// Rows of tables without a tracking column are written but cannot be
    /// undone; rows whose tracking value is empty are not tracked either.
    pub async fn insert(&mut self, table: &str, rows: &[Row]) -> HotStoreResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let written = self.store.insert(table, rows).await?;

        if let (Some(tracker), Some(track_by)) = (self.tracker.as_mut(), self.tables.track_by(table)) {
            let ids: Vec<String> = rows
                .iter()
                .filter_map(|row| row.get(track_by).and_then(value_as_id))
                .collect();
            debug!(
                "[reorg-store] HOT INSERT block #{} {}: {} ids",
                tracker.height(),
                table,
                ids.len()
            );
            tracker.track_insert(table, ids).await?;
        }
        Ok(written)
    }

    /// Stage one row for `flush`.
    pub fn register(&mut self, table: &str, row: Row) {
        self.staged_mut(table).push(row);
    }

    /// Stage many rows for `flush`.
    pub fn register_all(&mut self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.staged_mut(table).extend(rows);
    }

    /// Number of rows waiting for `flush`.
    pub fn staged_rows(&self) -> usize {
        self.staged.iter().map(|(_, rows)| rows.len()).sum()
    }

    /// Write staged tables in first-registration order, reloading related
    /// dictionaries after each. The buffer is emptied even if a write
    /// fails; tables flushed before the failure are not retried.
    pub async fn flush(&mut self) -> HotStoreResult<()> {
        let staged = std::mem::take(&mut self.staged);
        if !staged.is_empty() {
            debug!(
                "[reorg-store] write records: {}",
                staged
                    .iter()
                    .map(|(table, rows)| format!("{}={}", table, rows.len()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for (table, rows) in staged {
            self.insert(&table, &rows).await?;
            let dictionaries: Vec<String> = self.tables.related_dicts(&table).to_vec();
            for dictionary in dictionaries {
                let statement =
                    Statement::reload_dictionary(dictionary.as_str(), self.cluster.as_deref());
                self.store.exec(&statement).await?;
            }
        }
        Ok(())
    }

    fn staged_mut(&mut self, table: &str) -> &mut Vec<Row> {
        let pos = match self.staged.iter().position(|(t, _)| t == table) {
            Some(pos) => pos,
            None => {
                self.staged.push((table.to_string(), Vec::new()));
                self.staged.len() - 1
            }
        };
        &mut self.staged[pos].1
    }
}
