//! # Outbound Ports (Driven Ports)
//!
//! The column store client this library requires the host application to
//! provide.
//!
//! Production: a driver for an eventually-consistent columnar store
//! Testing: `InMemoryColumnStore` (adapters/memory.rs)

use crate::domain::row::Row;
use crate::domain::statement::{Select, Statement};
use crate::error::StoreError;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

/// Identifier of one physical call, echoed in traces.
pub type QueryId = Uuid;

/// Row limit of a single insert request.
pub const MAX_INSERT_ROWS: usize = 100_000;

/// Rows per physical insert issued by [`ColumnStore::insert`].
pub const DEFAULT_INSERT_BATCH_ROWS: usize = MAX_INSERT_ROWS - 1;

/// Batched-insert/query/exec client for an append-only column store.
///
/// Implementations own transport retry policy; this crate never retries.
/// Reads may go through a read-only connection, but every write must use
/// the same write path so later steps of one transaction observe it.
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Perform one physical insert of `rows` into `table`.
    async fn insert_batch(&self, table: &str, rows: &[Row]) -> Result<QueryId, StoreError>;

    /// Run a read.
    async fn query(&self, select: &Select) -> Result<Vec<Row>, StoreError>;

    /// Run a mutation or command.
    async fn exec(&self, statement: &Statement) -> Result<QueryId, StoreError>;

    /// Rows per physical insert.
    fn insert_batch_rows(&self) -> usize {
        DEFAULT_INSERT_BATCH_ROWS
    }

    /// Insert `rows` as a sequence of batches, each awaited before the next
    /// is issued. Stops at the first failed batch; earlier batches stay
    /// written. Returns the number of rows inserted.
    async fn insert(&self, table: &str, rows: &[Row]) -> Result<usize, StoreError> {
        let batch_rows = self.insert_batch_rows().max(1);
        for batch in rows.chunks(batch_rows) {
            let query_id = self.insert_batch(table, batch).await?;
            debug!(
                "[reorg-store] {{{}}} inserted into {} rows: {}",
                query_id,
                table,
                batch.len()
            );
        }
        Ok(rows.len())
    }
}
