//! # Hot-Block Ledger
//!
//! Finalized status plus the ordered chain of provisional blocks above it.
//! Both tables are read with de-duplicating reads; the status table holds
//! one logical row per chain and is never deleted, only overwritten.

use crate::config::StateTables;
use crate::domain::block::{BlockRef, DatabaseState, Height};
use crate::domain::invariants::{check_height, check_state, InvariantViolation};
use crate::domain::row::{value_as_i64, Row};
use crate::domain::statement::{Order, Predicate, Select, Statement};
use crate::error::{HotStoreResult, StoreError};
use crate::ports::outbound::ColumnStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub struct HotBlockLedger<S: ColumnStore> {
    store: Arc<S>,
    tables: StateTables,
    chain_id: u64,
    cluster: Option<String>,
}

impl<S: ColumnStore> HotBlockLedger<S> {
    pub fn new(store: Arc<S>, tables: StateTables, chain_id: u64, cluster: Option<String>) -> Self {
        Self {
            store,
            tables,
            chain_id,
            cluster,
        }
    }

    pub fn tables(&self) -> &StateTables {
        &self.tables
    }

    /// Last finalized block, or [`BlockRef::empty`] for a fresh chain.
    pub async fn last_status(&self) -> HotStoreResult<BlockRef> {
        let select = Select::from(self.tables.status.as_str())
            .columns(&["hash", "height"])
            .final_read()
            .filter(Predicate::eq("chain_id", self.chain_id));

        let rows = self.store.query(&select).await?;
        match rows.first() {
            Some(row) => self.decode_block(&self.tables.status, row),
            None => Ok(BlockRef::empty()),
        }
    }

    /// Hot blocks above `above`, ascending.
    ///
    /// Rows at or below the finalized height are finalized leftovers whose
    /// delete has not been applied yet; they are filtered out.
    pub async fn hot_blocks(&self, above: Height) -> HotStoreResult<Vec<BlockRef>> {
        let select = Select::from(self.tables.hot_block.as_str())
            .columns(&["hash", "height"])
            .final_read()
            .filter(Predicate::eq("chain_id", self.chain_id))
            .filter(Predicate::gt("height", above))
            .order_by("height", Order::Asc);

        let rows = self.store.query(&select).await?;
        rows.iter()
            .map(|row| self.decode_block(&self.tables.hot_block, row))
            .collect()
    }

    /// Load `{status, hot blocks}` and verify height validity and chain
    /// continuity. A broken chain is fatal.
    pub async fn load_state(&self) -> HotStoreResult<DatabaseState> {
        let status = self.last_status().await?;
        let top = self.hot_blocks(status.height).await?;
        let state = DatabaseState::new(status, top);

        check_state(&state)?;
        debug!(
            "[reorg-store] state loaded: status #{} with {} hot blocks",
            state.height,
            state.top.len()
        );
        Ok(state)
    }

    /// Add a provisional block. Contiguity is the caller's responsibility.
    pub async fn append_hot_block(&self, block: &BlockRef) -> HotStoreResult<()> {
        let row = self.encode_block(block);
        self.store.insert(&self.tables.hot_block, &[row]).await?;
        Ok(())
    }

    /// Remove every hot block at or below `height`.
    pub async fn prune_up_to(&self, height: Height) -> HotStoreResult<()> {
        let statement = Statement::delete(
            self.tables.hot_block.as_str(),
            self.cluster.as_deref(),
            vec![
                Predicate::le("height", height),
                Predicate::eq("chain_id", self.chain_id),
            ],
        );
        self.store.exec(&statement).await?;
        Ok(())
    }

    /// Overwrite the finalized status.
    pub async fn write_status(&self, head: &BlockRef) -> HotStoreResult<()> {
        let row = self.encode_block(head);
        self.store.insert(&self.tables.status, &[row]).await?;
        Ok(())
    }

    fn encode_block(&self, block: &BlockRef) -> Row {
        let mut row = Row::new();
        row.insert("chain_id".into(), self.chain_id.into());
        row.insert("height".into(), block.height.into());
        row.insert("hash".into(), Value::String(block.hash.clone()));
        row
    }

    fn decode_block(&self, table: &str, row: &Row) -> HotStoreResult<BlockRef> {
        let raw_height = row.get("height").ok_or_else(|| StoreError::Decode {
            table: table.to_string(),
            reason: "missing height".to_string(),
        })?;
        let height = value_as_i64(raw_height).ok_or_else(|| InvariantViolation::UnsafeHeight {
            table: table.to_string(),
            value: raw_height.to_string(),
        })?;
        let height = check_height(table, height)?;
        let hash = match row.get("hash") {
            Some(Value::String(hash)) => hash.clone(),
            _ => {
                return Err(StoreError::Decode {
                    table: table.to_string(),
                    reason: "missing hash".to_string(),
                }
                .into())
            }
        };
        Ok(BlockRef::new(height, hash))
    }
}
