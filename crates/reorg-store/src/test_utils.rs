//! Test fixtures for the reorg store.
//!
//! Shared by the unit tests and the integration suite. Enable with the
//! `test-utils` feature flag.
//!
//! ```rust,ignore
//! use reorg_store::test_utils::{block, setup, TransferWriter};
//!
//! let (store, mut db) = setup();
//! db.transact_hot(&info, &mut TransferWriter::new()).await?;
//! ```

use crate::adapters::InMemoryColumnStore;
use crate::config::{HotStoreConfig, TableConfig, TablesConfig};
use crate::domain::block::{BlockRef, Height};
use crate::domain::row::{value_as_id, Row};
use crate::ports::inbound::{BatchHandler, BlockHandler, RangeHandler};
use crate::ports::outbound::ColumnStore;
use crate::service::{ReorgDatabase, WriteBuffer};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const TEST_CHAIN_ID: u64 = 1;
pub const TEST_SCHEMA: &str = "state";

/// Tracked entity table (`id`), reloads [`TRANSFERS_DICT`] after flush.
pub const TRANSFERS: &str = "transfers";
pub const TRANSFERS_DICT: &str = "transfers_dict";
/// Untracked table: written, never rolled back.
pub const BLOCK_STATS: &str = "block_stats";

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn block(height: Height, hash: &str) -> BlockRef {
    BlockRef::new(height, hash)
}

/// Blocks `from..=to` with hashes `<prefix><height>`.
pub fn chain(from: Height, to: Height, prefix: &str) -> Vec<BlockRef> {
    (from..=to)
        .map(|h| BlockRef::new(h, format!("{}{}", prefix, h)))
        .collect()
}

pub fn test_config() -> HotStoreConfig {
    HotStoreConfig::new(TEST_CHAIN_ID, TEST_SCHEMA).with_tables(
        TablesConfig::new()
            .with_table(
                TRANSFERS,
                TableConfig::tracked("id").with_dictionary(TRANSFERS_DICT),
            )
            .with_table(BLOCK_STATS, TableConfig::default()),
    )
}

pub fn setup() -> (Arc<InMemoryColumnStore>, ReorgDatabase<InMemoryColumnStore>) {
    setup_with(test_config())
}

pub fn setup_with(
    config: HotStoreConfig,
) -> (Arc<InMemoryColumnStore>, ReorgDatabase<InMemoryColumnStore>) {
    init_tracing();
    let store = Arc::new(InMemoryColumnStore::for_config(&config));
    let db = ReorgDatabase::new(config, Arc::clone(&store)).expect("valid test config");
    (store, db)
}

pub fn transfer_row(block: &BlockRef, index: usize) -> Row {
    let value = json!({
        "id": format!("{}-{}", block.hash, index),
        "chain_id": TEST_CHAIN_ID,
        "height": block.height,
        "block_hash": block.hash,
        "amount": index as u64 + 1,
    });
    value.as_object().cloned().unwrap_or_default()
}

/// Sorted transfer ids of the test chain as a `FINAL` read would see them.
pub fn transfer_ids(store: &InMemoryColumnStore) -> Vec<String> {
    let mut ids: Vec<String> = store
        .final_rows(TRANSFERS)
        .iter()
        .filter(|row| row.get("chain_id") == Some(&json!(TEST_CHAIN_ID)))
        .filter_map(|row| row.get("id").and_then(value_as_id))
        .collect();
    ids.sort();
    ids
}

/// Handler writing `transfers_per_block` transfers (staged, flushed by the
/// adapter) and one `block_stats` row (immediate) per block.
#[derive(Debug)]
pub struct TransferWriter {
    pub transfers_per_block: usize,
    /// Blocks written by `transact`.
    pub batch: Vec<BlockRef>,
    /// Every block written, in call order.
    pub seen: Vec<Height>,
    /// Heights of every `handle_range` slice.
    pub ranges: Vec<Vec<Height>>,
    /// Fail instead of writing this block.
    pub fail_at: Option<Height>,
}

impl Default for TransferWriter {
    fn default() -> Self {
        Self {
            transfers_per_block: 1,
            batch: Vec::new(),
            seen: Vec::new(),
            ranges: Vec::new(),
            fail_at: None,
        }
    }
}

impl TransferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(batch: Vec<BlockRef>) -> Self {
        Self {
            batch,
            ..Self::default()
        }
    }

    pub fn failing_at(height: Height) -> Self {
        Self {
            fail_at: Some(height),
            ..Self::default()
        }
    }

    async fn write<S: ColumnStore>(
        &mut self,
        store: &mut WriteBuffer<S>,
        block: &BlockRef,
    ) -> anyhow::Result<()> {
        if self.fail_at == Some(block.height) {
            anyhow::bail!("handler failed at block {}", block);
        }
        store.register_all(
            TRANSFERS,
            (0..self.transfers_per_block).map(|i| transfer_row(block, i)),
        );
        let stats = json!({
            "chain_id": TEST_CHAIN_ID,
            "height": block.height,
            "transfers": self.transfers_per_block,
        });
        store
            .insert(BLOCK_STATS, &[stats.as_object().cloned().unwrap_or_default()])
            .await?;
        self.seen.push(block.height);
        Ok(())
    }
}

#[async_trait]
impl<S: ColumnStore + 'static> BatchHandler<S> for TransferWriter {
    async fn handle(&mut self, store: &mut WriteBuffer<S>) -> anyhow::Result<()> {
        let batch = std::mem::take(&mut self.batch);
        for block in &batch {
            self.write(store, block).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ColumnStore + 'static> BlockHandler<S> for TransferWriter {
    async fn handle_block(
        &mut self,
        store: &mut WriteBuffer<S>,
        block: &BlockRef,
    ) -> anyhow::Result<()> {
        self.write(store, block).await
    }
}

#[async_trait]
impl<S: ColumnStore + 'static> RangeHandler<S> for TransferWriter {
    async fn handle_range(
        &mut self,
        store: &mut WriteBuffer<S>,
        blocks: &[BlockRef],
    ) -> anyhow::Result<()> {
        self.ranges.push(blocks.iter().map(|b| b.height).collect());
        for block in blocks {
            self.write(store, block).await?;
        }
        Ok(())
    }
}
