//! Reorg Database - transaction orchestrator
//!
//! Coordinates rollback on divergence, block writes and promotion of hot
//! blocks to finalized status. No state is kept between calls: every
//! transaction starts by loading `{status, hot blocks}` from the store.
//!
//! ```text
//! load state ──→ checks ──→ roll back diverging blocks (newest first)
//!                               │
//!                               ├── finalized-on-arrival blocks (untracked)
//!                               ├── hot blocks: marker + tracked writes
//!                               │
//!                               └── prune markers ≤ finalized ──→ status
//! ```

use crate::config::{HotStoreConfig, MismatchPolicy, TablesConfig};
use crate::domain::block::{BlockRef, DatabaseState, FinalTxInfo, Height, HotTxInfo};
use crate::domain::invariants::{check_block, check_chain_continuity, InvariantViolation};
use crate::error::{HotStoreError, HotStoreResult};
use crate::ports::inbound::{BatchHandler, BlockHandler, HotDatabase, PerBlock, RangeHandler};
use crate::ports::outbound::ColumnStore;
use crate::service::change_log::{ChangeLog, ChangeTracker};
use crate::service::ledger::HotBlockLedger;
use crate::service::rollback::RollbackEngine;
use crate::service::write_buffer::WriteBuffer;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reorg-aware adapter over a [`ColumnStore`].
pub struct ReorgDatabase<S: ColumnStore> {
    config: HotStoreConfig,
    store: Arc<S>,
    tables: Arc<TablesConfig>,
    ledger: HotBlockLedger<S>,
    change_log: ChangeLog<S>,
    rollback: RollbackEngine<S>,
}

impl<S: ColumnStore + 'static> ReorgDatabase<S> {
    pub fn new(config: HotStoreConfig, store: Arc<S>) -> HotStoreResult<Self> {
        config.validate()?;

        let state_tables = config.state_tables();
        let tables = Arc::new(config.tables.clone());
        let ledger = HotBlockLedger::new(
            Arc::clone(&store),
            state_tables.clone(),
            config.chain_id,
            config.cluster.clone(),
        );
        let change_log = ChangeLog::new(
            Arc::clone(&store),
            state_tables.hot_change_log.clone(),
            config.chain_id,
            config.cluster.clone(),
        );
        let rollback = RollbackEngine::new(
            Arc::clone(&store),
            change_log.clone(),
            Arc::clone(&tables),
            state_tables.hot_block,
            config.chain_id,
            config.cluster.clone(),
        );

        debug!(
            "[reorg-store] adapter for chain {} (schema {:?}, cluster {:?})",
            config.chain_id, config.state_schema, config.cluster
        );
        Ok(Self {
            config,
            store,
            tables,
            ledger,
            change_log,
            rollback,
        })
    }

    pub fn config(&self) -> &HotStoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current `{status, hot blocks}` with invariants checked.
    pub async fn load_state(&self) -> HotStoreResult<DatabaseState> {
        self.ledger.load_state().await
    }

    fn buffer(&self, tracker: Option<ChangeTracker<S>>) -> WriteBuffer<S> {
        WriteBuffer::new(
            Arc::clone(&self.store),
            tracker,
            Arc::clone(&self.tables),
            self.config.cluster.clone(),
        )
    }

    /// Roll back `blocks`, highest first.
    async fn rollback_all(&self, blocks: &[BlockRef]) -> HotStoreResult<()> {
        for block in blocks.iter().rev() {
            self.rollback.rollback_block(block.height).await?;
        }
        Ok(())
    }

    async fn finalize(&self, head: &BlockRef) -> HotStoreResult<()> {
        self.ledger.prune_up_to(head.height).await?;
        if self.config.prune_change_log {
            self.change_log.prune_up_to(head.height).await?;
        }
        self.ledger.write_status(head).await
    }

    async fn run_transact<H>(&self, info: &FinalTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: BatchHandler<S>,
    {
        debug!(
            "[reorg-store] transact {} -> {}",
            info.prev_head, info.next_head
        );
        check_block("prev head", &info.prev_head)?;
        check_block("next head", &info.next_head)?;
        let state = self.ledger.load_state().await?;

        let stored = state.head();
        if stored != info.prev_head {
            return Err(InvariantViolation::Race {
                expected: info.prev_head.clone(),
                actual: stored,
            }
            .into());
        }
        if info.prev_head.height >= info.next_head.height || info.prev_head.hash == info.next_head.hash {
            return Err(InvariantViolation::HeadNotAdvancing {
                prev: info.prev_head.clone(),
                next: info.next_head.clone(),
            }
            .into());
        }

        self.rollback_all(&state.top).await?;

        let mut buffer = self.buffer(None);
        handler
            .handle(&mut buffer)
            .await
            .map_err(HotStoreError::from_handler)?;
        buffer.flush().await?;

        self.ledger.write_status(&info.next_head).await?;
        info!(
            "[reorg-store] ✅ status {} -> {}",
            info.prev_head, info.next_head
        );
        Ok(())
    }

    async fn run_transact_hot2<H>(&self, info: &HotTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: RangeHandler<S>,
    {
        check_block("base head", &info.base_head)?;
        check_block("finalized head", &info.finalized_head)?;
        for block in &info.new_blocks {
            check_block("new blocks", block)?;
        }
        let state = self.ledger.load_state().await?;
        let chain = state.chain();
        let base_height = state.height;
        debug!(
            "[reorg-store] transact hot: base {}, {} new blocks, finalized {}, stored {} + {} hot",
            info.base_head,
            info.new_blocks.len(),
            info.finalized_head,
            state.head(),
            state.top.len()
        );

        check_chain_continuity(&info.base_head, &info.new_blocks)?;

        let known_tip = info.known_tip();
        if info.finalized_head.height > known_tip.height {
            return Err(InvariantViolation::FinalizedAheadOfChain {
                finalized: info.finalized_head.clone(),
                tip: known_tip.clone(),
            }
            .into());
        }

        if info.new_blocks.is_empty() {
            let tip = state.tip();
            if tip.hash != info.base_head.hash {
                return Err(InvariantViolation::Race {
                    expected: info.base_head.clone(),
                    actual: tip,
                }
                .into());
            }
        }

        if base_height > info.finalized_head.height {
            return Err(InvariantViolation::FinalizedBelowBase {
                finalized: info.finalized_head.clone(),
                status: state.head(),
            }
            .into());
        }

        let rollback_pos = info
            .base_head
            .height
            .checked_add(1)
            .and_then(|h| h.checked_sub(base_height))
            .filter(|pos| (1..=chain.len() as Height).contains(pos))
            .ok_or_else(|| InvariantViolation::BaseHeadOutOfRange {
                base: info.base_head.clone(),
                status: state.head(),
                tip: state.tip(),
            })? as usize;

        if rollback_pos < chain.len() {
            info!(
                "[reorg-store] ⏪ reorg at {}: rolling back {} hot blocks",
                info.base_head,
                chain.len() - rollback_pos
            );
        }
        self.rollback_all(&chain[rollback_pos..]).await?;

        if let Some(first) = info.new_blocks.first() {
            let finalized_end = (info.finalized_head.height - first.height + 1)
                .clamp(0, info.new_blocks.len() as Height) as usize;

            if finalized_end > 0 {
                let mut buffer = self.buffer(None);
                handler
                    .handle_range(&mut buffer, &info.new_blocks[..finalized_end])
                    .await
                    .map_err(HotStoreError::from_handler)?;
                buffer.flush().await?;
                debug!(
                    "[reorg-store] {} blocks written as finalized",
                    finalized_end
                );
            }

            for block in &info.new_blocks[finalized_end..] {
                self.ledger.append_hot_block(block).await?;
                let mut buffer = self.buffer(Some(self.change_log.tracker(block.height)));
                handler
                    .handle_range(&mut buffer, std::slice::from_ref(block))
                    .await
                    .map_err(HotStoreError::from_handler)?;
                buffer.flush().await?;
                debug!("[reorg-store] 🔥 hot block {} applied", block);
            }
        }

        let mut reconciled: Vec<BlockRef> = chain[..rollback_pos].to_vec();
        reconciled.extend(info.new_blocks.iter().cloned());
        let finalized_pos = (info.finalized_head.height - base_height) as usize;
        let actual = reconciled.get(finalized_pos);
        if actual.map(|b| &b.hash) != Some(&info.finalized_head.hash) {
            let violation = InvariantViolation::FinalizedHashMismatch {
                expected: info.finalized_head.clone(),
                actual: actual.cloned(),
            };
            match self.config.finalized_mismatch {
                MismatchPolicy::Log => warn!("[reorg-store] ⚠️ {}", violation),
                MismatchPolicy::Fail => return Err(violation.into()),
            }
        }

        self.finalize(&info.finalized_head).await?;
        info!(
            "[reorg-store] ✅ finalized {}, tip {}",
            info.finalized_head,
            reconciled.last().unwrap_or(&info.finalized_head)
        );
        Ok(())
    }
}

/// Log fatal errors before handing them back to the pipeline.
fn report<T>(result: HotStoreResult<T>) -> HotStoreResult<T> {
    if let Err(err) = &result {
        if err.is_fatal() {
            error!("[reorg-store] 🛑 {}; indexing must stop", err);
        }
    }
    result
}

#[async_trait]
impl<S: ColumnStore + 'static> HotDatabase for ReorgDatabase<S> {
    type Store = S;

    async fn connect(&mut self) -> HotStoreResult<DatabaseState> {
        let status = report(self.ledger.last_status().await)?;
        info!(
            "[reorg-store] connected: chain {} at {}",
            self.config.chain_id, status
        );
        Ok(DatabaseState::new(status, Vec::new()))
    }

    async fn transact<H>(&mut self, info: &FinalTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: BatchHandler<Self::Store>,
    {
        report(self.run_transact(info, handler).await)
    }

    async fn transact_hot<H>(&mut self, info: &HotTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: BlockHandler<Self::Store>,
    {
        let mut per_block = PerBlock::new(handler);
        report(self.run_transact_hot2(info, &mut per_block).await)
    }

    async fn transact_hot2<H>(&mut self, info: &HotTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: RangeHandler<Self::Store>,
    {
        report(self.run_transact_hot2(info, handler).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryColumnStore;
    use crate::test_utils::{block, setup, setup_with, test_config, transfer_ids, TransferWriter};

    fn hot(base: BlockRef, new_blocks: Vec<BlockRef>, finalized: BlockRef) -> HotTxInfo {
        HotTxInfo {
            base_head: base,
            new_blocks,
            finalized_head: finalized,
        }
    }

    async fn hot_heights(db: &ReorgDatabase<InMemoryColumnStore>) -> Vec<Height> {
        db.load_state()
            .await
            .unwrap()
            .top
            .iter()
            .map(|b| b.height)
            .collect()
    }

    #[tokio::test]
    async fn test_connect_fresh_chain() {
        let (_store, mut db) = setup();
        let state = db.connect().await.unwrap();
        assert_eq!(state, DatabaseState::new(BlockRef::empty(), vec![]));
    }

    #[tokio::test]
    async fn test_connect_ignores_hot_blocks() {
        let (_store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact_hot(
            &hot(block(-1, "0x"), vec![block(0, "g"), block(1, "a")], block(0, "g")),
            &mut writer,
        )
        .await
        .unwrap();

        let state = db.connect().await.unwrap();
        assert_eq!(state.head(), block(0, "g"));
        assert!(state.top.is_empty());
        assert_eq!(hot_heights(&db).await, vec![1]);
    }

    #[tokio::test]
    async fn test_transact_writes_batch_and_status() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::with_batch(vec![block(0, "g"), block(1, "a")]);

        db.transact(
            &FinalTxInfo {
                prev_head: BlockRef::empty(),
                next_head: block(1, "a"),
            },
            &mut writer,
        )
        .await
        .unwrap();

        let state = db.load_state().await.unwrap();
        assert_eq!(state.head(), block(1, "a"));
        assert_eq!(transfer_ids(&store), vec!["a-0", "g-0"]);
        assert_eq!(
            store.executed(),
            vec!["SYSTEM RELOAD DICTIONARY transfers_dict ON CLUSTER cluster1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_transact_rejects_stale_prev_head() {
        let (store, mut db) = setup();
        db.transact(
            &FinalTxInfo {
                prev_head: BlockRef::empty(),
                next_head: block(5, "e"),
            },
            &mut TransferWriter::new(),
        )
        .await
        .unwrap();
        let status_writes = store.insert_calls("state.status");

        let err = db
            .transact(
                &FinalTxInfo {
                    prev_head: block(5, "other"),
                    next_head: block(6, "f"),
                },
                &mut TransferWriter::new(),
            )
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(err.to_string().contains("foreign process"));
        assert_eq!(store.insert_calls("state.status"), status_writes);
    }

    #[tokio::test]
    async fn test_transact_requires_advancing_head() {
        let (_store, mut db) = setup();
        let err = db
            .transact(
                &FinalTxInfo {
                    prev_head: BlockRef::empty(),
                    next_head: block(-1, "x"),
                },
                &mut TransferWriter::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::HeadNotAdvancing { .. })
        ));
    }

    #[tokio::test]
    async fn test_transact_rolls_back_hot_blocks_first() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact_hot(
            &hot(
                block(-1, "0x"),
                vec![block(0, "g"), block(1, "a"), block(2, "b")],
                block(0, "g"),
            ),
            &mut writer,
        )
        .await
        .unwrap();
        assert_eq!(transfer_ids(&store), vec!["a-0", "b-0", "g-0"]);

        let mut batch = TransferWriter::with_batch(vec![block(1, "a2")]);
        db.transact(
            &FinalTxInfo {
                prev_head: block(0, "g"),
                next_head: block(1, "a2"),
            },
            &mut batch,
        )
        .await
        .unwrap();

        assert_eq!(transfer_ids(&store), vec!["a2-0", "g-0"]);
        assert!(hot_heights(&db).await.is_empty());
        assert_eq!(db.load_state().await.unwrap().head(), block(1, "a2"));
    }

    #[tokio::test]
    async fn test_reorg_rolls_back_newest_first() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact(
            &FinalTxInfo {
                prev_head: BlockRef::empty(),
                next_head: block(10, "a"),
            },
            &mut writer,
        )
        .await
        .unwrap();
        db.transact_hot(
            &hot(block(10, "a"), vec![block(11, "b"), block(12, "c")], block(10, "a")),
            &mut writer,
        )
        .await
        .unwrap();
        store.clear_calls();

        db.transact_hot(
            &hot(block(10, "a"), vec![block(11, "b2")], block(10, "a")),
            &mut writer,
        )
        .await
        .unwrap();

        let marker_deletes: Vec<String> = store
            .executed()
            .into_iter()
            .filter(|sql| sql.starts_with("DELETE FROM state.hot_block") && sql.contains("height = "))
            .collect();
        assert_eq!(
            marker_deletes,
            vec![
                "DELETE FROM state.hot_block ON CLUSTER cluster1 WHERE height = 12 AND chain_id = 1",
                "DELETE FROM state.hot_block ON CLUSTER cluster1 WHERE height = 11 AND chain_id = 1",
            ]
        );
        let state = db.load_state().await.unwrap();
        assert_eq!(state.top, vec![block(11, "b2")]);
        assert_eq!(transfer_ids(&store), vec!["b2-0"]);
    }

    #[tokio::test]
    async fn test_finalized_on_arrival_is_untracked() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::new();

        db.transact_hot2(
            &hot(
                block(-1, "0x"),
                vec![block(0, "g"), block(1, "a"), block(2, "b")],
                block(1, "a"),
            ),
            &mut writer,
        )
        .await
        .unwrap();

        assert_eq!(writer.ranges, vec![vec![0, 1], vec![2]]);
        let log = store.final_rows("state.hot_change_log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["height"], serde_json::json!(2));
        assert_eq!(hot_heights(&db).await, vec![2]);
    }

    #[tokio::test]
    async fn test_empty_notification_must_match_tip() {
        let (_store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact_hot(
            &hot(block(-1, "0x"), vec![block(0, "g"), block(1, "a")], block(-1, "0x")),
            &mut writer,
        )
        .await
        .unwrap();

        let err = db
            .transact_hot(&hot(block(1, "zz"), vec![], block(0, "g")), &mut writer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::Race { .. })
        ));

        db.transact_hot(&hot(block(1, "a"), vec![], block(1, "a")), &mut writer)
            .await
            .unwrap();
        let state = db.load_state().await.unwrap();
        assert_eq!(state.head(), block(1, "a"));
        assert!(state.top.is_empty());
    }

    #[tokio::test]
    async fn test_finalized_ahead_of_tip_is_fatal() {
        let (_store, mut db) = setup();
        let err = db
            .transact_hot(
                &hot(block(-1, "0x"), vec![block(0, "g")], block(3, "d")),
                &mut TransferWriter::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::FinalizedAheadOfChain { .. })
        ));
    }

    #[tokio::test]
    async fn test_finalizing_below_status_is_fatal() {
        let (_store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact(
            &FinalTxInfo {
                prev_head: BlockRef::empty(),
                next_head: block(10, "a"),
            },
            &mut writer,
        )
        .await
        .unwrap();

        let err = db
            .transact_hot(&hot(block(10, "a"), vec![block(11, "b")], block(9, "i")), &mut writer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::FinalizedBelowBase { .. })
        ));
    }

    #[tokio::test]
    async fn test_base_head_outside_chain_is_fatal() {
        let (_store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact(
            &FinalTxInfo {
                prev_head: BlockRef::empty(),
                next_head: block(10, "a"),
            },
            &mut writer,
        )
        .await
        .unwrap();

        let err = db
            .transact_hot(&hot(block(14, "x"), vec![block(15, "y")], block(10, "a")), &mut writer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::BaseHeadOutOfRange { .. })
        ));
        assert!(writer.seen.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_heights_are_rejected() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::new();

        let cases = vec![
            hot(block(i64::MAX, "0x"), vec![], block(-1, "0x")),
            hot(block(i64::MAX, "x"), vec![block(0, "a")], block(0, "a")),
            hot(block(-1, "0x"), vec![block(0, "a")], block(i64::MIN, "f")),
        ];
        for info in &cases {
            let err = db.transact_hot(info, &mut writer).await.unwrap_err();
            assert!(err.is_fatal());
            assert!(matches!(
                err,
                HotStoreError::Invariant(InvariantViolation::UnsafeHeight { .. })
            ));
        }

        let err = db
            .transact(
                &FinalTxInfo {
                    prev_head: BlockRef::empty(),
                    next_head: block(i64::MAX, "z"),
                },
                &mut writer,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::UnsafeHeight { .. })
        ));
        assert!(writer.seen.is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_hash_mismatch_policy() {
        let (_store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact_hot(
            &hot(block(-1, "0x"), vec![block(0, "g"), block(1, "a")], block(0, "not-g")),
            &mut writer,
        )
        .await
        .unwrap();
        assert_eq!(db.load_state().await.unwrap().head(), block(0, "not-g"));

        let mut config = test_config();
        config.finalized_mismatch = MismatchPolicy::Fail;
        let (_store, mut strict) = setup_with(config);
        let err = strict
            .transact_hot(
                &hot(block(-1, "0x"), vec![block(0, "g"), block(1, "a")], block(0, "not-g")),
                &mut writer,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HotStoreError::Invariant(InvariantViolation::FinalizedHashMismatch { .. })
        ));
        assert_eq!(strict.load_state().await.unwrap().head(), BlockRef::empty());
    }

    #[tokio::test]
    async fn test_handler_error_is_not_fatal() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::failing_at(1);

        let err = db
            .transact_hot(
                &hot(block(-1, "0x"), vec![block(0, "g"), block(1, "a")], block(-1, "0x")),
                &mut writer,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HotStoreError::Handler(_)));
        assert!(!err.is_fatal());
        // Block 0 stays applied as hot; the retry rolls it back.
        assert_eq!(transfer_ids(&store), vec!["g-0"]);
        assert_eq!(hot_heights(&db).await, vec![0, 1]);
        assert_eq!(db.load_state().await.unwrap().head(), BlockRef::empty());
    }

    #[tokio::test]
    async fn test_change_log_pruned_on_finalize() {
        let (store, mut db) = setup();
        let mut writer = TransferWriter::new();
        db.transact_hot(
            &hot(block(-1, "0x"), vec![block(0, "g"), block(1, "a")], block(-1, "0x")),
            &mut writer,
        )
        .await
        .unwrap();
        assert_eq!(store.final_rows("state.hot_change_log").len(), 2);

        db.transact_hot(&hot(block(1, "a"), vec![block(2, "b")], block(1, "a")), &mut writer)
            .await
            .unwrap();

        let log = store.final_rows("state.hot_change_log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["height"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.tables = TablesConfig::new().with_table("t", crate::config::TableConfig::tracked(""));
        let result = ReorgDatabase::new(config, Arc::new(InMemoryColumnStore::new()));
        assert!(matches!(result, Err(HotStoreError::Config(_))));
    }
}
