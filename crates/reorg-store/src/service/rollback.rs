//! # Rollback Engine
//!
//! Undoes one hot block by replaying its change log in reverse. Each
//! inverse statement is independently safe to re-apply, so a failed
//! rollback can be retried from the start.
//!
//! | Record | Inverse |
//! |--------|---------|
//! | `insert` | delete rows where `<track_by> = id AND chain_id = <chain>` |
//! | `update` | not restored (skipped) |
//! | `delete` | not restored (skipped) |

use crate::config::TablesConfig;
use crate::domain::block::Height;
use crate::domain::change::ChangeRecord;
use crate::domain::invariants::InvariantViolation;
use crate::domain::statement::{Predicate, Statement};
use crate::error::{HotStoreError, HotStoreResult};
use crate::ports::outbound::ColumnStore;
use crate::service::change_log::ChangeLog;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of rolling back one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub height: Height,
    /// Insert records reversed.
    pub reverted: usize,
    /// Update/delete records left in place.
    pub skipped: usize,
}

pub struct RollbackEngine<S: ColumnStore> {
    store: Arc<S>,
    change_log: ChangeLog<S>,
    tables: Arc<TablesConfig>,
    hot_block_table: String,
    chain_id: u64,
    cluster: Option<String>,
}

impl<S: ColumnStore> RollbackEngine<S> {
    pub fn new(
        store: Arc<S>,
        change_log: ChangeLog<S>,
        tables: Arc<TablesConfig>,
        hot_block_table: impl Into<String>,
        chain_id: u64,
        cluster: Option<String>,
    ) -> Self {
        Self {
            store,
            change_log,
            tables,
            hot_block_table: hot_block_table.into(),
            chain_id,
            cluster,
        }
    }

    /// Fully undo block `height`: reverse its changes newest first, then
    /// drop its change log and its hot-block marker.
    ///
    /// A failed write aborts the rollback with a fatal
    /// [`InvariantViolation::RollbackFailed`]: the block's state is then
    /// unknown and the caller must not finalize past it.
    pub async fn rollback_block(&self, height: Height) -> HotStoreResult<RollbackReport> {
        let changes = self.change_log.changes_for(height).await?;
        let mut report = RollbackReport {
            height,
            ..RollbackReport::default()
        };

        for row in &changes {
            match &row.changes {
                ChangeRecord::Insert { table, id } => {
                    let track_by = self.tables.track_by(table).ok_or_else(|| {
                        InvariantViolation::UntrackedTable {
                            height,
                            table: table.clone(),
                        }
                    })?;
                    let statement = Statement::delete(
                        table.as_str(),
                        self.cluster.as_deref(),
                        vec![
                            Predicate::eq(track_by, id.as_str()),
                            Predicate::eq("chain_id", self.chain_id),
                        ],
                    );
                    self.store
                        .exec(&statement)
                        .await
                        .map_err(|err| rollback_failed(height, err.into()))?;
                    report.reverted += 1;
                }
                // TODO: re-insert the recorded `fields` to undo updates and deletes.
                ChangeRecord::Update { table, id, .. } | ChangeRecord::Delete { table, id, .. } => {
                    warn!(
                        "[reorg-store] block #{}: cannot undo {} of {}:{} (log index {})",
                        height,
                        row.changes.kind(),
                        table,
                        id,
                        row.log_index
                    );
                    report.skipped += 1;
                }
            }
        }

        self.change_log
            .remove_height(height)
            .await
            .map_err(|err| rollback_failed(height, err))?;
        let marker = Statement::delete(
            self.hot_block_table.as_str(),
            self.cluster.as_deref(),
            vec![
                Predicate::eq("height", height),
                Predicate::eq("chain_id", self.chain_id),
            ],
        );
        self.store
            .exec(&marker)
            .await
            .map_err(|err| rollback_failed(height, err.into()))?;

        info!(
            "[reorg-store] ⏪ rolled back block #{} ({} reverted, {} skipped)",
            height, report.reverted, report.skipped
        );
        debug!("[reorg-store] rollback report {:?}", report);
        Ok(report)
    }
}

fn rollback_failed(height: Height, err: HotStoreError) -> HotStoreError {
    if err.is_fatal() {
        return err;
    }
    InvariantViolation::RollbackFailed {
        height,
        reason: err.to_string(),
    }
    .into()
}
