//! Driving Ports (API - Inbound)
//!
//! The adapter protocol consumed by the indexing pipeline, plus the
//! callback traits the pipeline implements to write block data.

use crate::domain::block::{BlockRef, DatabaseState, FinalTxInfo, HotTxInfo};
use crate::error::HotStoreResult;
use crate::ports::outbound::ColumnStore;
use crate::service::write_buffer::WriteBuffer;
use async_trait::async_trait;

/// Writes a finalized-only batch.
#[async_trait]
pub trait BatchHandler<S: ColumnStore>: Send {
    async fn handle(&mut self, store: &mut WriteBuffer<S>) -> anyhow::Result<()>;
}

/// Writes a contiguous slice of new blocks.
///
/// Called once with every block being finalized on arrival (untracked),
/// then once per hot block with a single-element slice (tracked).
#[async_trait]
pub trait RangeHandler<S: ColumnStore>: Send {
    async fn handle_range(
        &mut self,
        store: &mut WriteBuffer<S>,
        blocks: &[BlockRef],
    ) -> anyhow::Result<()>;
}

/// Writes one block.
#[async_trait]
pub trait BlockHandler<S: ColumnStore>: Send {
    async fn handle_block(
        &mut self,
        store: &mut WriteBuffer<S>,
        block: &BlockRef,
    ) -> anyhow::Result<()>;
}

/// Adapts a [`BlockHandler`] to a [`RangeHandler`] by visiting the slice in
/// order.
pub struct PerBlock<'a, H> {
    inner: &'a mut H,
}

impl<'a, H> PerBlock<'a, H> {
    pub fn new(inner: &'a mut H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<'a, S, H> RangeHandler<S> for PerBlock<'a, H>
where
    S: ColumnStore + 'static,
    H: BlockHandler<S>,
{
    async fn handle_range(
        &mut self,
        store: &mut WriteBuffer<S>,
        blocks: &[BlockRef],
    ) -> anyhow::Result<()> {
        for block in blocks {
            self.inner.handle_block(store, block).await?;
        }
        Ok(())
    }
}

/// Reorg-aware database protocol.
///
/// Methods take `&mut self`: one adapter instance is one writer. Writers in
/// other processes are detected by comparing the stored status with what
/// the caller expects; a mismatch is fatal.
#[async_trait]
pub trait HotDatabase: Send {
    type Store: ColumnStore + 'static;

    /// Stored finalized status with an empty hot chain.
    async fn connect(&mut self) -> HotStoreResult<DatabaseState>;

    /// Apply a finalized-only batch moving the status from
    /// `info.prev_head` to `info.next_head`. Any hot blocks are rolled back
    /// first.
    async fn transact<H>(&mut self, info: &FinalTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: BatchHandler<Self::Store>;

    /// [`transact_hot2`](Self::transact_hot2) with one handler call per block.
    async fn transact_hot<H>(&mut self, info: &HotTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: BlockHandler<Self::Store>;

    /// Reconcile the stored hot chain with `info`: roll back diverging
    /// blocks, apply new ones, finalize up to `info.finalized_head`.
    async fn transact_hot2<H>(&mut self, info: &HotTxInfo, handler: &mut H) -> HotStoreResult<()>
    where
        H: RangeHandler<Self::Store>;
}
