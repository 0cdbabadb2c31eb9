//! Ports module for the reorg store
//!
//! Inbound: the adapter protocol. Outbound: the column store client.

pub mod inbound;
pub mod outbound;

pub use inbound::{BatchHandler, BlockHandler, HotDatabase, PerBlock, RangeHandler};
pub use outbound::{ColumnStore, QueryId, DEFAULT_INSERT_BATCH_ROWS, MAX_INSERT_ROWS};
