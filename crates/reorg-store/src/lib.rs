//! # Reorg Store
//!
//! Chain-reorganization-aware storage adapter for append-only column
//! stores. The store has no multi-row transactions, no row locks and only
//! eventually-applied deletes; this crate makes it behave as if blocks
//! could be committed atomically and rolled back until finalized.
//!
//! ## Architecture
//!
//! ```text
//! Indexing pipeline ──transact / transact_hot / transact_hot2──→ ReorgDatabase
//!                                                                   │
//!            ┌──────────────────┬──────────────────┬────────────────┤
//!            ↓                  ↓                  ↓                ↓
//!      HotBlockLedger     RollbackEngine       ChangeLog       WriteBuffer
//!      (status,           (undo one block)   (hot_change_log)  (handler store)
//!       hot_block)              │                  │                │
//!            └──────────────────┴──────────────────┴────────────────┘
//!                                      ↓
//!                               ColumnStore (port)
//! ```
//!
//! ## Invariants
//!
//! | ID | Invariant | Enforcement |
//! |----|-----------|-------------|
//! | 1 | Hot blocks are contiguous from `status.height + 1` | checked on every state load |
//! | 2 | A hot block's change rows are written before it is committed | tracked writes per block |
//! | 3 | Heights fit `[-1, 2^53 - 1]` | checked on every decode and on caller input |
//! | 4 | One writer per chain | optimistic status comparison |
//!
//! Every violation is fatal ([`HotStoreError::is_fatal`]): the pipeline must
//! stop until an operator has found the second writer or repaired the
//! ledger.
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Blocks, change records, rows, statements, invariants
//! - `ports/` - Inbound adapter protocol, outbound column store SPI
//! - `adapters/` - In-memory column store
//! - `service/` - Change log, rollback, ledger, write buffer, orchestrator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reorg_store::{HotDatabase, HotStoreConfig, ReorgDatabase};
//!
//! let config = HotStoreConfig::from_env()?;
//! let mut db = ReorgDatabase::new(config, Arc::new(client))?;
//!
//! let state = db.connect().await?;
//! db.transact_hot(&info, &mut handler).await?;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapters::{InMemoryColumnStore, StoreCall, TableEngine};
pub use config::{HotStoreConfig, MismatchPolicy, StateTables, TableConfig, TablesConfig};
pub use domain::{
    BlockRef, ChangeRecord, ChangeRow, DatabaseState, FinalTxInfo, Height, HotTxInfo,
    InvariantViolation, Row,
};
pub use error::{ConfigError, HotStoreError, HotStoreResult, StoreError};
pub use ports::{BatchHandler, BlockHandler, ColumnStore, HotDatabase, PerBlock, RangeHandler};
pub use service::{ReorgDatabase, WriteBuffer};
