//! # Service Layer
//!
//! - `change_log` - Per-block mutation ledger and tracker
//! - `rollback` - Undo of one hot block
//! - `ledger` - Finalized status and hot-block chain
//! - `write_buffer` - Per-transaction store handed to handlers
//! - `database` - Transaction orchestrator implementing `HotDatabase`

pub mod change_log;
pub mod database;
pub mod ledger;
pub mod rollback;
pub mod write_buffer;

pub use change_log::{ChangeLog, ChangeTracker};
pub use database::ReorgDatabase;
pub use ledger::HotBlockLedger;
pub use rollback::{RollbackEngine, RollbackReport};
pub use write_buffer::WriteBuffer;
