//! # Domain Layer
//!
//! Pure types and checks. Nothing here performs I/O.
//!
//! ## Modules
//!
//! - `block` - Block references, database state, transaction descriptors
//! - `change` - Change records and positioned change rows
//! - `invariants` - Chain invariants and their violations
//! - `row` - JSON row helpers
//! - `statement` - Select/Delete/Reload statement model with SQL rendering

pub mod block;
pub mod change;
pub mod invariants;
pub mod row;
pub mod statement;

pub use block::{
    BlockRef, DatabaseState, FinalTxInfo, Height, HotTxInfo, EMPTY_HASH, EMPTY_HEIGHT,
    MAX_SAFE_HEIGHT,
};
pub use change::{ChangeRecord, ChangeRow};
pub use invariants::InvariantViolation;
pub use row::Row;
pub use statement::{Order, Predicate, Select, Statement};
