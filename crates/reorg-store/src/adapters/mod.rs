//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implementations of the outbound `ColumnStore` port.

mod memory;

pub use memory::{InMemoryColumnStore, StoreCall, TableEngine};
