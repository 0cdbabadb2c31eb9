//! # Block References and Transaction Descriptors
//!
//! Heights are signed: the finalized status of an empty database is
//! reported at [`EMPTY_HEIGHT`] with hash [`EMPTY_HASH`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height. `-1` is the "nothing indexed yet" sentinel.
pub type Height = i64;

/// Height reported for a chain with no finalized status row.
pub const EMPTY_HEIGHT: Height = -1;

/// Hash reported for a chain with no finalized status row.
pub const EMPTY_HASH: &str = "0x";

/// Largest height accepted from the store (2^53 - 1).
///
/// Heights travel through JSON payloads, so anything above the exact
/// double-precision range is treated as a corrupted value.
pub const MAX_SAFE_HEIGHT: Height = (1 << 53) - 1;

/// A block identified by height and hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: Height,
    pub hash: String,
}

impl BlockRef {
    pub fn new(height: Height, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// The status of a chain that has never been written.
    pub fn empty() -> Self {
        Self::new(EMPTY_HEIGHT, EMPTY_HASH)
    }

    pub fn is_empty(&self) -> bool {
        self.height == EMPTY_HEIGHT
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}

/// Adapter view of the stored chain: the finalized status plus the hot
/// blocks on top of it, ordered by height ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseState {
    pub height: Height,
    pub hash: String,
    pub top: Vec<BlockRef>,
}

impl DatabaseState {
    pub fn new(status: BlockRef, top: Vec<BlockRef>) -> Self {
        Self {
            height: status.height,
            hash: status.hash,
            top,
        }
    }

    /// The finalized status as a block reference.
    pub fn head(&self) -> BlockRef {
        BlockRef::new(self.height, self.hash.clone())
    }

    /// The highest known block, hot or finalized.
    pub fn tip(&self) -> BlockRef {
        self.top.last().cloned().unwrap_or_else(|| self.head())
    }

    /// `[status, ...top]`.
    pub fn chain(&self) -> Vec<BlockRef> {
        let mut chain = Vec::with_capacity(self.top.len() + 1);
        chain.push(self.head());
        chain.extend(self.top.iter().cloned());
        chain
    }
}

/// Input of a finalized-only transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalTxInfo {
    /// Status the caller believes is stored.
    pub prev_head: BlockRef,
    /// Status to store once the batch is written.
    pub next_head: BlockRef,
}

/// Input of a hot transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotTxInfo {
    /// Last block the caller shares with the stored chain.
    pub base_head: BlockRef,
    /// Blocks extending `base_head`, contiguous and ascending.
    pub new_blocks: Vec<BlockRef>,
    /// Highest block known to be final.
    pub finalized_head: BlockRef,
}

impl HotTxInfo {
    /// Last block this transaction knows about.
    pub fn known_tip(&self) -> &BlockRef {
        self.new_blocks.last().unwrap_or(&self.base_head)
    }
}
