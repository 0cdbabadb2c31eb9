//! # Chain Invariants
//!
//! | Invariant | Checked by |
//! |-----------|------------|
//! | Hot blocks are contiguous from `status.height + 1` | [`check_state`] |
//! | New blocks extend the base head without gaps | [`check_chain_continuity`] |
//! | Heights fit the safe integer range | [`check_height`] |
//! | One writer per chain | status comparison in the orchestrator |
//!
//! Violations are fatal: they mean a second writer or a corrupted ledger,
//! and nothing can be repaired automatically.

use crate::domain::block::{BlockRef, DatabaseState, Height, EMPTY_HEIGHT, MAX_SAFE_HEIGHT};
use thiserror::Error;

/// A broken invariant. Processing must stop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Stored chain does not match what the caller expects.
    #[error("race detected: expected {expected}, found {actual}; status table was updated by foreign process, make sure no other processor is running")]
    Race { expected: BlockRef, actual: BlockRef },

    /// A block does not follow its predecessor.
    #[error("blocks must form a continuous chain: expected height {expected} after {previous}, got {actual}")]
    NonContiguousChain {
        previous: BlockRef,
        expected: Height,
        actual: BlockRef,
    },

    /// Height outside `[-1, 2^53 - 1]`.
    #[error("unsafe height value {value} in {table}")]
    UnsafeHeight { table: String, value: String },

    /// Finalized transaction does not move the head forward.
    #[error("next head {next} must be above and differ from previous head {prev}")]
    HeadNotAdvancing { prev: BlockRef, next: BlockRef },

    /// Finalized head is beyond the last block of the transaction.
    #[error("finalized head {finalized} is ahead of known chain tip {tip}")]
    FinalizedAheadOfChain { finalized: BlockRef, tip: BlockRef },

    /// Finalized head is below the stored finalized status.
    #[error("cannot finalize {finalized} below stored status {status}; status table was updated by foreign process, make sure no other processor is running")]
    FinalizedBelowBase { finalized: BlockRef, status: BlockRef },

    /// Base head is not inside the stored chain.
    #[error("base head {base} is outside stored chain [{status} .. {tip}]")]
    BaseHeadOutOfRange {
        base: BlockRef,
        status: BlockRef,
        tip: BlockRef,
    },

    /// Reconciled chain disagrees with the finalized head.
    #[error("finalized head {expected} does not match reconciled chain block {actual:?}")]
    FinalizedHashMismatch {
        expected: BlockRef,
        actual: Option<BlockRef>,
    },

    /// Undo of a hot block stopped part way; its true state is unknown.
    #[error("rollback of block {height} failed, block state is unknown: {reason}")]
    RollbackFailed { height: Height, reason: String },

    /// Change log references a table that has no tracking column.
    #[error("change log of block {height} references table {table} without a tracking column")]
    UntrackedTable { height: Height, table: String },
}

/// Validate a height read from the store.
pub fn check_height(table: &str, value: i64) -> Result<Height, InvariantViolation> {
    if (EMPTY_HEIGHT..=MAX_SAFE_HEIGHT).contains(&value) {
        Ok(value)
    } else {
        Err(InvariantViolation::UnsafeHeight {
            table: table.to_string(),
            value: value.to_string(),
        })
    }
}

/// Validate a caller-supplied block descriptor.
pub fn check_block(what: &str, block: &BlockRef) -> Result<(), InvariantViolation> {
    check_height(what, block.height).map(|_| ())
}

/// Every block must sit exactly one height above its predecessor, starting
/// right after `base`.
pub fn check_chain_continuity(base: &BlockRef, blocks: &[BlockRef]) -> Result<(), InvariantViolation> {
    let mut previous = base;
    for block in blocks {
        let expected = previous.height.checked_add(1).ok_or_else(|| {
            InvariantViolation::UnsafeHeight {
                table: "chain".to_string(),
                value: previous.height.to_string(),
            }
        })?;
        if block.height != expected {
            return Err(InvariantViolation::NonContiguousChain {
                previous: previous.clone(),
                expected,
                actual: block.clone(),
            });
        }
        previous = block;
    }
    Ok(())
}

/// Invariants that must hold for every loaded state.
pub fn check_state(state: &DatabaseState) -> Result<(), InvariantViolation> {
    check_height("status", state.height)?;
    check_chain_continuity(&state.head(), &state.top)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(heights: &[Height]) -> Vec<BlockRef> {
        heights
            .iter()
            .map(|h| BlockRef::new(*h, format!("h{}", h)))
            .collect()
    }

    #[test]
    fn test_gap_is_rejected() {
        let base = BlockRef::new(4, "h4");
        let err = check_chain_continuity(&base, &blocks(&[5, 6, 8])).unwrap_err();

        assert_eq!(
            err,
            InvariantViolation::NonContiguousChain {
                previous: BlockRef::new(6, "h6"),
                expected: 7,
                actual: BlockRef::new(8, "h8"),
            }
        );
    }

    #[test]
    fn test_contiguous_extension_passes() {
        let base = BlockRef::new(4, "h4");
        assert!(check_chain_continuity(&base, &blocks(&[5, 6, 7])).is_ok());
        assert!(check_chain_continuity(&base, &[]).is_ok());
    }

    #[test]
    fn test_height_bounds() {
        assert_eq!(check_height("status", -1), Ok(-1));
        assert_eq!(check_height("status", MAX_SAFE_HEIGHT), Ok(MAX_SAFE_HEIGHT));
        assert!(check_height("status", -2).is_err());
        assert!(check_height("status", MAX_SAFE_HEIGHT + 1).is_err());
    }

    #[test]
    fn test_overflowing_base_is_rejected() {
        let base = BlockRef::new(i64::MAX, "x");
        assert!(matches!(
            check_chain_continuity(&base, &blocks(&[0])),
            Err(InvariantViolation::UnsafeHeight { .. })
        ));
        assert!(check_block("base head", &base).is_err());
        assert!(check_block("base head", &BlockRef::new(-1, "0x")).is_ok());
    }

    #[test]
    fn test_state_must_start_above_status() {
        let state = DatabaseState::new(BlockRef::new(10, "a"), blocks(&[12]));
        assert!(matches!(
            check_state(&state),
            Err(InvariantViolation::NonContiguousChain { expected: 11, .. })
        ));
    }

    #[test]
    fn test_race_message_names_heads() {
        let err = InvariantViolation::Race {
            expected: BlockRef::new(5, "x"),
            actual: BlockRef::new(6, "y"),
        };
        let message = err.to_string();
        assert!(message.contains("#5 (x)"));
        assert!(message.contains("#6 (y)"));
        assert!(message.contains("no other processor"));
    }
}
