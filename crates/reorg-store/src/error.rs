//! Error types for the reorg store
//!
//! Invariant violations are fatal; everything else is propagated unchanged
//! so the pipeline can decide whether to retry the whole transaction.

use crate::domain::invariants::InvariantViolation;
use thiserror::Error;

/// Failures reported by a column store client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Transport or server failure.
    #[error("column store I/O failed on {table}: {message}")]
    Io { table: String, message: String },

    /// A row could not be decoded into the expected shape.
    #[error("cannot decode row from {table}: {reason}")]
    Decode { table: String, reason: String },

    /// Statement references a table the store does not know.
    #[error("unknown table: {table}")]
    UnknownTable { table: String },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable holds an unusable value.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// Configuration is structurally invalid.
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

/// Errors surfaced by the adapter protocol.
#[derive(Debug, Error)]
pub enum HotStoreError {
    /// Fatal: processing must stop until an operator intervenes.
    #[error("fatal invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Change log payload could not be encoded or decoded.
    #[error("change log codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Failure raised by a caller-supplied block handler.
    #[error("block handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HotStoreError {
    /// Whether the indexing run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HotStoreError::Invariant(_))
    }

    /// Wrap a handler failure, unwrapping adapter errors the handler
    /// propagated with `?` so fatal violations stay fatal.
    pub fn from_handler(err: anyhow::Error) -> Self {
        match err.downcast::<HotStoreError>() {
            Ok(inner) => inner,
            Err(err) => HotStoreError::Handler(err),
        }
    }
}

/// Result type for adapter operations
pub type HotStoreResult<T> = Result<T, HotStoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BlockRef;

    #[test]
    fn test_invariant_is_fatal() {
        let err: HotStoreError = InvariantViolation::Race {
            expected: BlockRef::new(1, "a"),
            actual: BlockRef::new(2, "b"),
        }
        .into();
        assert!(err.is_fatal());

        let err: HotStoreError = StoreError::UnknownTable {
            table: "t".into(),
        }
        .into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_handler_error_keeps_adapter_error() {
        let inner = HotStoreError::from(InvariantViolation::UntrackedTable {
            height: 3,
            table: "t".into(),
        });
        let wrapped = HotStoreError::from_handler(anyhow::Error::new(inner));
        assert!(wrapped.is_fatal());

        let plain = HotStoreError::from_handler(anyhow::anyhow!("decode failed"));
        assert!(matches!(plain, HotStoreError::Handler(_)));
        assert!(!plain.is_fatal());
    }
}
