//! Error types for key-value operations.

use crate::key::Key;
use crate::oracle::Timestamp;
use crate::transaction::Assumption;
use thiserror::Error;

/// Result type for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur during key-value operations.
///
/// Errors are `Clone` so a failure can be recorded by a caller and still be
/// handed back up the stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    /// The key does not exist.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: Key,
    },

    /// An empty value was written. Empty values are reserved for deletions.
    #[error("cannot set empty value for key {key}")]
    EmptyValue {
        /// The key being written.
        key: Key,
    },

    /// A single entry exceeds the configured size limit.
    #[error("entry too large: {size} bytes, limit {limit}")]
    EntryTooLarge {
        /// Size of key plus value in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The iteration range is inverted.
    #[error("invalid range: lower bound {lower} is past upper bound {upper}")]
    InvalidRange {
        /// Lower bound (inclusive).
        lower: Key,
        /// Upper bound (exclusive).
        upper: Key,
    },

    /// The transaction has already been committed or rolled back.
    #[error("transaction {start_ts} is no longer valid")]
    TxnClosed {
        /// Start timestamp of the closed transaction.
        start_ts: Timestamp,
    },

    /// Another transaction committed a write to the same key.
    #[error("write conflict on key {key}: start {start_ts}, conflicting commit {conflict_ts}")]
    WriteConflict {
        /// The conflicting key.
        key: Key,
        /// Start timestamp of the losing transaction.
        start_ts: Timestamp,
        /// Commit timestamp of the winning write.
        conflict_ts: Timestamp,
    },

    /// A recorded assumption about a key did not hold at commit.
    #[error("assumption {assumption:?} violated for key {key}")]
    AssumptionViolated {
        /// The key the assumption was made about.
        key: Key,
        /// The violated assumption.
        assumption: Assumption,
    },

    /// The time oracle could not hand out a timestamp.
    #[error("timestamp unavailable: {0}")]
    TimestampUnavailable(String),

    /// Opaque failure reported by a store implementation.
    #[error("backend error: {0}")]
    Backend(String),
}

impl KvError {
    /// Creates a not-found error.
    pub fn not_found(key: impl Into<Key>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates a timestamp-unavailable error.
    pub fn timestamp_unavailable(message: impl Into<String>) -> Self {
        Self::TimestampUnavailable(message.into())
    }

    /// Returns true if this error means the key is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected() {
        assert!(KvError::not_found("a").is_not_found());
        assert!(!KvError::backend("disk on fire").is_not_found());
    }

    #[test]
    fn error_display() {
        let err = KvError::EntryTooLarge {
            size: 10,
            limit: 4,
        };
        assert_eq!(err.to_string(), "entry too large: 10 bytes, limit 4");

        let err = KvError::not_found("k1");
        assert_eq!(err.to_string(), "key not found: k1");
    }
}
