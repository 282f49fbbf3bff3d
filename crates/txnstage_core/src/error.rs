//! Error types for txnstage core.

use thiserror::Error;
use txnstage_kv::{Key, KvError};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in txnstage core operations.
///
/// Errors are `Clone`: a statement flush failure is both returned to the
/// caller and kept as the transaction's fault marker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The key is absent from both the write buffer and the transaction.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: Key,
    },

    /// A pending transaction was resolved while no future was attached.
    #[error("transaction future is not set")]
    FutureNotSet,

    /// The time oracle could not provide a start timestamp.
    #[error("timestamp unavailable: {message}")]
    TimestampUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// Buffered statement state survived to transaction commit.
    #[error("internal inconsistency: {state}")]
    InternalInconsistency {
        /// Diagnostic rendering of the offending state.
        state: String,
    },

    /// The underlying store failed.
    #[error("store error during {op}: {source}")]
    Store {
        /// The delegated operation that failed.
        op: &'static str,
        /// The store's error.
        source: KvError,
    },

    /// Flushing a statement's buffered write into the transaction failed.
    #[error("statement flush failed at key {key}: {source}")]
    FlushFailure {
        /// The key whose flush failed.
        key: Key,
        /// The store's error.
        source: KvError,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(key: impl Into<Key>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a timestamp-unavailable error.
    pub fn timestamp_unavailable(message: impl Into<String>) -> Self {
        Self::TimestampUnavailable {
            message: message.into(),
        }
    }

    /// Creates an internal inconsistency error.
    pub fn internal_inconsistency(state: impl Into<String>) -> Self {
        Self::InternalInconsistency {
            state: state.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns a closure wrapping a store error with the failing operation.
    pub fn store(op: &'static str) -> impl FnOnce(KvError) -> Self {
        move |source| Self::Store { op, source }
    }

    /// Returns true if this error means the key is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
