//! Transaction and storage capability contracts.

use crate::error::KvResult;
use crate::key::Key;
use crate::oracle::{Oracle, Timestamp};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Boxed iterator over `(key, value)` pairs in key order.
pub type KvIter<'a> = Box<dyn Iterator<Item = KvResult<(Key, Bytes)>> + 'a>;

/// Per-request context passed through to the store.
///
/// Carries the identity of the calling session so store implementations can
/// attribute their logging.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Identifier of the calling session.
    pub session_id: u64,
}

impl Context {
    /// Creates a context for a session.
    #[must_use]
    pub const fn new(session_id: u64) -> Self {
        Self { session_id }
    }
}

/// An optimistic hint about a key's state, checked by the store at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assumption {
    /// The key is expected to be absent.
    PresumeNotExists,
    /// The key is expected to be present.
    PresumeExists,
}

/// Optional capability: a transaction that accepts key assumptions.
pub trait SafeStore {
    /// Records an assumption about `key`.
    fn set_assumption(&mut self, key: Key, assumption: Assumption);
}

/// A started transaction of the underlying store.
///
/// # Invariants
///
/// - Reads observe the snapshot at [`start_ts`](Self::start_ts) plus the
///   transaction's own writes
/// - An empty value is never stored; deletions are explicit
/// - After `commit` or `rollback` returns (successfully or not),
///   [`is_valid`](Self::is_valid) reports `false`
pub trait KvTransaction: Send + fmt::Debug {
    /// Reads a key.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::NotFound`](crate::KvError::NotFound) if the key is
    /// absent, or a store error.
    fn get(&self, key: &Key) -> KvResult<Bytes>;

    /// Writes a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or the write is rejected.
    fn set(&mut self, key: Key, value: Bytes) -> KvResult<()>;

    /// Deletes a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed.
    fn delete(&mut self, key: Key) -> KvResult<()>;

    /// Iterates keys in `[lower, upper)` in ascending order. `None` means unbounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator cannot be constructed.
    fn iter(&self, lower: &Key, upper: Option<&Key>) -> KvResult<KvIter<'_>>;

    /// Iterates keys below `upper` in descending order. `None` means unbounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator cannot be constructed.
    fn iter_reverse(&self, upper: Option<&Key>) -> KvResult<KvIter<'_>>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails. The transaction is closed either way.
    fn commit(&mut self, ctx: &Context) -> KvResult<()>;

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails. The transaction is closed either way.
    fn rollback(&mut self) -> KvResult<()>;

    /// Returns the start timestamp.
    fn start_ts(&self) -> Timestamp;

    /// Returns true while the transaction can still be used.
    fn is_valid(&self) -> bool;

    /// Hints how many bytes of writes the transaction should expect.
    fn set_capacity(&mut self, capacity: usize);

    /// Returns the assumption capability if the transaction supports it.
    fn as_safe_store(&mut self) -> Option<&mut dyn SafeStore> {
        None
    }
}

/// A transactional store.
pub trait Storage: Send + Sync {
    /// Begins a transaction with a freshly allocated start timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin(&self) -> KvResult<Box<dyn KvTransaction>>;

    /// Begins a transaction bound to `start_ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin_with_start_ts(&self, start_ts: Timestamp) -> KvResult<Box<dyn KvTransaction>>;

    /// Returns the store's time oracle.
    fn oracle(&self) -> Arc<dyn Oracle>;
}
