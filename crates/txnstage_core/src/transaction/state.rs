//! Per-session transaction state.

use super::future::TxnFuture;
use crate::config::{FaultInjection, TxnConfig};
use crate::dirty::DirtyTableOp;
use crate::error::{CoreError, CoreResult};
use crate::mutation::{MutationLedger, TableMutation};
use crate::types::TableId;
use std::backtrace::Backtrace;
use std::fmt::{self, Write as _};
use tracing::{debug, error};
use txnstage_kv::{
    Assumption, Bytes, Context, Key, KvTransaction, MemBuffer, Timestamp, UnionIter,
};

/// Lifecycle phase of a [`TxnState`].
pub(super) enum Phase {
    /// No transaction.
    Invalid,
    /// A start timestamp has been requested but no transaction exists yet.
    Pending(TxnFuture),
    /// A transaction has been adopted.
    Valid(ActiveTxn),
}

/// An adopted transaction and the capabilities probed when it was adopted.
pub(super) struct ActiveTxn {
    pub(super) txn: Box<dyn KvTransaction>,
    supports_assumptions: bool,
}

impl ActiveTxn {
    fn new(mut txn: Box<dyn KvTransaction>) -> Self {
        let supports_assumptions = txn.as_safe_store().is_some();
        Self {
            txn,
            supports_assumptions,
        }
    }
}

/// The transaction of one session plus the current statement's staged work.
///
/// The state is in exactly one phase at a time:
///
/// - **invalid** - no transaction; reads fail, writes fail
/// - **pending** - a [`TxnFuture`] is outstanding; writes are buffered
/// - **valid** - a transaction is adopted; reads fall through to it
///
/// Writes made by a statement land in a write buffer and only reach the
/// transaction when the statement commits (see
/// [`statement_commit`](Self::statement_commit)). The same holds for the
/// statement's binlog mutations and dirty-table operations.
///
/// `commit` and `rollback` always leave the state invalid, whatever the
/// outcome.
pub struct TxnState {
    pub(super) phase: Phase,
    pub(super) buf: MemBuffer,
    pub(super) mutations: MutationLedger,
    pub(super) dirty_ops: Vec<DirtyTableOp>,
    /// First statement flush failure; the transaction must not commit.
    pub(super) do_not_commit: Option<CoreError>,
    pub(super) faults: FaultInjection,
}

impl TxnState {
    /// Creates an invalid state with an empty write buffer.
    #[must_use]
    pub fn new(config: &TxnConfig) -> Self {
        Self {
            phase: Phase::Invalid,
            buf: MemBuffer::with_capacity(config.membuf_capacity)
                .entry_size_limit(config.entry_size_limit),
            mutations: MutationLedger::new(),
            dirty_ops: Vec::new(),
            do_not_commit: None,
            faults: config.faults.clone(),
        }
    }

    /// Returns true if a transaction is adopted and still usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(&self.phase, Phase::Valid(active) if active.txn.is_valid())
    }

    /// Returns true if a future is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Pending(_))
    }

    /// Returns true if the state is pending or valid.
    #[must_use]
    pub fn is_pending_or_valid(&self) -> bool {
        self.is_pending() || self.is_valid()
    }

    /// Returns the adopted transaction's start timestamp.
    #[must_use]
    pub fn start_ts(&self) -> Option<Timestamp> {
        match &self.phase {
            Phase::Valid(active) => Some(active.txn.start_ts()),
            _ => None,
        }
    }

    /// Returns true if a statement flush failed in this transaction.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.do_not_commit.is_some()
    }

    /// Returns the statement write buffer.
    #[must_use]
    pub fn buffer(&self) -> &MemBuffer {
        &self.buf
    }

    /// Returns the statement mutation ledger.
    #[must_use]
    pub fn ledger(&self) -> &MutationLedger {
        &self.mutations
    }

    /// Returns the statement's staged dirty-table operations.
    #[must_use]
    pub fn dirty_ops(&self) -> &[DirtyTableOp] {
        &self.dirty_ops
    }

    /// Returns true if the current statement has buffered writes, ledger
    /// entries or dirty-table operations.
    #[must_use]
    pub fn has_statement_work(&self) -> bool {
        !self.buf.is_empty() || !self.mutations.is_empty() || !self.dirty_ops.is_empty()
    }

    /// Attaches a future, moving the state to pending.
    ///
    /// Any previously adopted transaction is dropped without being closed,
    /// so callers only do this from the invalid phase. A fault recorded for
    /// an earlier transaction is cleared.
    pub fn make_pending(&mut self, future: TxnFuture) {
        debug_assert!(
            !self.is_valid(),
            "make_pending would drop a live transaction"
        );
        self.do_not_commit = None;
        self.phase = Phase::Pending(future);
    }

    /// Adopts an already started transaction, moving the state to valid.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a future is outstanding or a
    /// transaction is already adopted.
    pub fn adopt(&mut self, txn: Box<dyn KvTransaction>) -> CoreResult<()> {
        if self.is_pending_or_valid() {
            return Err(CoreError::invalid_operation(
                "cannot adopt a transaction while one is pending or valid",
            ));
        }
        debug!(start_ts = %txn.start_ts(), "adopting transaction");
        self.do_not_commit = None;
        self.phase = Phase::Valid(ActiveTxn::new(txn));
        Ok(())
    }

    /// Waits for the outstanding future and adopts the transaction it yields.
    ///
    /// On failure the state is left invalid.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FutureNotSet`] if the state is not pending, or the
    /// future's error.
    pub async fn resolve_pending(&mut self, txn_capacity: usize) -> CoreResult<()> {
        let future = match std::mem::replace(&mut self.phase, Phase::Invalid) {
            Phase::Pending(future) => future,
            other => {
                self.phase = other;
                return Err(CoreError::FutureNotSet);
            }
        };

        let mut txn = future.resolve().await?;
        txn.set_capacity(txn_capacity);
        debug!(start_ts = %txn.start_ts(), "pending transaction is now valid");
        self.phase = Phase::Valid(ActiveTxn::new(txn));
        Ok(())
    }

    /// Drops any future or transaction and moves the state to invalid.
    ///
    /// An adopted transaction is not rolled back.
    pub fn invalidate(&mut self) {
        self.phase = Phase::Invalid;
    }

    /// Ends a transaction that never became valid.
    ///
    /// An outstanding future is dropped along with any staged statement
    /// work. A statement flush that failed in the meantime is returned, so
    /// the transaction is never reported as committed. The state is invalid
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns the recorded flush failure, if any.
    pub fn abandon(&mut self) -> CoreResult<()> {
        let fault = self.do_not_commit.take();
        if !self.buf.is_empty() {
            debug!(buffered = self.buf.len(), "abandoning unflushed writes");
        }
        self.reset();
        fault.map_or(Ok(()), Err)
    }

    fn txn(&self) -> CoreResult<&dyn KvTransaction> {
        match &self.phase {
            Phase::Valid(active) => Ok(active.txn.as_ref()),
            Phase::Pending(_) => Err(CoreError::invalid_operation(
                "transaction is still pending",
            )),
            Phase::Invalid => Err(CoreError::invalid_operation("no valid transaction")),
        }
    }

    fn ensure_pending_or_valid(&self) -> CoreResult<()> {
        if self.is_pending_or_valid() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(
                "write outside of a transaction",
            ))
        }
    }

    /// Reads a key, preferring the statement's own buffered write.
    ///
    /// A buffered deletion shadows any value in the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the key is absent or deleted, and
    /// [`CoreError::InvalidOperation`] if the read has to reach a transaction
    /// that is not valid.
    pub fn get(&self, key: &Key) -> CoreResult<Bytes> {
        let value = match self.buf.get(key) {
            Some(value) => value.clone(),
            None => match self.txn()?.get(key) {
                Ok(value) => value,
                Err(err) if err.is_not_found() => return Err(CoreError::not_found(key.clone())),
                Err(err) => return Err(CoreError::store("get")(err)),
            },
        };

        if value.is_empty() {
            return Err(CoreError::not_found(key.clone()));
        }
        Ok(value)
    }

    /// Buffers a write for the current statement.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] in the invalid phase, or the
    /// buffer's rejection of the entry.
    pub fn set(&mut self, key: Key, value: Bytes) -> CoreResult<()> {
        self.ensure_pending_or_valid()?;
        self.buf.set(key, value).map_err(CoreError::store("set"))
    }

    /// Buffers a deletion for the current statement.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] in the invalid phase, or the
    /// buffer's rejection of the entry.
    pub fn delete(&mut self, key: Key) -> CoreResult<()> {
        self.ensure_pending_or_valid()?;
        self.buf.delete(key).map_err(CoreError::store("delete"))
    }

    /// Iterates `[lower, upper)` ascending over the buffer merged onto the
    /// transaction. Buffered entries win and deletions are hidden.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the state is not valid, or
    /// an error if either side cannot be iterated.
    pub fn iter(
        &self,
        lower: &Key,
        upper: Option<&Key>,
    ) -> CoreResult<impl Iterator<Item = CoreResult<(Key, Bytes)>> + '_> {
        let txn = self.txn()?;
        let dirty = self.buf.iter(lower, upper).map_err(CoreError::store("iter"))?;
        let snapshot = txn.iter(lower, upper).map_err(CoreError::store("iter"))?;
        Ok(UnionIter::new(dirty, snapshot, false).map(|item| item.map_err(CoreError::store("iter"))))
    }

    /// Iterates keys below `upper` descending, with the same merge rules as
    /// [`iter`](Self::iter).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the state is not valid, or
    /// an error if either side cannot be iterated.
    pub fn iter_reverse(
        &self,
        upper: Option<&Key>,
    ) -> CoreResult<impl Iterator<Item = CoreResult<(Key, Bytes)>> + '_> {
        let txn = self.txn()?;
        let dirty = self
            .buf
            .iter_reverse(upper)
            .map_err(CoreError::store("iter_reverse"))?;
        let snapshot = txn
            .iter_reverse(upper)
            .map_err(CoreError::store("iter_reverse"))?;
        Ok(UnionIter::new(dirty, snapshot, true)
            .map(|item| item.map_err(CoreError::store("iter_reverse"))))
    }

    /// Forwards a key assumption to the transaction if it supports them.
    ///
    /// Silently ignored otherwise.
    pub fn set_key_assumption(&mut self, key: Key, assumption: Assumption) {
        if let Phase::Valid(active) = &mut self.phase {
            if !active.supports_assumptions {
                return;
            }
            if let Some(store) = active.txn.as_safe_store() {
                store.set_assumption(key, assumption);
            }
        }
    }

    /// Returns the current statement's mutation for a table, creating it on
    /// first use.
    pub fn stmt_mutation(&mut self, table_id: TableId) -> &mut TableMutation {
        self.mutations.get_or_create_mutation(table_id)
    }

    /// Stages a dirty-table operation for the current statement.
    pub fn add_dirty_op(&mut self, op: DirtyTableOp) {
        self.dirty_ops.push(op);
    }

    /// Commits the transaction.
    ///
    /// A transaction poisoned by a failed statement flush is rolled back
    /// instead and the flush error is returned. The state is invalid
    /// afterwards in every case.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InternalInconsistency`] if statement work is
    /// still staged, the recorded flush failure, or the commit error.
    ///
    /// # Panics
    ///
    /// In debug builds, panics on staged statement work.
    pub fn commit(&mut self, ctx: &Context) -> CoreResult<()> {
        let result = self.commit_inner(ctx);
        self.reset();
        result
    }

    fn commit_inner(&mut self, ctx: &Context) -> CoreResult<()> {
        if self.has_statement_work() {
            let state = self.diagnostic();
            error!(
                state = %state,
                backtrace = %Backtrace::force_capture(),
                "statement work left staged at transaction commit"
            );
            self.rollback_quietly();
            if cfg!(debug_assertions) {
                panic!("statement work left staged at transaction commit: {state}");
            }
            return Err(CoreError::internal_inconsistency(state));
        }

        if let Some(fault) = self.do_not_commit.take() {
            debug!(error = %fault, "rolling back transaction poisoned by a statement flush");
            self.rollback_quietly();
            return Err(fault);
        }

        match &mut self.phase {
            Phase::Valid(active) => active.txn.commit(ctx).map_err(CoreError::store("commit")),
            Phase::Pending(_) => Err(CoreError::invalid_operation(
                "cannot commit a pending transaction",
            )),
            Phase::Invalid => Err(CoreError::invalid_operation(
                "commit without a transaction",
            )),
        }
    }

    fn rollback_quietly(&mut self) {
        if let Phase::Valid(active) = &mut self.phase {
            if let Err(err) = active.txn.rollback() {
                error!(error = %err, "rollback failed");
            }
        }
    }

    /// Rolls back the transaction, discarding all staged work.
    ///
    /// An outstanding future is simply dropped. The state is invalid
    /// afterwards in every case.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] in the invalid phase, or the
    /// underlying rollback error.
    pub fn rollback(&mut self) -> CoreResult<()> {
        let result = match &mut self.phase {
            Phase::Valid(active) => active.txn.rollback().map_err(CoreError::store("rollback")),
            Phase::Pending(_) => Ok(()),
            Phase::Invalid => Err(CoreError::invalid_operation(
                "rollback without a transaction",
            )),
        };
        self.reset();
        result
    }

    pub(super) fn cleanup(&mut self) {
        self.buf.reset();
        self.mutations.clear();
        self.dirty_ops.clear();
    }

    pub(crate) fn reset(&mut self) {
        self.phase = Phase::Invalid;
        self.do_not_commit = None;
        self.cleanup();
    }

    /// Renders the state for logs and error messages.
    ///
    /// Looks like `Txn{state=valid, startTS=5, len(mutations)=1}`; counts of
    /// empty collections are omitted.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let mut out = String::from("Txn{");
        if self.is_pending() {
            out.push_str("state=pending");
        } else if let (true, Some(start_ts)) = (self.is_valid(), self.start_ts()) {
            let _ = write!(out, "state=valid, startTS={}", start_ts.as_u64());
            if !self.dirty_ops.is_empty() {
                let _ = write!(out, ", len(dirtyTable)={}", self.dirty_ops.len());
            }
            if !self.mutations.is_empty() {
                let _ = write!(out, ", len(mutations)={}", self.mutations.len());
            }
            if !self.buf.is_empty() {
                let _ = write!(out, ", len(buffer)={}", self.buf.len());
            }
        } else {
            out.push_str("state=invalid");
        }
        out.push('}');
        out
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            Phase::Valid(active) => write!(
                f,
                "txn {} ({})",
                active.txn.start_ts(),
                if active.txn.is_valid() { "open" } else { "closed" }
            ),
            Phase::Pending(_) => f.write_str("txn future"),
            Phase::Invalid => f.write_str("invalid transaction"),
        }
    }
}

impl fmt::Debug for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnState")
            .field("state", &self.diagnostic())
            .field("buffered", &self.buf.len())
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use txnstage_kv::{MemoryStorage, Storage};

    fn setup() -> (MemoryStorage, Arc<dyn Storage>, TxnState) {
        let mem = MemoryStorage::new();
        let store: Arc<dyn Storage> = Arc::new(mem.clone());
        (mem, store, TxnState::new(&TxnConfig::default()))
    }

    fn pending(store: &Arc<dyn Storage>, state: &mut TxnState) {
        let future = TxnFuture::acquire(store, &Context::new(1), &FaultInjection::none());
        state.make_pending(future);
    }

    #[test]
    fn new_state_is_invalid() {
        let (_, _, state) = setup();
        assert!(!state.is_valid());
        assert!(!state.is_pending());
        assert_eq!(state.to_string(), "invalid transaction");
        assert_eq!(state.diagnostic(), "Txn{state=invalid}");
    }

    #[tokio::test]
    async fn pending_then_valid() {
        let (_, store, mut state) = setup();
        pending(&store, &mut state);
        assert!(state.is_pending());
        assert!(!state.is_valid());
        assert_eq!(state.to_string(), "txn future");

        state.resolve_pending(1024).await.unwrap();
        assert!(state.is_valid());
        assert!(!state.is_pending());
        assert!(state.start_ts().is_some());
    }

    #[tokio::test]
    async fn resolve_without_future_fails() {
        let (_, _, mut state) = setup();
        let result = state.resolve_pending(1024).await;
        assert_eq!(result, Err(CoreError::FutureNotSet));
        assert!(!state.is_pending_or_valid());
    }

    #[tokio::test]
    async fn failed_resolution_leaves_state_invalid() {
        let (_, store, mut state) = setup();
        let faults = FaultInjection::none().fail_timestamp(true);
        state.make_pending(TxnFuture::acquire(&store, &Context::new(1), &faults));

        let result = state.resolve_pending(1024).await;
        assert!(matches!(result, Err(CoreError::TimestampUnavailable { .. })));
        assert!(!state.is_pending_or_valid());
    }

    #[test]
    fn adopt_rejects_second_transaction() {
        let (mem, _, mut state) = setup();
        state.adopt(mem.begin().unwrap()).unwrap();
        assert!(state.is_valid());

        let result = state.adopt(mem.begin().unwrap());
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn writes_require_a_transaction() {
        let (_, _, mut state) = setup();
        let result = state.set(Key::from("a"), Bytes::from_static(b"1"));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
        assert!(state.buffer().is_empty());
    }

    #[test]
    fn pending_state_buffers_writes_but_cannot_read_through() {
        let (_, store, mut state) = setup();
        pending(&store, &mut state);

        state.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        assert_eq!(state.get(&Key::from("a")).unwrap().as_ref(), b"1");

        let result = state.get(&Key::from("b"));
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn buffer_shadows_transaction() {
        let (mem, _, mut state) = setup();
        mem.load([("a", "old"), ("b", "kept")]);
        state.adopt(mem.begin().unwrap()).unwrap();

        state.set(Key::from("a"), Bytes::from_static(b"new")).unwrap();
        state.delete(Key::from("b")).unwrap();

        assert_eq!(state.get(&Key::from("a")).unwrap().as_ref(), b"new");
        assert!(state.get(&Key::from("b")).unwrap_err().is_not_found());
        assert!(state.get(&Key::from("c")).unwrap_err().is_not_found());
    }

    #[test]
    fn iteration_merges_buffer_and_hides_tombstones() {
        let (mem, _, mut state) = setup();
        mem.load([("a", "1"), ("b", "2"), ("d", "4")]);
        state.adopt(mem.begin().unwrap()).unwrap();

        state.set(Key::from("c"), Bytes::from_static(b"3")).unwrap();
        state.set(Key::from("a"), Bytes::from_static(b"one")).unwrap();
        state.delete(Key::from("b")).unwrap();

        let forward: Vec<_> = state
            .iter(&Key::from("a"), None)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            forward,
            vec![
                (Key::from("a"), Bytes::from_static(b"one")),
                (Key::from("c"), Bytes::from_static(b"3")),
                (Key::from("d"), Bytes::from_static(b"4")),
            ]
        );

        let backward: Vec<_> = state
            .iter_reverse(Some(&Key::from("d")))
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(backward, vec![Key::from("c"), Key::from("a")]);
    }

    #[test]
    fn rollback_resets_everything() {
        let (mem, _, mut state) = setup();
        state.adopt(mem.begin().unwrap()).unwrap();
        state.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        state.stmt_mutation(TableId::new(1)).record_delete_id(3);

        state.rollback().unwrap();
        assert!(!state.is_pending_or_valid());
        assert!(state.buffer().is_empty());
        assert!(state.ledger().is_empty());
        assert_eq!(mem.stats().rollbacks(), 1);
    }

    #[test]
    fn rollback_of_pending_drops_future() {
        let (mem, store, mut state) = setup();
        pending(&store, &mut state);
        state.rollback().unwrap();
        assert!(!state.is_pending_or_valid());
        assert_eq!(mem.stats().begins(), 0);
    }

    #[test]
    fn rollback_without_transaction_fails() {
        let (_, _, mut state) = setup();
        assert!(matches!(
            state.rollback(),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn commit_with_clean_buffers_commits() {
        let (mem, _, mut state) = setup();
        state.adopt(mem.begin().unwrap()).unwrap();
        state.commit(&Context::new(1)).unwrap();
        assert!(!state.is_pending_or_valid());
        assert_eq!(mem.stats().commits(), 1);
    }

    #[test]
    fn poisoned_commit_rolls_back() {
        let (mem, _, mut state) = setup();
        state.adopt(mem.begin().unwrap()).unwrap();
        let fault = CoreError::FlushFailure {
            key: Key::from("k"),
            source: txnstage_kv::KvError::backend("io"),
        };
        state.do_not_commit = Some(fault.clone());

        assert_eq!(state.commit(&Context::new(1)), Err(fault));
        assert!(!state.is_pending_or_valid());
        assert!(!state.is_poisoned());
        assert_eq!(mem.stats().commits(), 0);
        assert_eq!(mem.stats().rollbacks(), 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "statement work left staged")]
    fn commit_with_staged_work_panics_in_debug() {
        let (mem, _, mut state) = setup();
        state.adopt(mem.begin().unwrap()).unwrap();
        state.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        let _ = state.commit(&Context::new(1));
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn commit_with_staged_work_is_inconsistency() {
        let (mem, _, mut state) = setup();
        state.adopt(mem.begin().unwrap()).unwrap();
        state.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();

        let err = state.commit(&Context::new(1)).unwrap_err();
        assert!(matches!(err, CoreError::InternalInconsistency { ref state } if state.contains("len(buffer)=1")));
        assert!(!state.is_pending_or_valid());
        assert_eq!(mem.stats().commits(), 0);
    }

    #[test]
    fn statement_buffer_takes_configured_capacity() {
        let mem = MemoryStorage::new();
        let mut state = TxnState::new(&TxnConfig::new().membuf_capacity(8));
        state.adopt(mem.begin().unwrap()).unwrap();

        state.set(Key::from("key"), Bytes::from_static(b"value-1")).unwrap();
        assert_eq!(state.buffer().capacity(), 8);
        assert!(state.buffer().exceeds_capacity());
        state.statement_rollback();
        assert!(!state.buffer().exceeds_capacity());
    }

    #[test]
    fn abandon_surfaces_fault_of_pending_transaction() {
        let (mem, store, mut state) = setup();
        pending(&store, &mut state);
        let fault = CoreError::FlushFailure {
            key: Key::from("k"),
            source: txnstage_kv::KvError::backend("io"),
        };
        state.do_not_commit = Some(fault.clone());

        assert_eq!(state.abandon(), Err(fault));
        assert!(!state.is_pending_or_valid());
        assert!(!state.is_poisoned());
        assert_eq!(state.abandon(), Ok(()));
        assert_eq!(mem.stats().begins(), 0);
    }

    #[test]
    fn new_transaction_clears_stale_fault() {
        let (mem, store, mut state) = setup();
        state.do_not_commit = Some(CoreError::invalid_operation("stale"));
        pending(&store, &mut state);
        assert!(!state.is_poisoned());

        state.invalidate();
        state.do_not_commit = Some(CoreError::invalid_operation("stale"));
        state.adopt(mem.begin().unwrap()).unwrap();
        assert!(!state.is_poisoned());
        state.commit(&Context::new(1)).unwrap();
        assert_eq!(mem.stats().commits(), 1);
    }

    #[tokio::test]
    async fn failed_resolution_keeps_no_transaction() {
        let (_, store, mut state) = setup();
        let faults = FaultInjection::none().fail_timestamp(true);
        state.make_pending(TxnFuture::acquire(&store, &Context::new(1), &faults));
        state.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();

        assert!(state.resolve_pending(1024).await.is_err());
        assert!(state.start_ts().is_none());
        assert!(matches!(
            state.get(&Key::from("b")),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(state.abandon(), Ok(()));
        assert!(state.buffer().is_empty());
    }

    #[test]
    fn diagnostic_lists_nonempty_collections() {
        let (mem, _, mut state) = setup();
        let txn = mem.begin().unwrap();
        let start_ts = txn.start_ts().as_u64();
        state.adopt(txn).unwrap();
        state.stmt_mutation(TableId::new(1)).record_delete_id(1);
        state.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();

        assert_eq!(
            state.diagnostic(),
            format!("Txn{{state=valid, startTS={start_ts}, len(mutations)=1, len(buffer)=1}}")
        );
    }

    #[test]
    fn assumptions_reach_safe_store() {
        let (mem, _, mut state) = setup();
        mem.load([("taken", "x")]);
        state.adopt(mem.begin().unwrap()).unwrap();

        state.set_key_assumption(Key::from("taken"), Assumption::PresumeNotExists);
        let err = state.commit(&Context::new(1)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Store {
                op: "commit",
                source: txnstage_kv::KvError::AssumptionViolated { .. }
            }
        ));
    }
}
