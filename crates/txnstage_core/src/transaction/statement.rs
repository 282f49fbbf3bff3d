//! Statement commit and rollback.
//!
//! A statement's writes, binlog mutations and dirty-table operations are
//! staged on the [`TxnState`] while it runs. Committing the statement moves
//! them into the transaction, the session binlog and the row cache; rolling
//! it back discards them. Either way the staging area is empty afterwards.

use super::state::{Phase, TxnState};
use crate::dirty::{merge_dirty_op, RowCache};
use crate::error::{CoreError, CoreResult};
use crate::mutation::BinlogPrewrite;
use tracing::{debug, warn};
use txnstage_kv::KvError;

impl TxnState {
    /// Commits the current statement.
    ///
    /// Buffered writes are flushed into the transaction in key order; then
    /// the statement's mutations are merged into `binlog` and its dirty-table
    /// operations applied to `cache`. If a flush fails, nothing is merged,
    /// the remaining writes are dropped and the transaction is poisoned so
    /// that its eventual [`commit`](Self::commit) rolls back instead.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FlushFailure`] for the first write that could not
    /// be flushed, or [`CoreError::InvalidOperation`] if writes are buffered
    /// but no transaction is valid.
    pub fn statement_commit(
        &mut self,
        binlog: &mut BinlogPrewrite,
        cache: &mut dyn RowCache,
    ) -> CoreResult<()> {
        let result = self.flush_statement(binlog, cache);
        self.cleanup();
        result
    }

    /// Discards everything the current statement staged.
    ///
    /// The transaction itself is untouched.
    pub fn statement_rollback(&mut self) {
        if !self.buf.is_empty() {
            debug!(buffered = self.buf.len(), "discarding statement writes");
        }
        self.cleanup();
    }

    fn flush_statement(
        &mut self,
        binlog: &mut BinlogPrewrite,
        cache: &mut dyn RowCache,
    ) -> CoreResult<()> {
        if let Err(err) = self.drain_buffer() {
            warn!(error = %err, "statement flush failed, transaction will roll back");
            if self.do_not_commit.is_none() {
                self.do_not_commit = Some(err.clone());
            }
            return Err(err);
        }

        binlog.merge_ledger(&self.mutations);
        for op in self.dirty_ops.drain(..) {
            merge_dirty_op(cache, op);
        }
        Ok(())
    }

    fn drain_buffer(&mut self) -> CoreResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let txn = match &mut self.phase {
            Phase::Valid(active) if active.txn.is_valid() => active.txn.as_mut(),
            _ => {
                return Err(CoreError::invalid_operation(
                    "statement writes buffered without a valid transaction",
                ))
            }
        };

        let fail_after = self.faults.fail_flush_after;
        for (flushed, (key, value)) in self.buf.entries().enumerate() {
            if fail_after.is_some_and(|limit| flushed >= limit) {
                return Err(CoreError::FlushFailure {
                    key: key.clone(),
                    source: KvError::backend("injected statement flush failure"),
                });
            }

            let result = if value.is_empty() {
                txn.delete(key.clone())
            } else {
                txn.set(key.clone(), value.clone())
            };
            result.map_err(|source| CoreError::FlushFailure {
                key: key.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{FaultInjection, TxnConfig};
    use crate::dirty::{DirtyDb, DirtyTableOp};
    use crate::error::CoreError;
    use crate::mutation::BinlogPrewrite;
    use crate::transaction::TxnState;
    use crate::types::{Datum, Handle, TableId};
    use txnstage_kv::{Bytes, Context, Key, MemoryStorage, Storage};

    struct Fixture {
        mem: MemoryStorage,
        state: TxnState,
        binlog: BinlogPrewrite,
        cache: DirtyDb,
    }

    impl Fixture {
        fn new(config: TxnConfig) -> Self {
            Self::seeded(config, &[])
        }

        fn seeded(config: TxnConfig, data: &[(&'static str, &'static str)]) -> Self {
            let mem = MemoryStorage::new();
            mem.load(data.iter().copied());
            let mut state = TxnState::new(&config);
            state.adopt(mem.begin().unwrap()).unwrap();
            Self {
                mem,
                state,
                binlog: BinlogPrewrite::new(),
                cache: DirtyDb::new(),
            }
        }

        fn stmt_commit(&mut self) -> Result<(), CoreError> {
            self.state
                .statement_commit(&mut self.binlog, &mut self.cache)
        }
    }

    fn v(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn commit_flushes_writes_and_deletes() {
        let mut fx = Fixture::seeded(TxnConfig::default(), &[("gone", "x")]);

        fx.state.set(Key::from("a"), v("1")).unwrap();
        fx.state.delete(Key::from("gone")).unwrap();
        fx.stmt_commit().unwrap();

        assert!(fx.state.buffer().is_empty());
        assert_eq!(fx.state.get(&Key::from("a")).unwrap(), v("1"));
        assert!(fx.state.get(&Key::from("gone")).unwrap_err().is_not_found());

        fx.state.commit(&Context::new(1)).unwrap();
        assert_eq!(fx.mem.latest(&Key::from("a")), Some(v("1")));
        assert_eq!(fx.mem.latest(&Key::from("gone")), None);
    }

    #[test]
    fn commit_merges_ledger_and_dirty_ops() {
        let mut fx = Fixture::new(TxnConfig::default());
        let table = TableId::new(7);

        fx.state.stmt_mutation(table).record_insert(v("r1"));
        fx.state.add_dirty_op(DirtyTableOp::AddRow {
            table,
            handle: Handle::new(1),
            row: vec![Datum::Int(1)],
        });
        fx.stmt_commit().unwrap();

        fx.state.stmt_mutation(table).record_insert(v("r2"));
        fx.stmt_commit().unwrap();

        let merged = fx.binlog.mutation(table).unwrap();
        assert_eq!(merged.inserted_rows, vec![v("r1"), v("r2")]);
        assert!(fx.cache.table(table).unwrap().added_rows.contains_key(&Handle::new(1)));
        assert!(fx.state.ledger().is_empty());
        assert!(fx.state.dirty_ops().is_empty());
    }

    #[test]
    fn commit_twice_merges_once() {
        let mut fx = Fixture::new(TxnConfig::default());
        fx.state.stmt_mutation(TableId::new(1)).record_delete_id(5);
        fx.stmt_commit().unwrap();
        fx.stmt_commit().unwrap();

        let merged = fx.binlog.mutation(TableId::new(1)).unwrap();
        assert_eq!(merged.deleted_ids, vec![5]);
    }

    #[test]
    fn rollback_discards_statement_only() {
        let mut fx = Fixture::new(TxnConfig::default());
        fx.state.set(Key::from("kept"), v("1")).unwrap();
        fx.stmt_commit().unwrap();

        fx.state.set(Key::from("dropped"), v("2")).unwrap();
        fx.state.stmt_mutation(TableId::new(1)).record_insert(v("row"));
        fx.state.add_dirty_op(DirtyTableOp::Truncate {
            table: TableId::new(1),
        });
        fx.state.statement_rollback();

        assert!(fx.state.get(&Key::from("dropped")).unwrap_err().is_not_found());
        assert_eq!(fx.state.get(&Key::from("kept")).unwrap(), v("1"));
        assert!(fx.binlog.is_empty());
        assert!(fx.cache.is_empty());
        assert!(fx.state.is_valid());
    }

    #[test]
    fn flush_failure_poisons_transaction() {
        let config = TxnConfig::new().faults(FaultInjection::none().fail_flush_after(2));
        let mut fx = Fixture::new(config);
        for k in ["a", "b", "c", "d"] {
            fx.state.set(Key::from(k), v("v")).unwrap();
        }
        fx.state.stmt_mutation(TableId::new(1)).record_insert(v("row"));

        let err = fx.stmt_commit().unwrap_err();
        assert!(matches!(err, CoreError::FlushFailure { ref key, .. } if *key == Key::from("c")));
        assert!(fx.state.is_poisoned());
        assert!(fx.state.buffer().is_empty());
        assert!(fx.state.ledger().is_empty());
        assert!(fx.binlog.is_empty());

        assert_eq!(fx.state.commit(&Context::new(1)), Err(err));
        assert_eq!(fx.mem.stats().commits(), 0);
        assert_eq!(fx.mem.latest(&Key::from("a")), None);
    }

    #[test]
    fn flush_without_transaction_is_rejected() {
        let mut state = TxnState::new(&TxnConfig::default());
        let mem = MemoryStorage::new();
        state.adopt(mem.begin().unwrap()).unwrap();
        state.set(Key::from("a"), v("1")).unwrap();
        state.invalidate();

        let mut binlog = BinlogPrewrite::new();
        let mut cache = DirtyDb::new();
        let result = state.statement_commit(&mut binlog, &mut cache);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
        assert!(state.buffer().is_empty());
    }

    #[test]
    fn empty_statement_commit_needs_no_transaction() {
        let mut state = TxnState::new(&TxnConfig::default());
        let mut binlog = BinlogPrewrite::new();
        let mut cache = DirtyDb::new();
        state.statement_commit(&mut binlog, &mut cache).unwrap();
    }
}
