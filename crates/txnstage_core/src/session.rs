//! Session-level transaction driver.
//!
//! A [`Session`] owns the [`TxnState`] of one client connection together
//! with the transaction-wide collaborators statements commit into: the
//! binlog payload and the dirty-row cache.
//!
//! ```rust
//! use std::sync::Arc;
//! use txnstage_core::{Session, TxnConfig};
//! use txnstage_kv::{Bytes, Key, MemoryStorage};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = MemoryStorage::new();
//! let mut session = Session::new(1, Arc::new(store.clone()), TxnConfig::default());
//!
//! session
//!     .run_statement(|txn| txn.set(Key::from("x"), Bytes::from_static(b"1")))
//!     .await
//!     .unwrap();
//! session.commit_txn().unwrap();
//!
//! assert_eq!(store.latest(&Key::from("x")), Some(Bytes::from_static(b"1")));
//! # });
//! ```

use crate::config::TxnConfig;
use crate::dirty::{DirtyDb, DirtyTableOp};
use crate::error::{CoreError, CoreResult};
use crate::mutation::{BinlogPrewrite, TableMutation};
use crate::transaction::{TxnFuture, TxnState};
use crate::types::TableId;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};
use txnstage_kv::{Context, Storage};

/// One client session and its transaction.
pub struct Session {
    id: u64,
    store: Arc<dyn Storage>,
    config: TxnConfig,
    txn: TxnState,
    binlog: BinlogPrewrite,
    dirty_db: DirtyDb,
}

impl Session {
    /// Creates a session with no transaction.
    #[must_use]
    pub fn new(id: u64, store: Arc<dyn Storage>, config: TxnConfig) -> Self {
        let txn = TxnState::new(&config);
        Self {
            id,
            store,
            config,
            txn,
            binlog: BinlogPrewrite::new(),
            dirty_db: DirtyDb::new(),
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the context passed to the store on behalf of this session.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::new(self.id)
    }

    /// Returns the session's configuration.
    #[must_use]
    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn txn(&self) -> &TxnState {
        &self.txn
    }

    /// Returns the transaction state mutably.
    pub fn txn_mut(&mut self) -> &mut TxnState {
        &mut self.txn
    }

    /// Returns the binlog payload of the current (or last committed)
    /// transaction.
    #[must_use]
    pub fn binlog(&self) -> &BinlogPrewrite {
        &self.binlog
    }

    /// Returns the dirty-row cache of the current (or last committed)
    /// transaction.
    #[must_use]
    pub fn dirty_db(&self) -> &DirtyDb {
        &self.dirty_db
    }

    /// Requests a start timestamp so a transaction can begin lazily.
    ///
    /// Does nothing if a transaction is already pending or valid. Otherwise
    /// the binlog payload and dirty-row cache of the previous transaction
    /// are discarded.
    pub fn prepare_txn(&mut self) {
        if self.txn.is_pending_or_valid() {
            return;
        }
        self.binlog.clear();
        self.dirty_db.clear();
        let future = TxnFuture::acquire(&self.store, &self.context(), &self.config.faults);
        self.txn.make_pending(future);
    }

    /// Makes sure a valid transaction exists, preparing and resolving one
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns the resolution error; the transaction is then invalid.
    pub async fn activate(&mut self) -> CoreResult<&mut TxnState> {
        if !self.txn.is_pending_or_valid() {
            self.prepare_txn();
        }
        if self.txn.is_pending() {
            self.txn
                .resolve_pending(self.config.txn_capacity)
                .instrument(info_span!("activate", session = self.id))
                .await?;
        }
        Ok(&mut self.txn)
    }

    /// Runs one statement against the session's transaction.
    ///
    /// The transaction is activated first. If `f` succeeds the statement is
    /// committed; if it fails the statement is rolled back and `f`'s error
    /// is returned. The transaction stays open either way.
    ///
    /// # Errors
    ///
    /// Returns an activation error, `f`'s error, or the statement commit
    /// error.
    pub async fn run_statement<F, T>(&mut self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut TxnState) -> CoreResult<T>,
    {
        let txn = self.activate().await?;
        match f(txn) {
            Ok(value) => {
                self.stmt_commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!(session = self.id, error = %err, "statement failed");
                self.stmt_rollback();
                Err(err)
            }
        }
    }

    /// Commits the current statement into the transaction.
    ///
    /// # Errors
    ///
    /// Returns the flush failure; the transaction will then roll back on
    /// commit.
    pub fn stmt_commit(&mut self) -> CoreResult<()> {
        self.txn
            .statement_commit(&mut self.binlog, &mut self.dirty_db)
    }

    /// Discards the current statement's staged work.
    pub fn stmt_rollback(&mut self) {
        self.txn.statement_rollback();
    }

    /// Returns the current statement's binlog mutation for a table.
    pub fn stmt_get_mutation(&mut self, table_id: TableId) -> &mut TableMutation {
        self.txn.stmt_mutation(table_id)
    }

    /// Stages a dirty-table operation for the current statement.
    pub fn stmt_add_dirty_table_op(&mut self, op: DirtyTableOp) {
        self.txn.add_dirty_op(op);
    }

    /// Commits the session's transaction.
    ///
    /// A transaction that was never activated has nothing to commit and is
    /// dropped, unless a statement flush failed while it was pending.
    ///
    /// # Errors
    ///
    /// Returns the commit error (see [`TxnState::commit`]), or the flush
    /// failure recorded against a transaction that never became valid.
    pub fn commit_txn(&mut self) -> CoreResult<()> {
        if !self.txn.is_valid() {
            if self.txn.is_pending() {
                debug!(session = self.id, "dropping unused transaction future");
            }
            return self.txn.abandon();
        }
        let ctx = self.context();
        self.txn.commit(&ctx)
    }

    /// Rolls back the session's transaction and drops its binlog payload and
    /// dirty rows.
    ///
    /// # Errors
    ///
    /// Returns the underlying rollback error.
    pub fn rollback_txn(&mut self) -> CoreResult<()> {
        self.binlog.clear();
        self.dirty_db.clear();
        if !self.txn.is_pending_or_valid() {
            self.txn.reset();
            return Ok(());
        }
        self.txn.rollback()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("txn", &self.txn)
            .field("binlog_tables", &self.binlog.mutations.len())
            .field("dirty_tables", &self.dirty_db.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}: {}", self.id, self.txn)
    }
}
