//! Cross-crate integration test helpers.
//!
//! [`OverlayHarness`] drives a [`TxnState`] over a [`MemoryStorage`] and
//! tracks what every key should read as, so that tests can check the
//! overlay, statement and commit rules against a plain model.

use crate::generators::WriteOp;
use std::collections::BTreeMap;
use txnstage_core::{BinlogPrewrite, DirtyDb, TxnConfig, TxnState};
use txnstage_kv::{Bytes, Context, Key, MemoryStorage, Storage};

/// A transaction under test plus a model of its expected contents.
pub struct OverlayHarness {
    /// The state under test.
    pub state: TxnState,
    /// The store the transaction runs on.
    pub store: MemoryStorage,
    binlog: BinlogPrewrite,
    cache: DirtyDb,
    /// Visible contents after the last statement commit.
    committed: BTreeMap<Key, Bytes>,
    /// The current statement's writes; `None` is a deletion.
    staged: BTreeMap<Key, Option<Bytes>>,
}

impl OverlayHarness {
    /// Creates a harness over a store seeded with `seed`, with a valid
    /// transaction adopted.
    pub fn new(seed: &BTreeMap<Key, Bytes>) -> Self {
        Self::with_config(seed, TxnConfig::default())
    }

    /// Like [`new`](Self::new) with a custom configuration.
    pub fn with_config(seed: &BTreeMap<Key, Bytes>, config: TxnConfig) -> Self {
        let store = MemoryStorage::new();
        store.load(seed.clone());
        let mut state = TxnState::new(&config);
        state
            .adopt(store.begin().expect("Failed to begin"))
            .expect("Failed to adopt");
        Self {
            state,
            store,
            binlog: BinlogPrewrite::new(),
            cache: DirtyDb::new(),
            committed: seed.clone(),
            staged: BTreeMap::new(),
        }
    }

    /// Applies a write to the state and the model.
    pub fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Set(key, value) => {
                self.state
                    .set(key.clone(), value.clone())
                    .expect("Failed to set");
                self.staged.insert(key.clone(), Some(value.clone()));
            }
            WriteOp::Delete(key) => {
                self.state.delete(key.clone()).expect("Failed to delete");
                self.staged.insert(key.clone(), None);
            }
        }
    }

    /// Commits the current statement.
    pub fn commit_statement(&mut self) {
        self.state
            .statement_commit(&mut self.binlog, &mut self.cache)
            .expect("Failed to commit statement");
        for (key, value) in std::mem::take(&mut self.staged) {
            match value {
                Some(value) => self.committed.insert(key, value),
                None => self.committed.remove(&key),
            };
        }
    }

    /// Rolls back the current statement.
    pub fn rollback_statement(&mut self) {
        self.state.statement_rollback();
        self.staged.clear();
    }

    /// Returns what `key` should read as right now.
    pub fn expected(&self, key: &Key) -> Option<Bytes> {
        match self.staged.get(key) {
            Some(staged) => staged.clone(),
            None => self.committed.get(key).cloned(),
        }
    }

    /// Returns the full expected visible contents.
    pub fn expected_contents(&self) -> BTreeMap<Key, Bytes> {
        let mut contents = self.committed.clone();
        for (key, value) in &self.staged {
            match value {
                Some(value) => contents.insert(key.clone(), value.clone()),
                None => contents.remove(key),
            };
        }
        contents
    }

    /// Checks every key the model knows about with point reads.
    pub fn verify_all(&self) {
        let keys = self.committed.keys().chain(self.staged.keys());
        for key in keys {
            let actual = match self.state.get(key) {
                Ok(value) => Some(value),
                Err(err) if err.is_not_found() => None,
                Err(err) => panic!("Failed to get {key}: {err}"),
            };
            assert_eq!(actual, self.expected(key), "Value mismatch for {key}");
        }
    }

    /// Checks forward and reverse scans against the model.
    pub fn verify_scan(&self) {
        let expected: Vec<(Key, Bytes)> = self.expected_contents().into_iter().collect();

        let forward: Vec<(Key, Bytes)> = self
            .state
            .iter(&Key::default(), None)
            .expect("Failed to iterate")
            .collect::<Result<_, _>>()
            .expect("Iteration failed");
        assert_eq!(forward, expected, "Forward scan mismatch");

        let mut backward: Vec<(Key, Bytes)> = self
            .state
            .iter_reverse(None)
            .expect("Failed to iterate")
            .collect::<Result<_, _>>()
            .expect("Iteration failed");
        backward.reverse();
        assert_eq!(backward, expected, "Reverse scan mismatch");
    }

    /// Commits the transaction and checks the store against the model.
    pub fn commit_and_verify(mut self) {
        self.state
            .commit(&Context::default())
            .expect("Failed to commit");
        assert!(!self.state.is_pending_or_valid());
        for (key, value) in &self.committed {
            assert_eq!(
                self.store.latest(key).as_ref(),
                Some(value),
                "Committed value mismatch for {key}"
            );
        }
    }

    /// Returns the binlog payload merged so far.
    pub fn binlog(&self) -> &BinlogPrewrite {
        &self.binlog
    }
}
