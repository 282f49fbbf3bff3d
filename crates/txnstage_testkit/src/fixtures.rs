//! Test fixtures and store helpers.
//!
//! [`RecordingStorage`] wraps a [`MemoryStorage`] and logs every call that
//! reaches the underlying transactions, so tests can check exactly what a
//! statement flush or a transaction commit did. Failures can be injected
//! per key or per operation.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use txnstage_core::{Session, TxnConfig};
use txnstage_kv::{
    Bytes, Context, Key, KvError, KvIter, KvResult, KvTransaction, MemoryStorage, Oracle,
    SafeStore, Storage, Timestamp,
};

/// A call observed on a transaction of a [`RecordingStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A transaction was begun.
    Begin {
        /// Its start timestamp.
        start_ts: Timestamp,
    },
    /// `set` was called.
    Set {
        /// The written key.
        key: Key,
    },
    /// `delete` was called.
    Delete {
        /// The deleted key.
        key: Key,
    },
    /// `commit` was called.
    Commit {
        /// Start timestamp of the committed transaction.
        start_ts: Timestamp,
    },
    /// `rollback` was called.
    Rollback {
        /// Start timestamp of the rolled back transaction.
        start_ts: Timestamp,
    },
}

#[derive(Debug, Default)]
struct InjectedFaults {
    fail_set_on: Option<Key>,
    fail_commit: bool,
    fail_rollback: bool,
}

/// A [`Storage`] that records transaction calls and injects failures.
#[derive(Debug, Clone)]
pub struct RecordingStorage {
    inner: MemoryStorage,
    events: Arc<Mutex<Vec<StoreEvent>>>,
    faults: Arc<Mutex<InjectedFaults>>,
    assumptions: bool,
}

impl RecordingStorage {
    /// Creates a recording store over an empty memory store.
    pub fn new() -> Self {
        Self::over(MemoryStorage::new())
    }

    /// Creates a recording store over an existing memory store.
    pub fn over(inner: MemoryStorage) -> Self {
        Self {
            inner,
            events: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Mutex::new(InjectedFaults::default())),
            assumptions: true,
        }
    }

    /// Hides the assumption capability of begun transactions.
    pub fn without_assumptions(mut self) -> Self {
        self.assumptions = false;
        self
    }

    /// Returns the wrapped memory store.
    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    /// Counts recorded events matching a predicate.
    pub fn count(&self, pred: impl Fn(&StoreEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Forgets all recorded events.
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Makes `set` fail for `key`.
    pub fn fail_set_on(&self, key: impl Into<Key>) {
        self.faults.lock().fail_set_on = Some(key.into());
    }

    /// Makes `commit` fail.
    pub fn fail_commit(&self, fail: bool) {
        self.faults.lock().fail_commit = fail;
    }

    /// Makes `rollback` fail.
    pub fn fail_rollback(&self, fail: bool) {
        self.faults.lock().fail_rollback = fail;
    }

    fn wrap(&self, inner: Box<dyn KvTransaction>) -> Box<dyn KvTransaction> {
        self.events.lock().push(StoreEvent::Begin {
            start_ts: inner.start_ts(),
        });
        Box::new(RecordingTxn {
            inner,
            events: Arc::clone(&self.events),
            faults: Arc::clone(&self.faults),
            assumptions: self.assumptions,
        })
    }
}

impl Default for RecordingStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for RecordingStorage {
    fn begin(&self) -> KvResult<Box<dyn KvTransaction>> {
        Ok(self.wrap(self.inner.begin()?))
    }

    fn begin_with_start_ts(&self, start_ts: Timestamp) -> KvResult<Box<dyn KvTransaction>> {
        Ok(self.wrap(self.inner.begin_with_start_ts(start_ts)?))
    }

    fn oracle(&self) -> Arc<dyn Oracle> {
        self.inner.oracle()
    }
}

#[derive(Debug)]
struct RecordingTxn {
    inner: Box<dyn KvTransaction>,
    events: Arc<Mutex<Vec<StoreEvent>>>,
    faults: Arc<Mutex<InjectedFaults>>,
    assumptions: bool,
}

impl RecordingTxn {
    fn record(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }
}

impl KvTransaction for RecordingTxn {
    fn get(&self, key: &Key) -> KvResult<Bytes> {
        self.inner.get(key)
    }

    fn set(&mut self, key: Key, value: Bytes) -> KvResult<()> {
        self.record(StoreEvent::Set { key: key.clone() });
        if self.faults.lock().fail_set_on.as_ref() == Some(&key) {
            return Err(KvError::backend("injected set failure"));
        }
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: Key) -> KvResult<()> {
        self.record(StoreEvent::Delete { key: key.clone() });
        self.inner.delete(key)
    }

    fn iter(&self, lower: &Key, upper: Option<&Key>) -> KvResult<KvIter<'_>> {
        self.inner.iter(lower, upper)
    }

    fn iter_reverse(&self, upper: Option<&Key>) -> KvResult<KvIter<'_>> {
        self.inner.iter_reverse(upper)
    }

    fn commit(&mut self, ctx: &Context) -> KvResult<()> {
        self.record(StoreEvent::Commit {
            start_ts: self.inner.start_ts(),
        });
        if self.faults.lock().fail_commit {
            let _ = self.inner.rollback();
            return Err(KvError::backend("injected commit failure"));
        }
        self.inner.commit(ctx)
    }

    fn rollback(&mut self) -> KvResult<()> {
        self.record(StoreEvent::Rollback {
            start_ts: self.inner.start_ts(),
        });
        let result = self.inner.rollback();
        if self.faults.lock().fail_rollback {
            return Err(KvError::backend("injected rollback failure"));
        }
        result
    }

    fn start_ts(&self) -> Timestamp {
        self.inner.start_ts()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.inner.set_capacity(capacity);
    }

    fn as_safe_store(&mut self) -> Option<&mut dyn SafeStore> {
        if self.assumptions {
            self.inner.as_safe_store()
        } else {
            None
        }
    }
}

/// A session over a [`RecordingStorage`].
pub struct TestSession {
    /// The session under test.
    pub session: Session,
    /// The store the session runs on.
    pub store: RecordingStorage,
}

impl TestSession {
    /// Creates a session with the default configuration over an empty store.
    pub fn new() -> Self {
        Self::with_config(TxnConfig::default())
    }

    /// Creates a session with a configuration over an empty store.
    pub fn with_config(config: TxnConfig) -> Self {
        Self::over(RecordingStorage::new(), config)
    }

    /// Creates a session over a given store.
    pub fn over(store: RecordingStorage, config: TxnConfig) -> Self {
        let session = Session::new(1, Arc::new(store.clone()), config);
        Self { session, store }
    }

    /// Creates a session over a store preloaded with committed data.
    pub fn seeded<I, K, V>(config: TxnConfig, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Bytes>,
    {
        let store = RecordingStorage::new();
        store.memory().load(entries);
        Self::over(store, config)
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl std::ops::DerefMut for TestSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

/// Runs a future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
        .block_on(future)
}

/// Routes `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let store = RecordingStorage::new();
        let mut txn = store.begin().unwrap();
        let start_ts = txn.start_ts();
        txn.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        txn.delete(Key::from("b")).unwrap();
        txn.commit(&Context::default()).unwrap();

        assert_eq!(
            store.events(),
            vec![
                StoreEvent::Begin { start_ts },
                StoreEvent::Set { key: Key::from("a") },
                StoreEvent::Delete { key: Key::from("b") },
                StoreEvent::Commit { start_ts },
            ]
        );
    }

    #[test]
    fn injected_set_failure() {
        let store = RecordingStorage::new();
        store.fail_set_on("bad");
        let mut txn = store.begin().unwrap();
        assert!(txn.set(Key::from("ok"), Bytes::from_static(b"1")).is_ok());
        assert!(txn.set(Key::from("bad"), Bytes::from_static(b"1")).is_err());
    }

    #[test]
    fn assumption_capability_can_be_hidden() {
        let store = RecordingStorage::new().without_assumptions();
        let mut txn = store.begin().unwrap();
        assert!(txn.as_safe_store().is_none());

        let store = RecordingStorage::new();
        let mut txn = store.begin().unwrap();
        assert!(txn.as_safe_store().is_some());
    }

    #[test]
    fn seeded_session_sees_data() {
        let ts = TestSession::seeded(TxnConfig::default(), [("k", "v")]);
        assert_eq!(
            ts.store.memory().latest(&Key::from("k")),
            Some(Bytes::from_static(b"v"))
        );
        assert!(!ts.txn().is_pending_or_valid());
    }
}
