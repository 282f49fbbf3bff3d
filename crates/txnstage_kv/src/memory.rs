//! In-memory transactional store.

use crate::error::{KvError, KvResult};
use crate::key::Key;
use crate::membuf::MemBuffer;
use crate::oracle::{LocalOracle, Oracle, Timestamp};
use crate::transaction::{Assumption, Context, KvIter, KvTransaction, SafeStore, Storage};
use crate::union_iter::UnionIter;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Committed versions of one key, oldest first. `None` marks a deletion.
type Versions = Vec<(Timestamp, Option<Bytes>)>;

/// Counters describing what the store has seen.
#[derive(Debug, Default)]
pub struct StoreStats {
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl StoreStats {
    /// Number of transactions begun.
    #[must_use]
    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::SeqCst)
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of rollbacks.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Shared {
    data: RwLock<BTreeMap<Key, Versions>>,
    oracle: Arc<LocalOracle>,
    stats: StoreStats,
}

impl Shared {
    fn read_at(&self, key: &Key, ts: Timestamp) -> Option<Bytes> {
        let data = self.data.read();
        visible(data.get(key)?, ts)
    }

    /// Materializes the live keys of a range as seen at `ts`.
    fn scan_at(
        &self,
        range: (Bound<Key>, Bound<Key>),
        ts: Timestamp,
        reverse: bool,
    ) -> Vec<(Key, Bytes)> {
        let data = self.data.read();
        let rows = data
            .range(range)
            .filter_map(|(k, versions)| visible(versions, ts).map(|v| (k.clone(), v)));
        if reverse {
            let mut rows: Vec<_> = rows.collect();
            rows.reverse();
            rows
        } else {
            rows.collect()
        }
    }
}

fn visible(versions: &Versions, ts: Timestamp) -> Option<Bytes> {
    versions
        .iter()
        .rev()
        .find(|(commit_ts, _)| *commit_ts <= ts)
        .and_then(|(_, value)| value.clone())
}

/// An in-memory multi-version store.
///
/// Reads see the snapshot at the transaction's start timestamp. Commit
/// detects write-write conflicts against versions committed after the start
/// timestamp and validates recorded [`Assumption`]s.
///
/// This store is suitable for:
/// - Unit and integration tests
/// - Scripted sessions in the CLI
///
/// # Example
///
/// ```rust
/// use txnstage_kv::{Context, Key, MemoryStorage, Storage};
///
/// let store = MemoryStorage::new();
/// let mut txn = store.begin().unwrap();
/// txn.set(Key::from("k"), "v".into()).unwrap();
/// txn.commit(&Context::default()).unwrap();
///
/// let txn = store.begin().unwrap();
/// assert_eq!(txn.get(&Key::from("k")).unwrap().as_ref(), b"v");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store's local oracle.
    #[must_use]
    pub fn local_oracle(&self) -> &Arc<LocalOracle> {
        &self.shared.oracle
    }

    /// Returns the store's counters.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.shared.stats
    }

    /// Reads the latest committed value of a key, outside any transaction.
    #[must_use]
    pub fn latest(&self, key: &Key) -> Option<Bytes> {
        self.shared.read_at(key, Timestamp(u64::MAX))
    }

    /// Writes committed values directly, as one commit.
    pub fn load<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Bytes>,
    {
        let commit_ts = self.shared.oracle.next_ts();
        let mut data = self.shared.data.write();
        for (key, value) in entries {
            data.entry(key.into())
                .or_default()
                .push((commit_ts, Some(value.into())));
        }
    }

    fn start(&self, start_ts: Timestamp) -> Box<dyn KvTransaction> {
        self.shared.stats.begins.fetch_add(1, Ordering::SeqCst);
        Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            start_ts,
            writes: MemBuffer::new(),
            assumptions: Vec::new(),
            valid: true,
        })
    }
}

impl Storage for MemoryStorage {
    fn begin(&self) -> KvResult<Box<dyn KvTransaction>> {
        Ok(self.start(self.shared.oracle.next_ts()))
    }

    fn begin_with_start_ts(&self, start_ts: Timestamp) -> KvResult<Box<dyn KvTransaction>> {
        Ok(self.start(start_ts))
    }

    fn oracle(&self) -> Arc<dyn Oracle> {
        self.shared.oracle.clone()
    }
}

/// A transaction on a [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    start_ts: Timestamp,
    writes: MemBuffer,
    assumptions: Vec<(Key, Assumption)>,
    valid: bool,
}

impl MemoryTransaction {
    fn ensure_valid(&self) -> KvResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(KvError::TxnClosed {
                start_ts: self.start_ts,
            })
        }
    }

    fn check(&self, data: &BTreeMap<Key, Versions>) -> KvResult<()> {
        for (key, _) in self.writes.iter(&Key::default(), None)?.flatten() {
            if let Some((commit_ts, _)) = data.get(&key).and_then(|v| v.last()) {
                if *commit_ts > self.start_ts {
                    return Err(KvError::WriteConflict {
                        key,
                        start_ts: self.start_ts,
                        conflict_ts: *commit_ts,
                    });
                }
            }
        }
        for (key, assumption) in &self.assumptions {
            let exists = data
                .get(key)
                .and_then(|versions| visible(versions, Timestamp(u64::MAX)))
                .is_some();
            let holds = match assumption {
                Assumption::PresumeNotExists => !exists,
                Assumption::PresumeExists => exists,
            };
            if !holds {
                return Err(KvError::AssumptionViolated {
                    key: key.clone(),
                    assumption: *assumption,
                });
            }
        }
        Ok(())
    }
}

impl KvTransaction for MemoryTransaction {
    fn get(&self, key: &Key) -> KvResult<Bytes> {
        self.ensure_valid()?;
        let value = match self.writes.get(key) {
            Some(value) => Some(value.clone()).filter(|v| !v.is_empty()),
            None => self.shared.read_at(key, self.start_ts),
        };
        value.ok_or_else(|| KvError::not_found(key.clone()))
    }

    fn set(&mut self, key: Key, value: Bytes) -> KvResult<()> {
        self.ensure_valid()?;
        self.writes.set(key, value)
    }

    fn delete(&mut self, key: Key) -> KvResult<()> {
        self.ensure_valid()?;
        self.writes.delete(key)
    }

    fn iter(&self, lower: &Key, upper: Option<&Key>) -> KvResult<KvIter<'_>> {
        self.ensure_valid()?;
        let dirty = self.writes.iter(lower, upper)?;
        let upper_bound = upper.map_or(Bound::Unbounded, |u| Bound::Excluded(u.clone()));
        let rows = self
            .shared
            .scan_at((Bound::Included(lower.clone()), upper_bound), self.start_ts, false);
        let snapshot: KvIter<'_> = Box::new(rows.into_iter().map(Ok));
        Ok(Box::new(UnionIter::new(dirty, snapshot, false)))
    }

    fn iter_reverse(&self, upper: Option<&Key>) -> KvResult<KvIter<'_>> {
        self.ensure_valid()?;
        let dirty = self.writes.iter_reverse(upper)?;
        let upper_bound = upper.map_or(Bound::Unbounded, |u| Bound::Excluded(u.clone()));
        let rows = self
            .shared
            .scan_at((Bound::Unbounded, upper_bound), self.start_ts, true);
        let snapshot: KvIter<'_> = Box::new(rows.into_iter().map(Ok));
        Ok(Box::new(UnionIter::new(dirty, snapshot, true)))
    }

    fn commit(&mut self, ctx: &Context) -> KvResult<()> {
        self.ensure_valid()?;
        self.valid = false;

        let mut data = self.shared.data.write();
        self.check(&data)?;

        let commit_ts = self.shared.oracle.next_ts();
        self.writes.walk(|key, value| {
            let value = Some(value.clone()).filter(|v| !v.is_empty());
            data.entry(key.clone()).or_default().push((commit_ts, value));
            Ok(())
        })?;
        drop(data);

        self.shared.stats.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            session = ctx.session_id,
            start_ts = self.start_ts.as_u64(),
            commit_ts = commit_ts.as_u64(),
            writes = self.writes.len(),
            "memory transaction committed"
        );
        Ok(())
    }

    fn rollback(&mut self) -> KvResult<()> {
        self.ensure_valid()?;
        self.valid = false;
        self.writes.reset();
        self.shared.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.writes.set_capacity(capacity);
    }

    fn as_safe_store(&mut self) -> Option<&mut dyn SafeStore> {
        Some(self)
    }
}

impl SafeStore for MemoryTransaction {
    fn set_assumption(&mut self, key: Key, assumption: Assumption) {
        self.assumptions.push((key, assumption));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::default()
    }

    #[test]
    fn committed_write_is_visible_to_later_txn() {
        let store = MemoryStorage::new();
        let mut txn = store.begin().unwrap();
        txn.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        txn.commit(&ctx()).unwrap();
        assert!(!txn.is_valid());

        let txn = store.begin().unwrap();
        assert_eq!(txn.get(&Key::from("a")).unwrap().as_ref(), b"1");
        assert_eq!(store.stats().commits(), 1);
    }

    #[test]
    fn snapshot_hides_later_commits() {
        let store = MemoryStorage::new();
        let reader = store.begin().unwrap();

        let mut writer = store.begin().unwrap();
        writer.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        writer.commit(&ctx()).unwrap();

        assert!(reader.get(&Key::from("a")).unwrap_err().is_not_found());
    }

    #[test]
    fn begin_with_start_ts_reads_at_that_point() {
        let store = MemoryStorage::new();
        store.load([("a", "old")]);
        let before = store.local_oracle().next_ts();
        store.load([("a", "new")]);

        let txn = store.begin_with_start_ts(before).unwrap();
        assert_eq!(txn.start_ts(), before);
        assert_eq!(txn.get(&Key::from("a")).unwrap().as_ref(), b"old");
    }

    #[test]
    fn own_delete_shadows_snapshot() {
        let store = MemoryStorage::new();
        store.load([("a", "1")]);
        let mut txn = store.begin().unwrap();
        txn.delete(Key::from("a")).unwrap();
        assert!(txn.get(&Key::from("a")).unwrap_err().is_not_found());
    }

    #[test]
    fn write_conflict_detected() {
        let store = MemoryStorage::new();
        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();

        first.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        second.set(Key::from("a"), Bytes::from_static(b"2")).unwrap();
        first.commit(&ctx()).unwrap();

        let result = second.commit(&ctx());
        assert!(matches!(result, Err(KvError::WriteConflict { .. })));
        assert!(!second.is_valid());
        assert_eq!(store.latest(&Key::from("a")).unwrap().as_ref(), b"1");
    }

    #[test]
    fn assumption_violation_fails_commit() {
        let store = MemoryStorage::new();
        store.load([("a", "1")]);
        let mut txn = store.begin().unwrap();
        txn.as_safe_store()
            .unwrap()
            .set_assumption(Key::from("a"), Assumption::PresumeNotExists);
        txn.set(Key::from("a"), Bytes::from_static(b"2")).unwrap();

        let result = txn.commit(&ctx());
        assert!(matches!(result, Err(KvError::AssumptionViolated { .. })));
    }

    #[test]
    fn rollback_discards_writes() {
        let store = MemoryStorage::new();
        let mut txn = store.begin().unwrap();
        txn.set(Key::from("a"), Bytes::from_static(b"1")).unwrap();
        txn.rollback().unwrap();

        assert!(store.latest(&Key::from("a")).is_none());
        assert_eq!(store.stats().rollbacks(), 1);
        assert!(matches!(
            txn.set(Key::from("b"), Bytes::from_static(b"2")),
            Err(KvError::TxnClosed { .. })
        ));
    }

    #[test]
    fn iter_merges_own_writes() {
        let store = MemoryStorage::new();
        store.load([("a", "1"), ("b", "2"), ("c", "3")]);
        let mut txn = store.begin().unwrap();
        txn.delete(Key::from("b")).unwrap();
        txn.set(Key::from("d"), Bytes::from_static(b"4")).unwrap();

        let keys: Vec<_> = txn
            .iter(&Key::from("a"), None)
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![Key::from("a"), Key::from("c"), Key::from("d")]);

        let keys: Vec<_> = txn
            .iter_reverse(Some(&Key::from("d")))
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![Key::from("c"), Key::from("a")]);
    }

    #[test]
    fn committed_delete_removes_key() {
        let store = MemoryStorage::new();
        store.load([("a", "1")]);
        let mut txn = store.begin().unwrap();
        txn.delete(Key::from("a")).unwrap();
        txn.commit(&ctx()).unwrap();
        assert!(store.latest(&Key::from("a")).is_none());
    }
}
