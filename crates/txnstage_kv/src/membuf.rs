//! Ordered in-memory write buffer.
//!
//! A [`MemBuffer`] captures writes before they reach a transaction. Deletions
//! are stored as tombstones (an empty value) so that a buffered delete can
//! shadow a value that is still visible underneath.

use crate::error::{KvError, KvResult};
use crate::key::Key;
use crate::transaction::KvIter;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Default capacity hint for a transaction's write buffer, in bytes.
///
/// The hint is a soft limit: writes past it are accepted and logged once.
pub const DEFAULT_MEMBUF_CAPACITY: usize = 4 * 1024;

/// Default limit on the size of a single entry (key plus value), in bytes.
pub const DEFAULT_ENTRY_SIZE_LIMIT: usize = 6 * 1024 * 1024;

/// An ordered key-value overlay with tombstones.
#[derive(Debug, Clone)]
pub struct MemBuffer {
    entries: BTreeMap<Key, Bytes>,
    /// Sum of key and value lengths of all entries.
    size: usize,
    capacity: usize,
    entry_size_limit: usize,
}

impl MemBuffer {
    /// Creates an empty buffer with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMBUF_CAPACITY)
    }

    /// Creates an empty buffer with a capacity hint.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            size: 0,
            capacity,
            entry_size_limit: DEFAULT_ENTRY_SIZE_LIMIT,
        }
    }

    /// Sets the per-entry size limit.
    #[must_use]
    pub fn entry_size_limit(mut self, limit: usize) -> Self {
        self.entry_size_limit = limit;
        self
    }

    /// Returns the capacity hint.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Updates the capacity hint.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Returns true if the buffered bytes exceed the capacity hint.
    #[must_use]
    pub fn exceeds_capacity(&self) -> bool {
        self.size > self.capacity
    }

    /// Looks up a key. A tombstone comes back as `Some` of an empty value.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Bytes> {
        self.entries.get(key)
    }

    /// Buffers a write.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::EmptyValue`] for an empty value and
    /// [`KvError::EntryTooLarge`] if the entry exceeds the size limit.
    pub fn set(&mut self, key: Key, value: Bytes) -> KvResult<()> {
        if value.is_empty() {
            return Err(KvError::EmptyValue { key });
        }
        self.insert(key, value)
    }

    /// Buffers a deletion as a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::EntryTooLarge`] if the key alone exceeds the size limit.
    pub fn delete(&mut self, key: Key) -> KvResult<()> {
        self.insert(key, Bytes::new())
    }

    fn insert(&mut self, key: Key, value: Bytes) -> KvResult<()> {
        let entry_size = key.len() + value.len();
        if entry_size > self.entry_size_limit {
            return Err(KvError::EntryTooLarge {
                size: entry_size,
                limit: self.entry_size_limit,
            });
        }
        let within = !self.exceeds_capacity();
        self.size += entry_size;
        if let Some(old) = self.entries.insert(key.clone(), value) {
            self.size -= key.len() + old.len();
        }
        if within && self.exceeds_capacity() {
            tracing::debug!(
                size = self.size,
                capacity = self.capacity,
                "write buffer grew past its capacity hint"
            );
        }
        Ok(())
    }

    /// Iterates entries in `[lower, upper)` in ascending order, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::InvalidRange`] if `lower` is past `upper`.
    pub fn iter(&self, lower: &Key, upper: Option<&Key>) -> KvResult<KvIter<'_>> {
        let upper_bound = match upper {
            Some(upper) if lower > upper => {
                return Err(KvError::InvalidRange {
                    lower: lower.clone(),
                    upper: upper.clone(),
                });
            }
            Some(upper) => Bound::Excluded(upper.clone()),
            None => Bound::Unbounded,
        };
        let range = self
            .entries
            .range((Bound::Included(lower.clone()), upper_bound));
        Ok(Box::new(range.map(|(k, v)| Ok((k.clone(), v.clone())))))
    }

    /// Iterates entries below `upper` in descending order, tombstones included.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature mirrors [`iter`](Self::iter).
    pub fn iter_reverse(&self, upper: Option<&Key>) -> KvResult<KvIter<'_>> {
        let upper_bound = match upper {
            Some(upper) => Bound::Excluded(upper.clone()),
            None => Bound::Unbounded,
        };
        let range = self.entries.range((Bound::Unbounded, upper_bound)).rev();
        Ok(Box::new(range.map(|(k, v)| Ok((k.clone(), v.clone())))))
    }

    /// Visits every entry in key order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn walk<F>(&self, mut f: F) -> KvResult<()>
    where
        F: FnMut(&Key, &Bytes) -> KvResult<()>,
    {
        for (key, value) in self.entries() {
            f(key, value)?;
        }
        Ok(())
    }

    /// Iterates every entry in key order, tombstones included.
    pub fn entries(&self) -> impl Iterator<Item = (&Key, &Bytes)> {
        self.entries.iter()
    }

    /// Returns the number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total buffered size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Discards every entry, keeping the configured limits.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.size = 0;
    }
}

impl Default for MemBuffer {
    fn default() -> Self {
        Self::new()
    }
}
