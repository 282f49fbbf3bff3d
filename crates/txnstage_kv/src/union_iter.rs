//! Merged view of a write buffer over a snapshot.

use crate::error::KvResult;
use crate::key::Key;
use crate::transaction::KvIter;
use bytes::Bytes;
use std::cmp::Ordering;
use std::iter::Peekable;

/// Merges a dirty (buffered) iterator with a snapshot iterator.
///
/// On a key collision the dirty entry wins and the snapshot entry is dropped.
/// Dirty tombstones (empty values) hide the key entirely. Both inputs must be
/// sorted in the same direction; `reverse` selects descending order.
///
/// The first error from either side is yielded and ends the iteration.
pub struct UnionIter<'a> {
    dirty: Peekable<KvIter<'a>>,
    snapshot: Peekable<KvIter<'a>>,
    reverse: bool,
    done: bool,
}

enum Side {
    Dirty,
    Snapshot,
    Both,
}

impl<'a> UnionIter<'a> {
    /// Creates a merged iterator.
    #[must_use]
    pub fn new(dirty: KvIter<'a>, snapshot: KvIter<'a>, reverse: bool) -> Self {
        Self {
            dirty: dirty.peekable(),
            snapshot: snapshot.peekable(),
            reverse,
            done: false,
        }
    }

    fn next_side(&mut self) -> Option<Side> {
        let side = match (self.dirty.peek(), self.snapshot.peek()) {
            (None, None) => return None,
            (Some(Err(_)), _) | (Some(Ok(_)), None) => Side::Dirty,
            (_, Some(Err(_))) | (None, Some(Ok(_))) => Side::Snapshot,
            (Some(Ok((dirty_key, _))), Some(Ok((snap_key, _)))) => {
                let mut ord = dirty_key.cmp(snap_key);
                if self.reverse {
                    ord = ord.reverse();
                }
                match ord {
                    Ordering::Less => Side::Dirty,
                    Ordering::Greater => Side::Snapshot,
                    Ordering::Equal => Side::Both,
                }
            }
        };
        Some(side)
    }
}

impl Iterator for UnionIter<'_> {
    type Item = KvResult<(Key, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let item = match self.next_side() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Side::Snapshot) => self.snapshot.next(),
                Some(Side::Dirty) => self.dirty.next(),
                Some(Side::Both) => {
                    self.snapshot.next();
                    self.dirty.next()
                }
            };
            match item {
                Some(Ok((_, value))) if value.is_empty() => continue,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                other => return other,
            }
        }
        None
    }
}
