//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated operation
//! sequences overwrite and delete each other's keys often.

use proptest::prelude::*;
use std::collections::BTreeMap;
use txnstage_kv::{Bytes, Key};

/// A single buffered write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set a key to a non-empty value.
    Set(Key, Bytes),
    /// Delete a key.
    Delete(Key),
}

impl WriteOp {
    /// Returns the key the operation touches.
    pub fn key(&self) -> &Key {
        match self {
            Self::Set(key, _) | Self::Delete(key) => key,
        }
    }
}

/// A statement: some writes, then commit (`true`) or rollback (`false`).
pub type Statement = (Vec<WriteOp>, bool);

/// Strategy for keys with frequent collisions.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop::string::string_regex("[a-f]{1,2}")
        .expect("Invalid regex")
        .prop_map(Key::from)
}

/// Strategy for non-empty values.
pub fn value_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 1..16).prop_map(Bytes::from)
}

/// Strategy for a single write, biased towards sets.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy()).prop_map(|(k, v)| WriteOp::Set(k, v)),
        1 => key_strategy().prop_map(WriteOp::Delete),
    ]
}

/// Strategy for a sequence of up to `max` writes.
pub fn write_ops_strategy(max: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), 0..=max)
}

/// Strategy for committed data a store is seeded with.
pub fn seed_strategy() -> impl Strategy<Value = BTreeMap<Key, Bytes>> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..8)
}

/// Strategy for a sequence of statements, mostly committed.
pub fn statements_strategy(max: usize) -> impl Strategy<Value = Vec<Statement>> {
    prop::collection::vec((write_ops_strategy(6), prop::bool::weighted(0.7)), 1..=max)
}
