//! # txnstage KV
//!
//! Key-value transaction contracts and building blocks for txnstage.
//!
//! This crate defines the boundary between txnstage and the underlying
//! distributed store. The store is consumed only through its capabilities:
//!
//! - [`Storage`] - begins transactions and exposes the time oracle
//! - [`KvTransaction`] - a started transaction (get/set/delete/iterate/commit)
//! - [`SafeStore`] - optional capability for key assumptions
//! - [`Oracle`] - hands out timestamps without blocking
//!
//! It also provides the pieces txnstage builds its write staging on:
//!
//! - [`MemBuffer`] - an ordered write overlay with tombstones
//! - [`UnionIter`] - merges an overlay with a snapshot, overlay first
//! - [`MemoryStorage`] - an in-memory MVCC store for tests and tooling
//!
//! ## Example
//!
//! ```rust
//! use txnstage_kv::{Key, MemBuffer};
//!
//! let mut buf = MemBuffer::new();
//! buf.set(Key::from("a"), "1".into()).unwrap();
//! buf.delete(Key::from("b")).unwrap();
//! assert_eq!(buf.len(), 2);
//! assert!(buf.get(&Key::from("b")).unwrap().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod membuf;
mod memory;
mod oracle;
mod transaction;
mod union_iter;

pub use error::{KvError, KvResult};
pub use key::Key;
pub use membuf::{MemBuffer, DEFAULT_ENTRY_SIZE_LIMIT, DEFAULT_MEMBUF_CAPACITY};
pub use memory::{MemoryStorage, MemoryTransaction, StoreStats};
pub use oracle::{LocalOracle, Oracle, Timestamp, TimestampFuture};
pub use transaction::{Assumption, Context, KvIter, KvTransaction, SafeStore, Storage};
pub use union_iter::UnionIter;

pub use bytes::Bytes;
