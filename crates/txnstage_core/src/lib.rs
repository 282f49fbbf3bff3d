//! # txnstage Core
//!
//! Per-session transaction state and statement write staging.
//!
//! This crate provides:
//! - Lazy transaction start through a [`TxnFuture`]
//! - A three-phase [`TxnState`] (invalid, pending, valid)
//! - Statement-scoped staging of writes, binlog mutations and dirty-table
//!   operations, committed or discarded as a unit
//! - A [`Session`] driver tying the above to a [`Storage`](txnstage_kv::Storage)
//!
//! ## Example
//!
//! ```rust
//! use txnstage_core::{TxnConfig, TxnState};
//! use txnstage_kv::{Bytes, Key, MemoryStorage, Storage};
//!
//! let store = MemoryStorage::new();
//! let mut txn = TxnState::new(&TxnConfig::default());
//! txn.adopt(store.begin().unwrap()).unwrap();
//!
//! txn.set(Key::from("k"), Bytes::from_static(b"v")).unwrap();
//! assert_eq!(txn.get(&Key::from("k")).unwrap().as_ref(), b"v");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dirty;
mod error;
mod mutation;
mod session;
mod transaction;
mod types;

pub use config::{FaultInjection, TxnConfig};
pub use dirty::{merge_dirty_op, DirtyDb, DirtyTable, DirtyTableOp, RowCache};
pub use error::{CoreError, CoreResult};
pub use mutation::{merge_mutation, BinlogPrewrite, MutationLedger, MutationType, TableMutation};
pub use session::Session;
pub use transaction::{TxnFuture, TxnState};
pub use types::{Datum, Handle, Row, TableId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
