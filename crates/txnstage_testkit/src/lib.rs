//! # txnstage Testkit
//!
//! Test utilities for txnstage.
//!
//! This crate provides:
//! - A recording store wrapper with injectable failures
//! - Session fixtures and runtime helpers
//! - Property-based test generators using proptest
//! - A model-checking harness for the write overlay
//! - Fuzz testing harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use txnstage_testkit::prelude::*;
//! use txnstage_kv::{Bytes, Key};
//!
//! let mut ts = TestSession::new();
//! block_on(ts.run_statement(|txn| txn.set(Key::from("k"), Bytes::from_static(b"v")))).unwrap();
//! ts.commit_txn().unwrap();
//! assert_eq!(ts.store.count(|e| matches!(e, StoreEvent::Commit { .. })), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
