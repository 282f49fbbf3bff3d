//! Lazy transactions and statement write staging.
//!
//! A session's transaction moves through three phases:
//! - **Invalid**: no transaction exists
//! - **Pending**: a start timestamp was requested but not waited for
//! - **Valid**: a transaction was begun and adopted
//!
//! Statement work is staged on top of the transaction and reaches it only
//! when the statement commits.

mod future;
mod state;
mod statement;

pub use future::TxnFuture;
pub use state::TxnState;
