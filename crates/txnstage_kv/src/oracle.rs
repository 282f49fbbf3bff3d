//! Timestamps and the time oracle.
//!
//! Transactions are bound to a start timestamp handed out by an [`Oracle`].
//! Acquiring a timestamp never blocks: [`Oracle::get_timestamp_async`]
//! returns a [`TimestampFuture`] immediately and only awaiting it suspends.

use crate::error::{KvError, KvResult};
use crate::transaction::Context;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::oneshot;

/// A logical timestamp.
///
/// Timestamps are monotonically increasing and never reused by a single oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The zero timestamp, older than anything an oracle hands out.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp.
    #[must_use]
    pub const fn new(ts: u64) -> Self {
        Self(ts)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

/// A pending timestamp request.
#[derive(Debug)]
pub struct TimestampFuture {
    rx: oneshot::Receiver<KvResult<Timestamp>>,
}

impl TimestampFuture {
    /// Creates a connected pair: the sender side completes the future.
    #[must_use]
    pub fn channel() -> (oneshot::Sender<KvResult<Timestamp>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Creates a future that is already complete.
    #[must_use]
    pub fn ready(result: KvResult<Timestamp>) -> Self {
        let (tx, future) = Self::channel();
        // The receiver is alive, so the send cannot fail.
        let _ = tx.send(result);
        future
    }

    /// Waits for the timestamp.
    ///
    /// # Errors
    ///
    /// Returns the oracle's error, or [`KvError::TimestampUnavailable`] if the
    /// oracle dropped the request without answering.
    pub async fn wait(self) -> KvResult<Timestamp> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(KvError::timestamp_unavailable(
                "oracle dropped the timestamp request",
            )),
        }
    }
}

/// A source of timestamps.
pub trait Oracle: Send + Sync {
    /// Requests a timestamp without blocking the caller.
    fn get_timestamp_async(&self, ctx: &Context) -> TimestampFuture;
}

/// A process-local oracle backed by an atomic counter.
///
/// The oracle can be switched into an unavailable mode, in which every
/// request fails, to simulate a timestamp service outage.
#[derive(Debug)]
pub struct LocalOracle {
    counter: AtomicU64,
    unavailable: AtomicBool,
}

impl LocalOracle {
    /// Creates an oracle whose first timestamp is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_start(1)
    }

    /// Creates an oracle starting from a given timestamp.
    #[must_use]
    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Allocates the next timestamp synchronously.
    pub fn next_ts(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the timestamp the next allocation would produce.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst))
    }

    /// Makes subsequent async requests fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Default for LocalOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl Oracle for LocalOracle {
    fn get_timestamp_async(&self, ctx: &Context) -> TimestampFuture {
        if self.unavailable.load(Ordering::SeqCst) {
            tracing::debug!(session = ctx.session_id, "local oracle unavailable");
            return TimestampFuture::ready(Err(KvError::timestamp_unavailable(
                "local oracle is unavailable",
            )));
        }
        TimestampFuture::ready(Ok(self.next_ts()))
    }
}
