//! Lazily started transactions.
//!
//! A session that is about to run a statement requests a start timestamp
//! up front but only waits for it when a transaction is actually needed.
//! [`TxnFuture`] carries that outstanding request.

use crate::config::FaultInjection;
use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use txnstage_kv::{Context, KvTransaction, Storage, TimestampFuture};

/// An outstanding start-timestamp request plus the store to begin on.
pub struct TxnFuture {
    future: TimestampFuture,
    store: Arc<dyn Storage>,
    fail: bool,
}

impl TxnFuture {
    /// Requests a start timestamp from the store's oracle without waiting.
    ///
    /// With `faults.fail_timestamp` set, the returned future fails on
    /// [`resolve`](Self::resolve) instead of starting a transaction.
    #[must_use]
    pub fn acquire(store: &Arc<dyn Storage>, ctx: &Context, faults: &FaultInjection) -> Self {
        let span = tracing::debug_span!("txn_future", session = ctx.session_id);
        let _guard = span.enter();

        let future = store.oracle().get_timestamp_async(ctx);
        debug!("start timestamp requested");
        Self {
            future,
            store: Arc::clone(store),
            fail: faults.fail_timestamp,
        }
    }

    /// Wraps an existing timestamp request.
    #[must_use]
    pub fn new(future: TimestampFuture, store: Arc<dyn Storage>) -> Self {
        Self {
            future,
            store,
            fail: false,
        }
    }

    /// Waits for the timestamp and begins a transaction bound to it.
    ///
    /// If the oracle fails, a fresh transaction is begun directly on the
    /// store, which allocates its own start timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TimestampUnavailable`] when the fault is injected,
    /// or a store error if no transaction can be begun.
    pub async fn resolve(self) -> CoreResult<Box<dyn KvTransaction>> {
        if self.fail {
            return Err(CoreError::timestamp_unavailable(
                "injected timestamp failure",
            ));
        }

        match self.future.wait().await {
            Ok(start_ts) => self
                .store
                .begin_with_start_ts(start_ts)
                .map_err(CoreError::store("begin")),
            Err(err) => {
                warn!(error = %err, "timestamp request failed, beginning a fresh transaction");
                self.store.begin().map_err(CoreError::store("begin"))
            }
        }
    }
}

impl fmt::Debug for TxnFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnFuture")
            .field("future", &self.future)
            .field("fail", &self.fail)
            .finish_non_exhaustive()
    }
}
