//! Transaction staging configuration.

use txnstage_kv::{DEFAULT_ENTRY_SIZE_LIMIT, DEFAULT_MEMBUF_CAPACITY};

/// Deterministic fault injection points.
///
/// Faults are configured per session rather than globally, so tests that
/// inject them can run in parallel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultInjection {
    /// Resolving a transaction future fails with `TimestampUnavailable`.
    pub fail_timestamp: bool,

    /// A statement drain fails once this many entries have been flushed.
    pub fail_flush_after: Option<usize>,
}

impl FaultInjection {
    /// Creates a configuration with no faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets whether future resolution fails.
    #[must_use]
    pub const fn fail_timestamp(mut self, value: bool) -> Self {
        self.fail_timestamp = value;
        self
    }

    /// Sets the number of entries a drain flushes before failing.
    #[must_use]
    pub const fn fail_flush_after(mut self, count: usize) -> Self {
        self.fail_flush_after = Some(count);
        self
    }
}

/// Configuration for a session's transaction staging.
#[derive(Debug, Clone)]
pub struct TxnConfig {
    /// Capacity hint for the statement write buffer, in bytes. Growing past
    /// it is logged but never refused.
    pub membuf_capacity: usize,

    /// Capacity hint handed to the underlying transaction when it is adopted.
    pub txn_capacity: usize,

    /// Maximum size of a single buffered entry (key plus value), in bytes.
    pub entry_size_limit: usize,

    /// Injected faults.
    pub faults: FaultInjection,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            membuf_capacity: DEFAULT_MEMBUF_CAPACITY,
            txn_capacity: 32 * 1024, // 32 KB
            entry_size_limit: DEFAULT_ENTRY_SIZE_LIMIT,
            faults: FaultInjection::none(),
        }
    }
}

impl TxnConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the statement write buffer capacity hint.
    #[must_use]
    pub const fn membuf_capacity(mut self, capacity: usize) -> Self {
        self.membuf_capacity = capacity;
        self
    }

    /// Sets the underlying transaction capacity hint.
    #[must_use]
    pub const fn txn_capacity(mut self, capacity: usize) -> Self {
        self.txn_capacity = capacity;
        self
    }

    /// Sets the per-entry size limit.
    #[must_use]
    pub const fn entry_size_limit(mut self, limit: usize) -> Self {
        self.entry_size_limit = limit;
        self
    }

    /// Sets the injected faults.
    #[must_use]
    pub fn faults(mut self, faults: FaultInjection) -> Self {
        self.faults = faults;
        self
    }
}
