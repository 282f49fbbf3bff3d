//! Stress tests for txnstage.
//!
//! These runs drive many short transactions through sessions, either from
//! one thread or from several sessions sharing a store.

use crate::fixtures::block_on;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use txnstage_core::{CoreResult, Session, TxnConfig};
use txnstage_kv::{Bytes, Key, MemoryStorage};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Transactions that committed.
    pub successful_ops: usize,
    /// Transactions that failed.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions to run (split across threads).
    pub operations: usize,
    /// Number of concurrent sessions.
    pub threads: usize,
    /// Size of written values in bytes.
    pub value_size: usize,
    /// Number of distinct keys per session.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 64,
            key_count: 100,
        }
    }
}

fn stress_key(prefix: &str, i: usize) -> Key {
    Key::from(format!("{prefix}-{i:08}"))
}

/// Runs one statement writing `key` and commits the transaction.
fn write_txn(session: &mut Session, key: Key, value: Bytes) -> CoreResult<()> {
    block_on(session.run_statement(|txn| txn.set(key, value)))?;
    session.commit_txn()
}

/// Runs single-statement transactions back to back from one session.
pub fn stress_sequential_statements(
    store: &MemoryStorage,
    config: &StressConfig,
) -> StressTestResult {
    let mut session = Session::new(1, Arc::new(store.clone()), TxnConfig::default());
    let value = Bytes::from(vec![0xAB; config.value_size.max(1)]);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = stress_key("seq", i % config.key_count.max(1));
        match write_txn(&mut session, key, value.clone()) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Runs sessions concurrently, one per thread, over one store.
///
/// With `contended` false every session owns its keys and no transaction
/// should fail. With `contended` true all sessions share keys and
/// write conflicts are counted as failures.
pub fn stress_concurrent_sessions(
    store: &MemoryStorage,
    config: &StressConfig,
    contended: bool,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = store.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count.max(1);
            let value = Bytes::from(vec![t as u8; config.value_size.max(1)]);

            thread::spawn(move || {
                let mut session = Session::new(t as u64, Arc::new(store), TxnConfig::default());
                let prefix = if contended {
                    "shared".to_string()
                } else {
                    format!("s{t}")
                };

                for i in 0..ops_per_thread {
                    let key = stress_key(&prefix, i % key_count);
                    match write_txn(&mut session, key, value.clone()) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                    assert!(
                        !session.txn().is_pending_or_valid(),
                        "Transaction survived commit"
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
