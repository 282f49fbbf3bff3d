//! Fuzz testing harnesses for txnstage.
//!
//! These targets can be driven by cargo-fuzz or any other byte-oriented
//! fuzzer. Each interprets its input as a sequence of session operations.

use crate::fixtures::{block_on, TestSession};
use txnstage_core::{DirtyTableOp, FaultInjection, Handle, TableId, TxnConfig};
use txnstage_kv::{Bytes, Key};

/// Fuzz target for session operations.
///
/// Arbitrary operation sequences must never panic, and after every
/// statement boundary the staging area must be empty.
pub fn fuzz_session_operations(data: &[u8]) {
    let Some((&flags, ops)) = data.split_first() else {
        return;
    };

    let mut faults = FaultInjection::none();
    if flags & 0x80 != 0 {
        faults = faults.fail_flush_after(usize::from(flags & 0x07));
    }
    let mut ts = TestSession::with_config(TxnConfig::new().faults(faults));

    for chunk in ops.chunks(3) {
        let [op, k, v] = match *chunk {
            [op, k, v] => [op, k, v],
            _ => return,
        };
        let key = Key::from(vec![b'a' + (k % 8)]);

        match op % 9 {
            0 | 1 => {
                let _ = block_on(ts.session.run_statement(|txn| {
                    txn.set(key, Bytes::from(vec![v; usize::from(v % 4) + 1]))
                }));
            }
            2 => {
                let _ = block_on(ts.session.run_statement(|txn| txn.delete(key)));
            }
            3 => {
                let _ = block_on(ts.session.run_statement(|txn| txn.get(&key)));
            }
            4 => {
                let _ = block_on(ts.session.run_statement(|txn| {
                    txn.stmt_mutation(TableId::new(i64::from(k % 4)))
                        .record_delete_id(i64::from(v));
                    txn.add_dirty_op(DirtyTableOp::DeleteRow {
                        table: TableId::new(i64::from(k % 4)),
                        handle: Handle::new(i64::from(v)),
                    });
                    Ok(())
                }));
            }
            5 => {
                let _ = block_on(ts.session.run_statement(|txn| {
                    txn.set(key, Bytes::from_static(b"x"))?;
                    Err::<(), _>(txnstage_core::CoreError::invalid_operation("abort"))
                }));
            }
            6 => {
                let _ = ts.session.commit_txn();
            }
            7 => {
                ts.session.prepare_txn();
                let _ = ts.session.txn_mut().set(key, Bytes::from(vec![v]));
                let _ = ts.session.stmt_commit();
            }
            _ => {
                let _ = ts.session.rollback_txn();
            }
        }

        let txn = ts.session.txn();
        assert!(txn.buffer().is_empty(), "Write buffer survived a statement");
        assert!(txn.ledger().is_empty(), "Mutation ledger survived a statement");
        assert!(txn.dirty_ops().is_empty(), "Dirty ops survived a statement");
    }
}
