//! Replication (binlog) mutation ledger.
//!
//! Statements record their row-level changes per table in a
//! [`TableMutation`]. The statement-scoped ledger is merged into the
//! session-wide [`BinlogPrewrite`] only when the statement commits.

use crate::types::TableId;
use std::collections::HashMap;
use txnstage_kv::Bytes;

/// Kind of a recorded row change, kept in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted by handle.
    DeleteId,
    /// A row was deleted by primary key.
    DeletePk,
    /// A row was deleted with its full image.
    DeleteRow,
}

/// Accumulated row deltas of one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMutation {
    /// Table the deltas belong to.
    pub table_id: i64,
    /// Encoded inserted rows.
    pub inserted_rows: Vec<Bytes>,
    /// Encoded updated rows (old and new image).
    pub updated_rows: Vec<Bytes>,
    /// Handles of deleted rows.
    pub deleted_ids: Vec<i64>,
    /// Encoded primary keys of deleted rows.
    pub deleted_pks: Vec<Bytes>,
    /// Encoded images of deleted rows.
    pub deleted_rows: Vec<Bytes>,
    /// Order in which the deltas above were recorded.
    pub sequence: Vec<MutationType>,
}

impl TableMutation {
    /// Creates an empty mutation for a table.
    #[must_use]
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id: table_id.as_i64(),
            ..Self::default()
        }
    }

    /// Records an inserted row.
    pub fn record_insert(&mut self, row: Bytes) {
        self.inserted_rows.push(row);
        self.sequence.push(MutationType::Insert);
    }

    /// Records an updated row.
    pub fn record_update(&mut self, row: Bytes) {
        self.updated_rows.push(row);
        self.sequence.push(MutationType::Update);
    }

    /// Records a row deleted by handle.
    pub fn record_delete_id(&mut self, id: i64) {
        self.deleted_ids.push(id);
        self.sequence.push(MutationType::DeleteId);
    }

    /// Records a row deleted by primary key.
    pub fn record_delete_pk(&mut self, pk: Bytes) {
        self.deleted_pks.push(pk);
        self.sequence.push(MutationType::DeletePk);
    }

    /// Records a deleted row image.
    pub fn record_delete_row(&mut self, row: Bytes) {
        self.deleted_rows.push(row);
        self.sequence.push(MutationType::DeleteRow);
    }

    /// Returns true if no delta has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Appends every delta of `src` to `dst`, field by field.
///
/// Order within each field is preserved; nothing is reordered or deduplicated.
pub fn merge_mutation(dst: &mut TableMutation, src: &TableMutation) {
    dst.inserted_rows.extend_from_slice(&src.inserted_rows);
    dst.updated_rows.extend_from_slice(&src.updated_rows);
    dst.deleted_ids.extend_from_slice(&src.deleted_ids);
    dst.deleted_pks.extend_from_slice(&src.deleted_pks);
    dst.deleted_rows.extend_from_slice(&src.deleted_rows);
    dst.sequence.extend_from_slice(&src.sequence);
}

/// Statement-scoped mutations keyed by table.
#[derive(Debug, Clone, Default)]
pub struct MutationLedger {
    tables: HashMap<TableId, TableMutation>,
}

impl MutationLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutation of a table, creating it on first use.
    pub fn get_or_create_mutation(&mut self, table_id: TableId) -> &mut TableMutation {
        self.tables
            .entry(table_id)
            .or_insert_with(|| TableMutation::new(table_id))
    }

    /// Iterates the recorded tables in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&TableId, &TableMutation)> {
        self.tables.iter()
    }

    /// Returns the number of tables with a mutation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table has a mutation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Removes every mutation.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

/// Session-wide replication payload of the current transaction.
///
/// Tables appear in the order they were first merged.
#[derive(Debug, Clone, Default)]
pub struct BinlogPrewrite {
    /// Per-table mutations.
    pub mutations: Vec<TableMutation>,
}

impl BinlogPrewrite {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutation of a table, appending an empty one on first use.
    pub fn get_or_create_mutation(&mut self, table_id: TableId) -> &mut TableMutation {
        let idx = match self
            .mutations
            .iter()
            .position(|m| m.table_id == table_id.as_i64())
        {
            Some(idx) => idx,
            None => {
                self.mutations.push(TableMutation::new(table_id));
                self.mutations.len() - 1
            }
        };
        &mut self.mutations[idx]
    }

    /// Returns the mutation of a table, if any.
    #[must_use]
    pub fn mutation(&self, table_id: TableId) -> Option<&TableMutation> {
        self.mutations
            .iter()
            .find(|m| m.table_id == table_id.as_i64())
    }

    /// Merges a statement ledger into this payload.
    pub fn merge_ledger(&mut self, ledger: &MutationLedger) {
        for (table_id, delta) in ledger.iter() {
            merge_mutation(self.get_or_create_mutation(*table_id), delta);
        }
    }

    /// Returns true if nothing has been merged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Removes every mutation.
    pub fn clear(&mut self) {
        self.mutations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn merge_preserves_field_order() {
        let mut dst = TableMutation::new(TableId::new(1));
        dst.record_insert(row("a"));
        dst.record_insert(row("b"));

        let mut src = TableMutation::new(TableId::new(1));
        src.record_insert(row("c"));

        merge_mutation(&mut dst, &src);
        assert_eq!(dst.inserted_rows, vec![row("a"), row("b"), row("c")]);
        assert_eq!(dst.sequence, vec![MutationType::Insert; 3]);
    }

    #[test]
    fn merge_is_per_field_not_global() {
        let mut dst = TableMutation::new(TableId::new(1));
        dst.record_delete_id(10);

        let mut src = TableMutation::new(TableId::new(1));
        src.record_update(row("u"));
        src.record_delete_id(11);
        src.record_delete_id(11);

        merge_mutation(&mut dst, &src);
        assert_eq!(dst.deleted_ids, vec![10, 11, 11]);
        assert_eq!(dst.updated_rows, vec![row("u")]);
        assert_eq!(
            dst.sequence,
            vec![
                MutationType::DeleteId,
                MutationType::Update,
                MutationType::DeleteId,
                MutationType::DeleteId
            ]
        );
    }

    #[test]
    fn ledger_get_or_create_is_idempotent() {
        let mut ledger = MutationLedger::new();
        ledger
            .get_or_create_mutation(TableId::new(5))
            .record_insert(row("x"));
        ledger
            .get_or_create_mutation(TableId::new(5))
            .record_insert(row("y"));

        assert_eq!(ledger.len(), 1);
        let (_, m) = ledger.iter().next().unwrap();
        assert_eq!(m.table_id, 5);
        assert_eq!(m.inserted_rows.len(), 2);
    }

    #[test]
    fn prewrite_merges_ledgers_in_sequence() {
        let mut prewrite = BinlogPrewrite::new();

        let mut first = MutationLedger::new();
        first.get_or_create_mutation(TableId::new(1)).record_insert(row("a"));
        first.get_or_create_mutation(TableId::new(1)).record_insert(row("b"));
        prewrite.merge_ledger(&first);

        let mut second = MutationLedger::new();
        second.get_or_create_mutation(TableId::new(1)).record_insert(row("c"));
        second
            .get_or_create_mutation(TableId::new(2))
            .record_delete_pk(row("pk"));
        prewrite.merge_ledger(&second);

        let t1 = prewrite.mutation(TableId::new(1)).unwrap();
        assert_eq!(t1.inserted_rows, vec![row("a"), row("b"), row("c")]);
        let t2 = prewrite.mutation(TableId::new(2)).unwrap();
        assert_eq!(t2.deleted_pks, vec![row("pk")]);
        assert_eq!(prewrite.mutations.len(), 2);
    }

    #[test]
    fn empty_mutation() {
        let m = TableMutation::new(TableId::new(3));
        assert!(m.is_empty());
        assert_eq!(m.table_id, 3);
    }
}
