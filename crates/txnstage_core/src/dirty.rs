//! Dirty-row cache operations.
//!
//! Statements stage [`DirtyTableOp`]s while they execute. The operations are
//! applied to the session's [`RowCache`] only when the statement commits and
//! are dropped when it rolls back.

use crate::types::{Handle, Row, TableId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A staged operation on the dirty-row cache.
#[derive(Debug, Clone, PartialEq)]
pub enum DirtyTableOp {
    /// A row was added (inserted or rewritten).
    AddRow {
        /// Table of the row.
        table: TableId,
        /// Handle of the row.
        handle: Handle,
        /// Full row image.
        row: Row,
    },
    /// A row was deleted.
    DeleteRow {
        /// Table of the row.
        table: TableId,
        /// Handle of the row.
        handle: Handle,
    },
    /// The whole table was truncated.
    Truncate {
        /// The truncated table.
        table: TableId,
    },
}

impl DirtyTableOp {
    /// Returns the table the operation applies to.
    #[must_use]
    pub fn table(&self) -> TableId {
        match self {
            Self::AddRow { table, .. } | Self::DeleteRow { table, .. } | Self::Truncate { table } => {
                *table
            }
        }
    }
}

/// Sink for committed row changes, read by executors that must see the
/// transaction's own uncommitted rows.
pub trait RowCache {
    /// Records an added row.
    fn add_row(&mut self, table: TableId, handle: Handle, row: Row);

    /// Records a deleted row.
    fn delete_row(&mut self, table: TableId, handle: Handle);

    /// Records a table truncation. Truncating twice is harmless.
    fn truncate_table(&mut self, table: TableId);
}

/// Applies one staged operation to a cache.
pub fn merge_dirty_op(cache: &mut dyn RowCache, op: DirtyTableOp) {
    match op {
        DirtyTableOp::AddRow { table, handle, row } => cache.add_row(table, handle, row),
        DirtyTableOp::DeleteRow { table, handle } => cache.delete_row(table, handle),
        DirtyTableOp::Truncate { table } => cache.truncate_table(table),
    }
}

/// Uncommitted row state of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirtyTable {
    /// Rows added by the transaction, by handle.
    pub added_rows: BTreeMap<Handle, Row>,
    /// Handles deleted by the transaction. A handle that is also in
    /// `added_rows` was deleted and then written again.
    pub deleted_rows: BTreeSet<Handle>,
    /// Whether the table was truncated.
    pub truncated: bool,
}

/// In-memory [`RowCache`] holding the transaction's dirty tables.
#[derive(Debug, Clone, Default)]
pub struct DirtyDb {
    tables: HashMap<TableId, DirtyTable>,
}

impl DirtyDb {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the dirty state of a table, if it has any.
    #[must_use]
    pub fn table(&self, table: TableId) -> Option<&DirtyTable> {
        self.tables.get(&table)
    }

    /// Returns the number of dirty tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table is dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drops all dirty state.
    pub fn clear(&mut self) {
        self.tables.clear();
    }

    fn table_mut(&mut self, table: TableId) -> &mut DirtyTable {
        self.tables.entry(table).or_default()
    }
}

impl RowCache for DirtyDb {
    fn add_row(&mut self, table: TableId, handle: Handle, row: Row) {
        self.table_mut(table).added_rows.insert(handle, row);
    }

    fn delete_row(&mut self, table: TableId, handle: Handle) {
        let dirty = self.table_mut(table);
        dirty.added_rows.remove(&handle);
        dirty.deleted_rows.insert(handle);
    }

    fn truncate_table(&mut self, table: TableId) {
        let dirty = self.table_mut(table);
        dirty.added_rows.clear();
        dirty.deleted_rows.clear();
        dirty.truncated = true;
    }
}
