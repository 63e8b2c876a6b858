//! Row-set and index-query interfaces over table stores.
//!
//! These are the two seams through which query operators read tables. A
//! [`TableSnapshot`] pairs a store with an index set and implements both.

use crate::index_set::IndexSet;
use crate::journal::{JournalEntry, MasterTableJournal};
use crate::master_table::{ColumnComparator, MasterTableStore};
use keel_core::schema::TableSchema;
use keel_core::{Result, RowIndex, TableId, Value};
use keel_index::{KeyRange, SelectableRange, SortedIndex};
use std::cmp::Ordering;
use std::sync::Arc;

/// Read access to a set of rows with typed cells.
pub trait RowSet {
    fn schema(&self) -> &TableSchema;

    fn column_count(&self) -> usize {
        self.schema().column_count()
    }

    fn row_count(&self) -> usize;

    /// Row indices in ascending order.
    fn row_indices(&self) -> Vec<RowIndex>;

    fn cell(&self, column: usize, row: RowIndex) -> Result<Value>;

    /// Compares `value` against the cell at (column, row).
    fn compare_cell(&self, value: &Value, column: usize, row: RowIndex) -> Result<Ordering> {
        Ok(value.cmp(&self.cell(column, row)?))
    }
}

/// A row set that records changes in a journal.
pub trait MutableRowSet: RowSet {
    fn add_row(&mut self, cells: Vec<Value>) -> Result<RowIndex>;

    fn remove_row(&mut self, row: RowIndex) -> Result<()>;

    /// Replaces a row, returning the index of the new row.
    fn update_row(&mut self, row: RowIndex, cells: Vec<Value>) -> Result<RowIndex>;

    fn journal(&self) -> &MasterTableJournal;
}

/// Equality and range selection over one column.
pub trait IndexQuery {
    fn select_equal(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>>;

    fn select_range(&self, column: usize, range: &SelectableRange) -> Result<Vec<RowIndex>>;

    fn select_key_range(&self, column: usize, range: KeyRange) -> Result<Vec<RowIndex>> {
        self.select_range(column, &range.into())
    }

    fn select_first(&self, column: usize) -> Result<Vec<RowIndex>>;

    fn select_last(&self, column: usize) -> Result<Vec<RowIndex>>;

    fn select_rest(&self, column: usize) -> Result<Vec<RowIndex>>;
}

/// A table store seen through one index set.
#[derive(Clone, Debug)]
pub struct TableSnapshot {
    store: Arc<MasterTableStore>,
    index_set: IndexSet,
}

impl TableSnapshot {
    pub fn new(store: Arc<MasterTableStore>, index_set: IndexSet) -> Self {
        Self { store, index_set }
    }

    /// Snapshot of the store's committed state.
    pub fn committed(store: Arc<MasterTableStore>) -> Self {
        let index_set = store.snapshot_index_set();
        Self { store, index_set }
    }

    #[inline]
    pub fn store(&self) -> &Arc<MasterTableStore> {
        &self.store
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.store.table_id()
    }

    #[inline]
    pub fn index_set(&self) -> &IndexSet {
        &self.index_set
    }

    /// Returns a snapshot with a mutable copy of the index set.
    pub fn to_working(&self) -> TableSnapshot {
        TableSnapshot {
            store: Arc::clone(&self.store),
            index_set: self.index_set.copy(false),
        }
    }

    /// Applies a journal entry to the index set.
    pub fn apply(&mut self, entry: JournalEntry) -> Result<()> {
        self.store.apply_entry(&mut self.index_set, entry)
    }

    /// Returns true if `row` is in the set.
    pub fn contains_row(&self, row: RowIndex) -> Result<bool> {
        self.index_set.master().contains(row, &keel_index::RowOrder)
    }

    /// Returns the sorted index of a column.
    pub fn column_index(&self, column: usize) -> Result<&SortedIndex> {
        self.index_set.column(column)
    }

    /// Builds an index over `rows` ordered by `column`.
    pub fn derive_subset_index(&self, column: usize, rows: &[RowIndex]) -> Result<SortedIndex> {
        self.store.derive_subset_index(column, rows)
    }

    fn with_column<R>(
        &self,
        column: usize,
        f: impl FnOnce(&SortedIndex, &ColumnComparator<'_>) -> Result<R>,
    ) -> Result<R> {
        let index = self.index_set.column(column)?;
        f(index, &ColumnComparator::new(&self.store, column))
    }

    pub fn select_all(&self, column: usize) -> Result<Vec<RowIndex>> {
        Ok(self.index_set.column(column)?.select_all())
    }

    pub fn select_not_equal(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_not_equal(value, c))
    }

    pub fn select_less(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_less(value, c))
    }

    pub fn select_less_or_equal(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_less_or_equal(value, c))
    }

    pub fn select_greater(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_greater(value, c))
    }

    pub fn select_greater_or_equal(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_greater_or_equal(value, c))
    }

    pub fn select_between(&self, column: usize, low: &Value, high: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_between(low, high, c))
    }

    pub fn select_not_last(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_not_last(c))
    }

    pub fn select_ranges(&self, column: usize, ranges: &[SelectableRange]) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_ranges(ranges, c))
    }
}

impl RowSet for TableSnapshot {
    fn schema(&self) -> &TableSchema {
        self.store.schema()
    }

    fn row_count(&self) -> usize {
        self.index_set.row_count()
    }

    fn row_indices(&self) -> Vec<RowIndex> {
        self.index_set.rows()
    }

    fn cell(&self, column: usize, row: RowIndex) -> Result<Value> {
        self.store.get_cell_contents(column, row)
    }
}

impl IndexQuery for TableSnapshot {
    fn select_equal(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_equal(value, c))
    }

    fn select_range(&self, column: usize, range: &SelectableRange) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_range(range, c))
    }

    fn select_first(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_first(c))
    }

    fn select_last(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_last(c))
    }

    fn select_rest(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.with_column(column, |i, c| i.select_rest(c))
    }
}
