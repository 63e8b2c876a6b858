//! Point-in-time collection of one table's indices.

use keel_core::{Error, Result, RowIndex, TableId};
use keel_index::SortedIndex;

/// The master row-existence index plus one sorted index per column.
///
/// Sets handed out by a store are immutable copies that share storage with the
/// committed state. Writers take a mutable copy and replay their journal on it.
#[derive(Clone, Debug)]
pub struct IndexSet {
    table_id: TableId,
    master: SortedIndex,
    columns: Vec<SortedIndex>,
}

impl IndexSet {
    /// Creates an empty set for a table with `column_count` columns.
    pub fn empty(table_id: TableId, column_count: usize) -> Self {
        Self {
            table_id,
            master: SortedIndex::new(),
            columns: (0..column_count).map(|_| SortedIndex::new()).collect(),
        }
    }

    pub fn new(table_id: TableId, master: SortedIndex, columns: Vec<SortedIndex>) -> Self {
        Self {
            table_id,
            master,
            columns,
        }
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the master index, ordered by row index.
    #[inline]
    pub fn master(&self) -> &SortedIndex {
        &self.master
    }

    #[inline]
    pub fn master_mut(&mut self) -> &mut SortedIndex {
        &mut self.master
    }

    /// Returns the number of committed rows visible through this set.
    #[inline]
    pub fn row_count(&self) -> usize {
        self.master.len()
    }

    /// Returns the rows of the set in ascending row-index order.
    pub fn rows(&self) -> Vec<RowIndex> {
        self.master.to_vec()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the index of `column`.
    pub fn column(&self, column: usize) -> Result<&SortedIndex> {
        self.columns.get(column).ok_or_else(|| {
            Error::invalid_operation(format!(
                "column {} out of range for table {}",
                column, self.table_id
            ))
        })
    }

    pub fn column_mut(&mut self, column: usize) -> Result<&mut SortedIndex> {
        let table_id = self.table_id;
        self.columns.get_mut(column).ok_or_else(|| {
            Error::invalid_operation(format!(
                "column {} out of range for table {}",
                column, table_id
            ))
        })
    }

    pub fn columns(&self) -> &[SortedIndex] {
        &self.columns
    }

    /// Copies every index in the set.
    pub fn copy(&self, immutable: bool) -> IndexSet {
        IndexSet {
            table_id: self.table_id,
            master: self.master.copy(immutable),
            columns: self.columns.iter().map(|c| c.copy(immutable)).collect(),
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.master.is_immutable()
    }

    /// Fails if any index of an immutable set changed size since it was copied.
    pub fn verify_unchanged(&self) -> Result<()> {
        self.master.verify_unchanged()?;
        for column in &self.columns {
            column.verify_unchanged()?;
        }
        Ok(())
    }
}
