//! Change journal for one table within one transaction.
//!
//! A [`MasterTableJournal`] is the ordered list of row additions and removals a
//! transaction made to one table. Once committed it is frozen, tagged with its
//! commit id, and kept by the store so later commits can scan it for clashes.

use hashbrown::HashSet;
use keel_core::{CommitId, Error, Result, RowIndex, TableId};

/// A single journal entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JournalEntry {
    /// A row was added.
    Add(RowIndex),
    /// A row was removed.
    Remove(RowIndex),
}

impl JournalEntry {
    /// Returns the row this entry refers to.
    #[inline]
    pub fn row(&self) -> RowIndex {
        match self {
            JournalEntry::Add(row) | JournalEntry::Remove(row) => *row,
        }
    }

    #[inline]
    pub fn is_add(&self) -> bool {
        matches!(self, JournalEntry::Add(_))
    }
}

/// Ordered add/remove log for one table.
#[derive(Clone, Debug, Default)]
pub struct MasterTableJournal {
    table_id: TableId,
    commit_id: Option<CommitId>,
    entries: Vec<JournalEntry>,
}

impl MasterTableJournal {
    /// Creates an empty journal.
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            commit_id: None,
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Returns the commit id assigned when the journal was committed.
    #[inline]
    pub fn commit_id(&self) -> Option<CommitId> {
        self.commit_id
    }

    pub(crate) fn set_commit_id(&mut self, commit_id: CommitId) {
        self.commit_id = Some(commit_id);
    }

    /// Records an addition.
    pub fn add(&mut self, row: RowIndex) {
        self.entries.push(JournalEntry::Add(row));
    }

    /// Records a removal.
    ///
    /// A row added by this journal may be removed again, but never before it
    /// was added.
    pub fn remove(&mut self, row: RowIndex) {
        self.entries.push(JournalEntry::Remove(row));
    }

    /// Returns all entries in order.
    #[inline]
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry after the first `len`.
    ///
    /// Used to compensate a statement that failed its immediate checks.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Returns rows added and still present at the end of the journal.
    pub fn added_rows(&self) -> Vec<RowIndex> {
        let removed: HashSet<RowIndex> = self
            .entries
            .iter()
            .filter(|e| !e.is_add())
            .map(JournalEntry::row)
            .collect();
        self.entries
            .iter()
            .filter(|e| e.is_add() && !removed.contains(&e.row()))
            .map(JournalEntry::row)
            .collect()
    }

    /// Returns pre-existing rows removed by the journal.
    pub fn removed_rows(&self) -> Vec<RowIndex> {
        let added: HashSet<RowIndex> = self
            .entries
            .iter()
            .filter(|e| e.is_add())
            .map(JournalEntry::row)
            .collect();
        self.entries
            .iter()
            .filter(|e| !e.is_add() && !added.contains(&e.row()))
            .map(JournalEntry::row)
            .collect()
    }

    /// Returns true if both journals touch a common row.
    pub fn clashes_with(&self, other: &MasterTableJournal) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let rows: HashSet<RowIndex> = small.entries.iter().map(JournalEntry::row).collect();
        large.entries.iter().any(|e| rows.contains(&e.row()))
    }

    /// Fails with `ConsistencyAssertion` if a row is removed before it is added.
    pub fn check_order(&self) -> Result<()> {
        let mut removed = HashSet::new();
        for entry in &self.entries {
            match entry {
                JournalEntry::Add(row) => {
                    if removed.contains(row) {
                        return Err(Error::consistency(format!(
                            "row {} of table {} added after its removal",
                            row, self.table_id
                        )));
                    }
                }
                JournalEntry::Remove(row) => {
                    removed.insert(*row);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_changes() {
        let mut journal = MasterTableJournal::new(1);
        journal.add(10);
        journal.remove(3);
        journal.add(11);
        journal.remove(10);
        assert_eq!(journal.added_rows(), vec![11]);
        assert_eq!(journal.removed_rows(), vec![3]);
        assert_eq!(journal.len(), 4);
    }

    #[test]
    fn test_truncate_compensates() {
        let mut journal = MasterTableJournal::new(1);
        journal.add(1);
        let mark = journal.len();
        journal.remove(5);
        journal.add(6);
        journal.truncate(mark);
        assert_eq!(journal.entries(), &[JournalEntry::Add(1)]);
    }

    #[test]
    fn test_clashes() {
        let mut a = MasterTableJournal::new(1);
        a.remove(4);
        a.add(9);
        let mut b = MasterTableJournal::new(1);
        b.add(12);
        assert!(!a.clashes_with(&b));
        b.remove(4);
        assert!(a.clashes_with(&b));
        assert!(b.clashes_with(&a));
    }

    #[test]
    fn test_check_order() {
        let mut journal = MasterTableJournal::new(2);
        journal.add(1);
        journal.remove(1);
        journal.check_order().unwrap();
        journal.add(1);
        assert!(journal.check_order().is_err());
    }
}
