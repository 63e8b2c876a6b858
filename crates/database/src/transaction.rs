//! Transactions and their per-table views.
//!
//! A transaction sees the committed state as of its snapshot commit id. Its
//! writes go to a private journal per table and are replayed onto a private
//! working copy of that table's indices, so later reads in the same
//! transaction see them. Nothing is visible to others until commit.
//!
//! Table names resolve through the transaction's own view of `sys_tables`, so
//! DDL follows the same isolation and conflict rules as row changes.

use crate::catalog::TableEntry;
use crate::conglomerate::{
    CommitRequest, Conglomerate, SnapshotTable, TableChange, TransactionId, SYS_TABLES_ID,
};
use crate::constraint::{CheckScope, ConstraintChecker, ViewSet};
use keel_core::schema::TableSchema;
use keel_core::{CommitId, Error, Result, RowIndex, TableId, Value};
use keel_index::SelectableRange;
use keel_storage::{
    IndexQuery, JournalEntry, MasterTableJournal, MutableRowSet, RootLock, RowSet, TableSnapshot,
};
use std::sync::Arc;
use tracing::{debug, warn};

struct TxnTable {
    view: TableSnapshot,
    journal: MasterTableJournal,
    accessed: bool,
    created: bool,
    dropped: bool,
}

/// An isolated view of the database that collects changes until commit.
///
/// Dropping an open transaction rolls it back.
pub struct Transaction {
    conglomerate: Conglomerate,
    id: TransactionId,
    snapshot: CommitId,
    tables: Vec<TxnTable>,
    root_locks: Vec<RootLock>,
    created: Vec<TableEntry>,
    dropped: Vec<TableEntry>,
    altered: Vec<TableId>,
    closed: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        conglomerate: Conglomerate,
        id: TransactionId,
        snapshot: CommitId,
        snapshot_tables: Vec<SnapshotTable>,
    ) -> Self {
        let mut tables = Vec::with_capacity(snapshot_tables.len());
        let mut root_locks = Vec::with_capacity(snapshot_tables.len());
        for table in snapshot_tables {
            tables.push(TxnTable {
                journal: MasterTableJournal::new(table.view.table_id()),
                view: table.view,
                accessed: false,
                created: false,
                dropped: false,
            });
            root_locks.push(table.root_lock);
        }
        Self {
            conglomerate,
            id,
            snapshot,
            tables,
            root_locks,
            created: Vec::new(),
            dropped: Vec::new(),
            altered: Vec::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Highest commit id visible to this transaction.
    pub fn snapshot_commit_id(&self) -> CommitId {
        self.snapshot
    }

    fn check_active(&self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_operation("transaction is closed"));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Name resolution
    // ---------------------------------------------------------------------

    fn sys_slot(&self) -> Result<usize> {
        self.tables
            .iter()
            .position(|t| t.view.table_id() == SYS_TABLES_ID)
            .ok_or_else(|| Error::consistency("transaction has no sys_tables view"))
    }

    fn table_id_of(&self, name: &str) -> Result<Option<TableId>> {
        let sys = &self.tables[self.sys_slot()?].view;
        let rows = sys.select_equal(1, &Value::String(name.to_string()))?;
        let Some(&row) = rows.first() else {
            return Ok(None);
        };
        let id = sys
            .cell(0, row)?
            .as_i64()
            .and_then(|id| TableId::try_from(id).ok())
            .ok_or_else(|| Error::consistency(format!("sys_tables row {} has a bad table id", row)))?;
        Ok(Some(id))
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        let table_id = self
            .table_id_of(name)?
            .ok_or_else(|| Error::table_not_found(name))?;
        self.tables
            .iter()
            .position(|t| t.view.table_id() == table_id && !t.dropped)
            .ok_or_else(|| {
                Error::consistency(format!("table {} ({}) has no store", name, table_id))
            })
    }

    /// Returns true if this transaction sees a table called `name`.
    pub fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.table_id_of(name)?.is_some())
    }

    /// Names of every table visible to this transaction.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let sys = &self.tables[self.sys_slot()?].view;
        sys.row_indices()
            .into_iter()
            .map(|row| {
                sys.cell(1, row)?
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::consistency(format!("sys_tables row {} has no name", row)))
            })
            .collect()
    }

    /// Returns a read/write view of a table.
    pub fn get_table(&mut self, name: &str) -> Result<MutableTable<'_>> {
        self.check_active()?;
        let slot = self.resolve(name)?;
        self.tables[slot].accessed = true;
        Ok(MutableTable { txn: self, slot })
    }

    /// Returns the next value of a table's unique-id counter. The counter is
    /// not transactional: values are never handed out twice, even on rollback.
    pub fn next_unique_id(&self, name: &str) -> Result<u64> {
        self.check_active()?;
        let slot = self.resolve(name)?;
        self.tables[slot].view.store().next_unique_id()
    }

    // ---------------------------------------------------------------------
    // Row changes
    // ---------------------------------------------------------------------

    fn ensure_working(&mut self, slot: usize) {
        let table = &mut self.tables[slot];
        if table.view.index_set().is_immutable() {
            table.view = table.view.to_working();
        }
    }

    fn view_set(&self) -> ViewSet {
        let mut views = ViewSet::new();
        for table in self.tables.iter().filter(|t| !t.dropped) {
            views.insert(table.view.clone());
        }
        views
    }

    fn check_statement(&self, slot: usize, added: &[RowIndex], removed: &[RowIndex]) -> Result<()> {
        let views = self.view_set();
        let view = &self.tables[slot].view;
        ConstraintChecker::check_removed_rows(view, removed, &views, CheckScope::Immediate)?;
        ConstraintChecker::check_added_rows(view, added, &views, CheckScope::Immediate)
    }

    /// Undoes the journal entries a failed statement appended after `mark`.
    fn compensate(&mut self, slot: usize, mark: usize) -> Result<()> {
        let table = &mut self.tables[slot];
        let tail = table.journal.entries()[mark..].to_vec();
        let mut discarded = MasterTableJournal::new(table.view.table_id());
        for entry in tail.into_iter().rev() {
            match entry {
                JournalEntry::Add(row) => {
                    table.view.apply(JournalEntry::Remove(row))?;
                    discarded.add(row);
                }
                JournalEntry::Remove(row) => table.view.apply(JournalEntry::Add(row))?,
            }
        }
        table.journal.truncate(mark);
        table.view.store().rollback_transaction_change(&discarded)
    }

    fn finish_statement(
        &mut self,
        slot: usize,
        mark: usize,
        added: &[RowIndex],
        removed: &[RowIndex],
    ) -> Result<()> {
        if let Err(e) = self.check_statement(slot, added, removed) {
            self.compensate(slot, mark)?;
            return Err(e);
        }
        Ok(())
    }

    fn require_row(&self, slot: usize, row: RowIndex) -> Result<()> {
        if !self.tables[slot].view.contains_row(row)? {
            return Err(Error::invalid_operation(format!(
                "row {} is not in table {}",
                row,
                self.tables[slot].view.schema().name()
            )));
        }
        Ok(())
    }

    /// Appends a row without running constraint checks.
    fn append_row(&mut self, slot: usize, cells: Vec<Value>) -> Result<RowIndex> {
        let table = &mut self.tables[slot];
        let row = table.view.store().add_row(cells)?;
        table.journal.add(row);
        table.view.apply(JournalEntry::Add(row))?;
        Ok(row)
    }

    fn add_row_at(&mut self, slot: usize, cells: Vec<Value>) -> Result<RowIndex> {
        self.check_active()?;
        self.ensure_working(slot);
        let mark = self.tables[slot].journal.len();
        let row = self.append_row(slot, cells)?;
        self.finish_statement(slot, mark, &[row], &[])?;
        Ok(row)
    }

    fn remove_row_at(&mut self, slot: usize, row: RowIndex) -> Result<()> {
        self.check_active()?;
        self.require_row(slot, row)?;
        self.ensure_working(slot);
        let table = &mut self.tables[slot];
        let mark = table.journal.len();
        table.journal.remove(row);
        table.view.apply(JournalEntry::Remove(row))?;
        self.finish_statement(slot, mark, &[], &[row])
    }

    fn update_row_at(&mut self, slot: usize, row: RowIndex, cells: Vec<Value>) -> Result<RowIndex> {
        self.check_active()?;
        self.require_row(slot, row)?;
        self.ensure_working(slot);
        let table = &mut self.tables[slot];
        let mark = table.journal.len();
        table.journal.remove(row);
        table.view.apply(JournalEntry::Remove(row))?;
        let new_row = match self.append_row(slot, cells) {
            Ok(new_row) => new_row,
            Err(e) => {
                self.compensate(slot, mark)?;
                return Err(e);
            }
        };
        self.finish_statement(slot, mark, &[new_row], &[row])?;
        Ok(new_row)
    }

    // ---------------------------------------------------------------------
    // DDL
    // ---------------------------------------------------------------------

    /// Creates a table, visible to others once this transaction commits.
    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        self.check_active()?;
        self.create_table_at(schema).map(|_| ())
    }

    fn create_table_at(&mut self, schema: TableSchema) -> Result<usize> {
        let name = schema.name().to_string();
        if self.table_id_of(&name)?.is_some() {
            return Err(Error::TableExists { name });
        }
        let sys = self.sys_slot()?;
        let table_id = self.conglomerate.allocate_table_id();
        let store = self.conglomerate.create_store(table_id, schema)?;
        self.tables.push(TxnTable {
            view: TableSnapshot::committed(Arc::clone(&store)).to_working(),
            journal: MasterTableJournal::new(table_id),
            accessed: true,
            created: true,
            dropped: false,
        });
        let slot = self.tables.len() - 1;

        let sys_row = vec![Value::Int64(i64::from(table_id)), Value::String(name.clone())];
        if let Err(e) = self.add_row_at(sys, sys_row) {
            self.tables.pop();
            if let Err(cleanup) = store.delete_files() {
                warn!(table_id, error = %cleanup, "deleting files of failed table failed");
            }
            return Err(e);
        }
        self.created.push(TableEntry::new(table_id, name.as_str()));
        debug!(txn_id = self.id, table_id, name = %name, "created table");
        Ok(slot)
    }

    /// Drops a table. Its files are deleted once no transaction can see it.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.check_active()?;
        let slot = self.resolve(name)?;
        let table_id = self.tables[slot].view.table_id();
        if table_id == SYS_TABLES_ID {
            return Err(Error::invalid_operation("sys_tables cannot be dropped"));
        }
        let sys = self.sys_slot()?;
        let rows = self.tables[sys]
            .view
            .select_equal(0, &Value::Int64(i64::from(table_id)))?;
        let Some(&row) = rows.first() else {
            return Err(Error::consistency(format!(
                "table {} has no sys_tables row",
                name
            )));
        };
        self.remove_row_at(sys, row)?;
        self.tables[slot].dropped = true;
        self.dropped.push(TableEntry::new(table_id, name));
        debug!(txn_id = self.id, table_id, name, "dropped table");
        Ok(())
    }

    /// Replaces the definition of a table, keeping its rows.
    ///
    /// Columns are matched by name; new columns take their default value. The
    /// table name cannot change. Constraints of the new definition are checked
    /// against every row at commit.
    pub fn alter_table(&mut self, name: &str, schema: TableSchema) -> Result<()> {
        self.check_active()?;
        if schema.name() != name {
            return Err(Error::invalid_schema(format!(
                "alter_table cannot rename {} to {}",
                name,
                schema.name()
            )));
        }
        let old_slot = self.resolve(name)?;
        let old = &self.tables[old_slot].view;
        if old.table_id() == SYS_TABLES_ID {
            return Err(Error::invalid_operation("sys_tables cannot be altered"));
        }

        let sources: Vec<Option<usize>> = schema
            .columns()
            .iter()
            .map(|c| old.schema().get_column_index(c.name()))
            .collect();
        let mut rows = Vec::with_capacity(old.row_count());
        for row in old.row_indices() {
            let mut cells = sources
                .iter()
                .zip(schema.columns())
                .map(|(source, column)| match source {
                    Some(i) => old.cell(*i, row),
                    None => Ok(column.get_default_value()),
                })
                .collect::<Result<Vec<_>>>()?;
            schema.coerce_row(&mut cells)?;
            rows.push(cells);
        }

        self.drop_table(name)?;
        let slot = self.create_table_at(schema)?;
        let copied = rows.len();
        for cells in rows {
            self.append_row(slot, cells)?;
        }
        let table_id = self.tables[slot].view.table_id();
        self.altered.push(table_id);
        debug!(txn_id = self.id, table_id, name, copied, "altered table");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------------

    fn take_request(&mut self) -> CommitRequest {
        self.closed = true;
        let changes = std::mem::take(&mut self.tables)
            .into_iter()
            .map(|t| TableChange {
                store: Arc::clone(t.view.store()),
                journal: t.journal,
                accessed: t.accessed,
                created: t.created,
                dropped: t.dropped,
            })
            .collect();
        CommitRequest {
            txn_id: self.id,
            snapshot: self.snapshot,
            changes,
            created: std::mem::take(&mut self.created),
            dropped: std::mem::take(&mut self.dropped),
            altered: std::mem::take(&mut self.altered),
        }
    }

    /// Releases root locks and unregisters the transaction.
    fn finish(&mut self) {
        self.root_locks.clear();
        self.conglomerate.close_transaction(self.id);
    }

    /// Validates and commits every change. On error nothing is committed and
    /// the transaction is closed.
    pub fn commit(mut self) -> Result<CommitId> {
        self.check_active()?;
        let request = self.take_request();
        let result = self.conglomerate.process_commit(request);
        self.finish();
        result
    }

    /// Discards every change.
    pub fn rollback(mut self) -> Result<()> {
        self.check_active()?;
        let request = self.take_request();
        let result = self.conglomerate.process_rollback(request);
        self.finish();
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let request = self.take_request();
        if let Err(e) = self.conglomerate.process_rollback(request) {
            warn!(txn_id = self.id, error = %e, "rollback of dropped transaction failed");
        }
        self.finish();
    }
}

/// One table as seen and changed by a transaction.
pub struct MutableTable<'a> {
    txn: &'a mut Transaction,
    slot: usize,
}

impl MutableTable<'_> {
    fn table(&self) -> &TxnTable {
        &self.txn.tables[self.slot]
    }

    pub fn name(&self) -> &str {
        self.table().view.schema().name()
    }

    pub fn table_id(&self) -> TableId {
        self.table().view.table_id()
    }

    /// The transaction's current view of the table, for the full set of
    /// selections.
    pub fn view(&self) -> &TableSnapshot {
        &self.table().view
    }

    /// Reads a whole row.
    pub fn row(&self, row: RowIndex) -> Result<Vec<Value>> {
        (0..self.column_count())
            .map(|column| self.cell(column, row))
            .collect()
    }

    /// Builds an index over `rows` ordered by `column`.
    pub fn derive_subset_index(
        &self,
        column: usize,
        rows: &[RowIndex],
    ) -> Result<keel_index::SortedIndex> {
        self.table().view.derive_subset_index(column, rows)
    }
}

impl RowSet for MutableTable<'_> {
    fn schema(&self) -> &TableSchema {
        self.table().view.schema()
    }

    fn row_count(&self) -> usize {
        self.table().view.row_count()
    }

    fn row_indices(&self) -> Vec<RowIndex> {
        self.table().view.row_indices()
    }

    fn cell(&self, column: usize, row: RowIndex) -> Result<Value> {
        self.table().view.cell(column, row)
    }
}

impl MutableRowSet for MutableTable<'_> {
    fn add_row(&mut self, cells: Vec<Value>) -> Result<RowIndex> {
        self.txn.add_row_at(self.slot, cells)
    }

    fn remove_row(&mut self, row: RowIndex) -> Result<()> {
        self.txn.remove_row_at(self.slot, row)
    }

    fn update_row(&mut self, row: RowIndex, cells: Vec<Value>) -> Result<RowIndex> {
        self.txn.update_row_at(self.slot, row, cells)
    }

    fn journal(&self) -> &MasterTableJournal {
        &self.table().journal
    }
}

impl IndexQuery for MutableTable<'_> {
    fn select_equal(&self, column: usize, value: &Value) -> Result<Vec<RowIndex>> {
        self.table().view.select_equal(column, value)
    }

    fn select_range(&self, column: usize, range: &SelectableRange) -> Result<Vec<RowIndex>> {
        self.table().view.select_range(column, range)
    }

    fn select_first(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.table().view.select_first(column)
    }

    fn select_last(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.table().view.select_last(column)
    }

    fn select_rest(&self, column: usize) -> Result<Vec<RowIndex>> {
        self.table().view.select_rest(column)
    }
}
