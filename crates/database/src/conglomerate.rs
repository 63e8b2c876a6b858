//! The conglomerate: every table of one database plus the commit protocol.
//!
//! Transactions run against private journals and index copies without any
//! shared lock. Only validation and merge of a finished transaction run under
//! the single commit lock, which makes commits serializable:
//!
//! 1. strict mode only: tables that were read must be unchanged since the snapshot
//! 2. written tables must still exist and share no row with later journals
//! 3. tables created and dropped by the transaction are reconciled
//! 4. altered tables have every row re-checked
//! 5. journals are replayed on the latest indices and every constraint checked
//! 6. stores merge their journals, then the catalog write makes the commit durable
//!
//! A failure before step 6 rolls every journal back and leaves durable state
//! untouched.

use crate::catalog::{Catalog, TableEntry};
use crate::config::DatabaseConfig;
use crate::constraint::{CheckScope, ConstraintChecker, ViewSet};
use crate::lock_file::LockFile;
use crate::state_store::{StateStore, STATE_FILE};
use crate::transaction::Transaction;
use keel_core::schema::{TableBuilder, TableSchema};
use keel_core::{CommitId, ConflictKind, DataType, Error, Result, TableId, Value};
use keel_storage::{
    delete_table_files, stored_table_ids, CellCache, IndexSet, MasterTableJournal,
    MasterTableStore, RepairReport, RootLock, RowSet, TableSnapshot, TableStatsSnapshot,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Identifier of an open transaction.
pub type TransactionId = u64;

/// Name of the system catalog table.
pub const SYS_TABLES: &str = "sys_tables";

/// Table id of the system catalog table.
pub const SYS_TABLES_ID: TableId = 0;

/// Schema of `sys_tables`: one row per visible table.
pub fn sys_tables_schema() -> Result<TableSchema> {
    TableBuilder::new(SYS_TABLES)?
        .add_column("table_id", DataType::Int64)?
        .add_column("name", DataType::String)?
        .add_primary_key(&["table_id"])?
        .add_unique("uq_sys_tables_name", &["name"])?
        .build()
}

/// What one transaction did to one table.
#[derive(Debug)]
pub(crate) struct TableChange {
    pub store: Arc<MasterTableStore>,
    pub journal: MasterTableJournal,
    pub accessed: bool,
    pub created: bool,
    pub dropped: bool,
}

/// Everything a finished transaction hands to the conglomerate.
#[derive(Debug)]
pub(crate) struct CommitRequest {
    pub txn_id: TransactionId,
    pub snapshot: CommitId,
    pub changes: Vec<TableChange>,
    pub created: Vec<TableEntry>,
    pub dropped: Vec<TableEntry>,
    pub altered: Vec<TableId>,
}

/// A table as handed to a new transaction.
pub(crate) struct SnapshotTable {
    pub view: TableSnapshot,
    pub root_lock: RootLock,
}

struct CommitState {
    state_store: StateStore,
    catalog: Catalog,
    tables: BTreeMap<TableId, Arc<MasterTableStore>>,
    pending_drop: Vec<Arc<MasterTableStore>>,
}

struct Inner {
    config: DatabaseConfig,
    cache: Arc<CellCache>,
    commit: Mutex<CommitState>,
    open_transactions: Mutex<BTreeMap<TransactionId, CommitId>>,
    next_transaction_id: AtomicU64,
    next_table_id: AtomicU32,
    poisoned: AtomicBool,
    closed: AtomicBool,
    lock_file: Mutex<Option<LockFile>>,
}

/// Handle to an open database. Cheap to clone.
#[derive(Clone)]
pub struct Conglomerate {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Conglomerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conglomerate")
            .field("dir", &self.inner.config.dir)
            .finish()
    }
}

impl Conglomerate {
    /// Creates a new database in `config.dir`.
    pub fn create(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir)?;
        let lock_file = LockFile::acquire(&config.dir)?;
        let state_path = config.dir.join(STATE_FILE);
        if state_path.exists() {
            return Err(Error::invalid_operation(format!(
                "a database already exists in {}",
                config.dir.display()
            )));
        }
        let mut state_store = StateStore::create(&state_path, config.sync_writes)?;
        let cache = Arc::new(CellCache::new(config.cell_cache_capacity));

        let sys = MasterTableStore::create(
            &config.dir,
            SYS_TABLES_ID,
            sys_tables_schema()?,
            Arc::clone(&cache),
            config.store_options(),
        )?;
        let mut journal = MasterTableJournal::new(SYS_TABLES_ID);
        journal.add(sys.add_row(vec![
            Value::Int64(i64::from(SYS_TABLES_ID)),
            Value::String(SYS_TABLES.to_string()),
        ])?);
        let mut set = sys.latest_index_set();
        sys.replay_journal(&mut set, journal.entries())?;
        sys.commit_transaction_change(1, journal, set)?;

        let catalog = Catalog {
            visible: vec![TableEntry::new(SYS_TABLES_ID, SYS_TABLES)],
            dropped: Vec::new(),
            commit_id: 1,
            next_table_id: SYS_TABLES_ID + 1,
        };
        catalog.store(&mut state_store)?;
        info!(dir = %config.dir.display(), "created database");

        let mut tables = BTreeMap::new();
        tables.insert(SYS_TABLES_ID, sys);
        Ok(Self::assemble(config, cache, lock_file, state_store, catalog, tables))
    }

    /// Opens an existing database, recovering every visible table.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let lock_file = LockFile::acquire(&config.dir)?;
        let mut state_store = StateStore::open(&config.dir.join(STATE_FILE), config.sync_writes)?;
        let mut catalog = Catalog::load(&mut state_store)?;
        if catalog.find_visible(SYS_TABLES).is_none() {
            return Err(Error::format("catalog has no sys_tables entry"));
        }
        let cache = Arc::new(CellCache::new(config.cell_cache_capacity));

        let mut tables = BTreeMap::new();
        for entry in &catalog.visible {
            let store = MasterTableStore::open(
                &config.dir,
                entry.table_id,
                catalog.commit_id,
                Arc::clone(&cache),
                config.store_options(),
            )?;
            tables.insert(entry.table_id, store);
        }

        // Dropped tables and tables created by transactions that never committed.
        for table_id in stored_table_ids(&config.dir)? {
            if !tables.contains_key(&table_id) {
                delete_table_files(&config.dir, table_id)?;
                debug!(table_id, "deleted files of unreferenced table");
            }
        }
        if !catalog.dropped.is_empty() {
            catalog.dropped.clear();
            catalog.store(&mut state_store)?;
        }
        if let Some(max) = tables.keys().max() {
            catalog.next_table_id = catalog.next_table_id.max(max + 1);
        }

        info!(
            dir = %config.dir.display(),
            commit_id = catalog.commit_id,
            tables = tables.len(),
            "opened database"
        );
        Ok(Self::assemble(config, cache, lock_file, state_store, catalog, tables))
    }

    /// Opens the database in `config.dir`, creating it if none exists.
    pub fn open_or_create(config: DatabaseConfig) -> Result<Self> {
        if config.dir.join(STATE_FILE).exists() {
            Self::open(config)
        } else {
            Self::create(config)
        }
    }

    fn assemble(
        config: DatabaseConfig,
        cache: Arc<CellCache>,
        lock_file: LockFile,
        state_store: StateStore,
        catalog: Catalog,
        tables: BTreeMap<TableId, Arc<MasterTableStore>>,
    ) -> Self {
        let next_table_id = catalog.next_table_id;
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                commit: Mutex::new(CommitState {
                    state_store,
                    catalog,
                    tables,
                    pending_drop: Vec::new(),
                }),
                open_transactions: Mutex::new(BTreeMap::new()),
                next_transaction_id: AtomicU64::new(1),
                next_table_id: AtomicU32::new(next_table_id),
                poisoned: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                lock_file: Mutex::new(Some(lock_file)),
            }),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Id of the last committed transaction.
    pub fn commit_id(&self) -> CommitId {
        self.inner.commit.lock().catalog.commit_id
    }

    /// Names of every committed table.
    pub fn table_names(&self) -> Vec<String> {
        let state = self.inner.commit.lock();
        state.catalog.visible.iter().map(|e| e.name.clone()).collect()
    }

    /// Statistics of a committed table.
    pub fn table_stats(&self, name: &str) -> Result<TableStatsSnapshot> {
        let state = self.inner.commit.lock();
        let entry = state
            .catalog
            .find_visible(name)
            .ok_or_else(|| Error::table_not_found(name))?;
        state
            .tables
            .get(&entry.table_id)
            .map(|store| store.stats())
            .ok_or_else(|| Error::table_not_found(name))
    }

    /// Number of transactions currently open.
    pub fn open_transaction_count(&self) -> usize {
        self.inner.open_transactions.lock().len()
    }

    /// Number of dropped tables whose files await deletion.
    pub fn pending_drop_count(&self) -> usize {
        self.inner.commit.lock().pending_drop.len()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::invalid_operation("database is closed"));
        }
        Ok(())
    }

    /// Starts a transaction on the latest committed state.
    pub fn create_transaction(&self) -> Result<Transaction> {
        self.check_open()?;
        let state = self.inner.commit.lock();
        let snapshot = state.catalog.commit_id;
        let tables = state
            .tables
            .values()
            .map(|store| SnapshotTable {
                view: TableSnapshot::committed(Arc::clone(store)),
                root_lock: store.root_lock(),
            })
            .collect();
        let txn_id = self.inner.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        self.inner.open_transactions.lock().insert(txn_id, snapshot);
        drop(state);

        debug!(txn_id, snapshot, "opened transaction");
        Ok(Transaction::new(self.clone(), txn_id, snapshot, tables))
    }

    pub(crate) fn allocate_table_id(&self) -> TableId {
        self.inner.next_table_id.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn create_store(
        &self,
        table_id: TableId,
        schema: TableSchema,
    ) -> Result<Arc<MasterTableStore>> {
        MasterTableStore::create(
            &self.inner.config.dir,
            table_id,
            schema,
            Arc::clone(&self.inner.cache),
            self.inner.config.store_options(),
        )
    }

    // ---------------------------------------------------------------------
    // Commit and rollback
    // ---------------------------------------------------------------------

    pub(crate) fn process_commit(&self, request: CommitRequest) -> Result<CommitId> {
        let mut state = self.inner.commit.lock();
        if self.inner.poisoned.load(Ordering::Acquire) {
            let _ = discard(&request);
            drop(state);
            return Err(Error::consistency(
                "a previous commit failed to finalize; the database must be reopened",
            ));
        }

        let merged = match self.validate(&state, &request) {
            Ok(merged) => merged,
            Err(e) => {
                let _ = discard(&request);
                drop(state);
                debug!(txn_id = request.txn_id, error = %e, "commit rejected");
                return Err(e);
            }
        };

        match self.finalize(&mut state, request, merged) {
            Ok(commit_id) => Ok(commit_id),
            Err(e) => {
                self.inner.poisoned.store(true, Ordering::Release);
                error!(error = %e, "commit failed during finalize");
                Err(e)
            }
        }
    }

    /// Steps 1 to 5. Returns the merged index set of every changed table.
    fn validate(
        &self,
        state: &CommitState,
        request: &CommitRequest,
    ) -> Result<BTreeMap<TableId, IndexSet>> {
        let snapshot = request.snapshot;
        let (created, dropped) = reconcile(request);

        for change in &request.changes {
            if change.created {
                continue;
            }
            let table_id = change.store.table_id();
            if change.journal.is_empty() {
                if self.inner.config.strict_dirty_select
                    && change.accessed
                    && !change.store.journals_since(snapshot).is_empty()
                {
                    return Err(Error::conflict(
                        ConflictKind::DirtySelect,
                        format!(
                            "table {} changed after it was read",
                            change.store.schema().name()
                        ),
                    ));
                }
                continue;
            }
            if !state.tables.contains_key(&table_id) {
                return Err(Error::conflict(
                    ConflictKind::TableDropped,
                    format!(
                        "table {} was dropped by a concurrent transaction",
                        change.store.schema().name()
                    ),
                ));
            }
            for committed in change.store.journals_since(snapshot) {
                if committed.clashes_with(&change.journal) {
                    return Err(Error::conflict(
                        ConflictKind::RowClash,
                        format!(
                            "table {} rows changed by commit {}",
                            change.store.schema().name(),
                            committed.commit_id().unwrap_or_default()
                        ),
                    ));
                }
            }
        }

        for entry in &created {
            if let Some(existing) = state.catalog.find_visible(&entry.name) {
                if !dropped.iter().any(|d| d.table_id == existing.table_id) {
                    return Err(Error::conflict(
                        ConflictKind::DuplicateTable,
                        format!("table {} was created by a concurrent transaction", entry.name),
                    ));
                }
            }
        }
        for entry in &dropped {
            if !state.tables.contains_key(&entry.table_id) {
                return Err(Error::conflict(
                    ConflictKind::TableDropped,
                    format!("table {} was dropped by a concurrent transaction", entry.name),
                ));
            }
        }

        // Merge each surviving journal onto the latest committed indices.
        let mut merged = BTreeMap::new();
        for change in surviving(request, &created) {
            let mut set = change.store.latest_index_set();
            change.store.replay_journal(&mut set, change.journal.entries())?;
            merged.insert(change.store.table_id(), set);
        }

        let mut views = ViewSet::new();
        for (table_id, store) in &state.tables {
            if dropped.iter().any(|d| d.table_id == *table_id) {
                continue;
            }
            views.insert(match merged.get(table_id) {
                Some(set) => TableSnapshot::new(Arc::clone(store), set.clone()),
                None => TableSnapshot::committed(Arc::clone(store)),
            });
        }
        for change in request.changes.iter().filter(|c| is_created(c, &created)) {
            if let Some(set) = merged.get(&change.store.table_id()) {
                views.insert(TableSnapshot::new(Arc::clone(&change.store), set.clone()));
            } else {
                views.insert(TableSnapshot::committed(Arc::clone(&change.store)));
            }
        }

        let changed: Vec<&TableChange> = surviving(request, &created).collect();
        for change in &changed {
            if let Some(view) = views.get(change.store.schema().name()) {
                let removed = change.journal.removed_rows();
                ConstraintChecker::check_removed_rows(view, &removed, &views, CheckScope::All)?;
            }
        }
        for change in &changed {
            if let Some(view) = views.get(change.store.schema().name()) {
                let rows = if request.altered.contains(&change.store.table_id()) {
                    view.row_indices()
                } else {
                    change.journal.added_rows()
                };
                ConstraintChecker::check_added_rows(view, &rows, &views, CheckScope::All)?;
            }
        }
        Ok(merged)
    }

    /// Step 6. Errors here leave the conglomerate poisoned.
    fn finalize(
        &self,
        state: &mut CommitState,
        request: CommitRequest,
        mut merged: BTreeMap<TableId, IndexSet>,
    ) -> Result<CommitId> {
        let (created, dropped) = reconcile(&request);
        let commit_id = state.catalog.commit_id + 1;

        let mut leftovers = Vec::new();
        let mut new_stores = Vec::new();
        for change in request.changes {
            let table_id = change.store.table_id();
            if is_created(&change, &created) {
                new_stores.push(Arc::clone(&change.store));
            }
            match merged.remove(&table_id) {
                Some(set) => {
                    change
                        .store
                        .commit_transaction_change(commit_id, change.journal, set)?;
                }
                None => leftovers.push(change),
            }
        }

        let mut catalog = state.catalog.clone();
        catalog.commit_id = commit_id;
        catalog.next_table_id = self.inner.next_table_id.load(Ordering::Acquire);
        catalog
            .visible
            .retain(|e| !dropped.iter().any(|d| d.table_id == e.table_id));
        catalog.visible.extend(created.iter().cloned());
        catalog.dropped.extend(dropped.iter().cloned());
        catalog.store(&mut state.state_store)?;
        state.catalog = catalog;

        for entry in &dropped {
            if let Some(store) = state.tables.remove(&entry.table_id) {
                state.pending_drop.push(store);
            }
        }
        for store in new_stores {
            state.tables.insert(store.table_id(), store);
        }
        for change in leftovers {
            if is_created(&change, &created) {
                continue;
            }
            if change.created {
                // Created and dropped by the same transaction.
                if let Err(e) = change.store.delete_files() {
                    warn!(table_id = change.store.table_id(), error = %e, "deleting table files failed");
                }
            } else if !change.journal.is_empty() {
                if let Err(e) = change.store.rollback_transaction_change(&change.journal) {
                    warn!(table_id = change.store.table_id(), error = %e, "discarding rows of dropped table failed");
                }
            }
        }

        info!(
            txn_id = request.txn_id,
            commit_id,
            created = created.len(),
            dropped = dropped.len(),
            "committed transaction"
        );
        Ok(commit_id)
    }

    pub(crate) fn process_rollback(&self, request: CommitRequest) -> Result<()> {
        let _state = self.inner.commit.lock();
        let result = discard(&request);
        debug!(txn_id = request.txn_id, "rolled back transaction");
        result
    }

    /// Unregisters a transaction and trims journal history no longer needed.
    ///
    /// Root locks of the transaction must already be released.
    pub(crate) fn close_transaction(&self, txn_id: TransactionId) {
        let (min_snapshot, none_open) = {
            let mut open = self.inner.open_transactions.lock();
            open.remove(&txn_id);
            (open.values().min().copied(), open.is_empty())
        };
        let (stores, commit_id) = {
            let state = self.inner.commit.lock();
            let stores: Vec<_> = state.tables.values().cloned().collect();
            (stores, state.catalog.commit_id)
        };
        let min = min_snapshot.unwrap_or(commit_id);
        for store in stores {
            store.merge_journals(min);
        }

        if none_open && self.pending_drop_count() > 0 {
            if self.inner.config.background_work {
                let this = self.clone();
                std::thread::spawn(move || {
                    if let Err(e) = this.clean_dropped_tables() {
                        warn!(error = %e, "dropped table cleanup failed");
                    }
                });
            } else if let Err(e) = self.clean_dropped_tables() {
                warn!(error = %e, "dropped table cleanup failed");
            }
        }
    }

    /// Deletes the files of dropped tables once no transaction is open.
    ///
    /// Returns the number of tables cleaned up.
    pub fn clean_dropped_tables(&self) -> Result<usize> {
        let mut state = self.inner.commit.lock();
        if !self.inner.open_transactions.lock().is_empty() || state.pending_drop.is_empty() {
            return Ok(0);
        }
        let stores = std::mem::take(&mut state.pending_drop);
        let mut cleaned = Vec::new();
        for store in stores {
            match store.delete_files() {
                Ok(()) => cleaned.push(store.table_id()),
                Err(e) => {
                    warn!(table_id = store.table_id(), error = %e, "deleting dropped table failed");
                    state.pending_drop.push(store);
                }
            }
        }
        if !cleaned.is_empty() {
            let mut catalog = state.catalog.clone();
            catalog.dropped.retain(|e| !cleaned.contains(&e.table_id));
            catalog.store(&mut state.state_store)?;
            state.catalog = catalog;
        }
        Ok(cleaned.len())
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Re-derives the indices of every table. Requires no open transaction.
    pub fn check_and_repair(&self) -> Result<Vec<(String, RepairReport)>> {
        let state = self.inner.commit.lock();
        if !self.inner.open_transactions.lock().is_empty() {
            return Err(Error::invalid_operation(
                "check_and_repair requires no open transactions",
            ));
        }
        let mut reports = Vec::with_capacity(state.tables.len());
        for store in state.tables.values() {
            reports.push((store.schema().name().to_string(), store.check_and_repair()?));
        }
        Ok(reports)
    }

    /// Flushes every table and releases the directory lock.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let state = self.inner.commit.lock();
            for store in state.tables.values() {
                store.flush()?;
            }
        }
        self.inner.lock_file.lock().take();
        info!(dir = %self.inner.config.dir.display(), "closed database");
        Ok(())
    }
}

/// Created and dropped entries that survive reconciliation. A table created
/// and dropped by the same transaction appears in neither.
fn reconcile(request: &CommitRequest) -> (Vec<TableEntry>, Vec<TableEntry>) {
    let created = request
        .created
        .iter()
        .filter(|c| !request.dropped.iter().any(|d| d.table_id == c.table_id))
        .cloned()
        .collect();
    let dropped = request
        .dropped
        .iter()
        .filter(|d| !request.created.iter().any(|c| c.table_id == d.table_id))
        .cloned()
        .collect();
    (created, dropped)
}

fn is_created(change: &TableChange, created: &[TableEntry]) -> bool {
    change.created
        && created
            .iter()
            .any(|e| e.table_id == change.store.table_id())
}

/// Changes that will be merged: non-empty journals of tables not dropped.
fn surviving<'a>(
    request: &'a CommitRequest,
    created: &'a [TableEntry],
) -> impl Iterator<Item = &'a TableChange> + 'a {
    request.changes.iter().filter(move |c| {
        !c.dropped && !c.journal.is_empty() && (!c.created || is_created(c, created))
    })
}

/// Rolls back every journal of a request and deletes the tables it created.
/// Returns the first error after attempting every table.
fn discard(request: &CommitRequest) -> Result<()> {
    let mut first_error = None;
    for change in &request.changes {
        let result = if change.created {
            change.store.delete_files()
        } else {
            change.store.rollback_transaction_change(&change.journal)
        };
        if let Err(e) = result {
            warn!(table_id = change.store.table_id(), error = %e, "discarding table change failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig::new(dir.path())
            .with_sync_writes(false)
            .with_background_work(false)
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let db = Conglomerate::create(config(&dir)).unwrap();
        assert_eq!(db.commit_id(), 1);
        assert_eq!(db.table_names(), vec![SYS_TABLES.to_string()]);
        assert!(Conglomerate::create(config(&dir)).is_err());
        db.close().unwrap();
        drop(db);

        let db = Conglomerate::open(config(&dir)).unwrap();
        assert_eq!(db.commit_id(), 1);
        assert_eq!(db.table_stats(SYS_TABLES).unwrap().commits, 0);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _db = Conglomerate::create(config(&dir)).unwrap();
        assert!(matches!(
            Conglomerate::open(config(&dir)),
            Err(Error::DatabaseLocked { .. })
        ));
    }

    #[test]
    fn test_transaction_registry() {
        let dir = TempDir::new().unwrap();
        let db = Conglomerate::create(config(&dir)).unwrap();
        let a = db.create_transaction().unwrap();
        let b = db.create_transaction().unwrap();
        assert_eq!(db.open_transaction_count(), 2);
        a.rollback().unwrap();
        drop(b);
        assert_eq!(db.open_transaction_count(), 0);
    }

    #[test]
    fn test_closed_database_rejects_transactions() {
        let dir = TempDir::new().unwrap();
        let db = Conglomerate::create(config(&dir)).unwrap();
        db.close().unwrap();
        assert!(db.create_transaction().is_err());
        Conglomerate::open(config(&dir)).unwrap();
    }
}
