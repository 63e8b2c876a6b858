//! Durable store for one committed table.
//!
//! A [`MasterTableStore`] owns the table's record file and index file. Rows are
//! appended as `Uncommitted` records by open transactions and only become part
//! of the committed state when a journal is merged through
//! [`commit_transaction_change`](MasterTableStore::commit_transaction_change),
//! which the conglomerate calls under its commit lock.
//!
//! Removed rows are queued for collection and reclaimed once no root lock is
//! held. A reclaimed row index is reused by a later insert.

use crate::cell_cache::CellCache;
use crate::index_file::{index_path, IndexFile};
use crate::index_set::IndexSet;
use crate::journal::{JournalEntry, MasterTableJournal};
use crate::rank::ColumnRank;
use crate::record::RecordState;
use crate::record_file::{slot_of, RecordFile};
use crate::stats::{TableStats, TableStatsSnapshot};
use hashbrown::HashSet;
use keel_core::codec::{encode_cells, read_cell, skip_cell, ByteReader};
use keel_core::schema::{decode_schema, encode_schema, TableSchema};
use keel_core::{CommitId, Error, Result, RowIndex, TableId, Value};
use keel_index::{IndexComparator, RankCache, RowOrder, SortedIndex, DEFAULT_SUBSET_SORT_THRESHOLD};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Returns the path of a table's record file.
pub fn record_path(dir: &Path, table_id: TableId) -> PathBuf {
    dir.join(format!("t{}.kdt", table_id))
}

/// Deletes the record and index files of a table that is not open.
pub fn delete_table_files(dir: &Path, table_id: TableId) -> Result<()> {
    IndexFile::new(dir, table_id, false).delete()?;
    match std::fs::remove_file(record_path(dir, table_id)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Returns the ids of every table with a record or index file in `dir`.
pub fn stored_table_ids(dir: &Path) -> Result<Vec<TableId>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(rest) = name.strip_prefix('t') else {
            continue;
        };
        let Some((id, ext)) = rest.split_once('.') else {
            continue;
        };
        if !matches!(ext, "kdt" | "kix" | "kix.tmp" | "kix.prev") {
            continue;
        }
        if let Ok(id) = id.parse::<TableId>() {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Per-store settings.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Sync record and index files before a commit returns.
    pub sync_writes: bool,
    /// Subsets above this size are sorted by rank when a rank cache exists.
    pub subset_sort_threshold: usize,
    /// Build rank caches on a background thread.
    pub background_work: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            subset_sort_threshold: DEFAULT_SUBSET_SORT_THRESHOLD,
            background_work: true,
        }
    }
}

/// Result of [`MasterTableStore::check_and_repair`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Record states rewritten to match the master index.
    pub states_repaired: usize,
    /// Column indices that differed from a fresh derivation.
    pub indexes_rebuilt: usize,
}

#[derive(Debug)]
struct StoreState {
    /// Committed indices, always an immutable copy.
    index_set: IndexSet,
    index_version: CommitId,
    committed_journals: Vec<Arc<MasterTableJournal>>,
    gc_queue: Vec<RowIndex>,
    free_rows: Vec<RowIndex>,
    next_row: RowIndex,
}

/// Decoding position within the payload of the last row read.
#[derive(Debug, Default)]
struct RecordCursor {
    row: Option<RowIndex>,
    payload: Vec<u8>,
    next_column: usize,
    offset: usize,
}

impl RecordCursor {
    fn reset(&mut self) {
        self.row = None;
        self.payload.clear();
        self.next_column = 0;
        self.offset = 0;
    }
}

/// Orders rows by the value of one column of a store.
#[derive(Clone, Copy)]
pub struct ColumnComparator<'a> {
    store: &'a MasterTableStore,
    column: usize,
}

impl<'a> ColumnComparator<'a> {
    pub fn new(store: &'a MasterTableStore, column: usize) -> Self {
        Self { store, column }
    }
}

impl IndexComparator for ColumnComparator<'_> {
    fn compare_rows(&self, a: RowIndex, b: RowIndex) -> Result<Ordering> {
        let va = self.store.get_cell_contents(self.column, a)?;
        let vb = self.store.get_cell_contents(self.column, b)?;
        Ok(va.cmp(&vb))
    }

    fn compare_value(&self, row: RowIndex, value: &Value) -> Result<Ordering> {
        Ok(self.store.get_cell_contents(self.column, row)?.cmp(value))
    }
}

/// The physical store of one table.
#[derive(Debug)]
pub struct MasterTableStore {
    table_id: TableId,
    schema: TableSchema,
    dir: PathBuf,
    options: StoreOptions,
    records: RecordFile,
    index_file: IndexFile,
    cache: Arc<CellCache>,
    state: Mutex<StoreState>,
    cursor: Mutex<RecordCursor>,
    root_locks: AtomicUsize,
    ranks: Vec<ColumnRank>,
    reclaim_generation: AtomicU64,
    stats: TableStats,
    this: Weak<MasterTableStore>,
}

impl MasterTableStore {
    /// Creates the files of a new, empty table.
    pub fn create(
        dir: impl AsRef<Path>,
        table_id: TableId,
        schema: TableSchema,
        cache: Arc<CellCache>,
        options: StoreOptions,
    ) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        let records = RecordFile::create(record_path(&dir, table_id), table_id, &encode_schema(&schema))?;
        let index_file = IndexFile::new(&dir, table_id, options.sync_writes);
        let index_set = IndexSet::empty(table_id, schema.column_count());
        index_file.write(0, &index_set)?;

        info!(table_id, name = schema.name(), "created table store");
        Ok(Self::assemble(
            dir,
            table_id,
            schema,
            records,
            index_file,
            cache,
            options,
            StoreState {
                index_set: index_set.copy(true),
                index_version: 0,
                committed_journals: Vec::new(),
                gc_queue: Vec::new(),
                free_rows: Vec::new(),
                next_row: 0,
            },
        ))
    }

    /// Opens an existing table, loading the newest index version not beyond
    /// `durable_commit`, and repairs record states that disagree with it.
    pub fn open(
        dir: impl AsRef<Path>,
        table_id: TableId,
        durable_commit: CommitId,
        cache: Arc<CellCache>,
        options: StoreOptions,
    ) -> Result<Arc<Self>> {
        let dir = dir.as_ref().to_path_buf();
        let (records, blob) = RecordFile::open(record_path(&dir, table_id))?;
        if records.table_id() != table_id {
            return Err(Error::format(format!(
                "record file for table {} carries id {}",
                table_id,
                records.table_id()
            )));
        }
        let schema = decode_schema(&blob)?;
        let index_file = IndexFile::new(&dir, table_id, options.sync_writes);
        let (index_version, index_set) = index_file.load(durable_commit, schema.column_count())?;

        let committed: HashSet<RowIndex> = index_set.master().iter().collect();
        let mut seen = HashSet::with_capacity(committed.len());
        let mut gc_queue = Vec::new();
        let mut free_rows = Vec::new();
        let mut repaired = 0usize;

        for (row, state) in records.rows() {
            let indexed = committed.contains(&row);
            if indexed {
                seen.insert(row);
            }
            match (state, indexed) {
                (RecordState::CommittedAdded, true) => {}
                (RecordState::Uncommitted | RecordState::CommittedRemoved, true) => {
                    warn!(table_id, row, ?state, "indexed row not marked committed, repairing");
                    records.write_state(row, RecordState::CommittedAdded)?;
                    repaired += 1;
                }
                (RecordState::Reclaimed, true) => {
                    return Err(Error::format(format!(
                        "row {} of table {} is indexed but reclaimed",
                        row, table_id
                    )));
                }
                (RecordState::CommittedAdded | RecordState::Uncommitted, false) => {
                    warn!(table_id, row, ?state, "unindexed row marked live, removing");
                    records.write_state(row, RecordState::CommittedRemoved)?;
                    gc_queue.push(row);
                    repaired += 1;
                }
                (RecordState::CommittedRemoved, false) => gc_queue.push(row),
                (RecordState::Reclaimed, false) => free_rows.push(row),
            }
        }
        if seen.len() != committed.len() {
            return Err(Error::format(format!(
                "index of table {} references {} rows with no record",
                table_id,
                committed.len() - seen.len()
            )));
        }
        if repaired > 0 {
            records.sync()?;
        }

        // Lowest free rows are reused first.
        free_rows.sort_unstable_by(|a, b| b.cmp(a));
        let next_row = records.row_capacity();
        info!(
            table_id,
            name = schema.name(),
            rows = index_set.row_count(),
            index_version,
            repaired,
            "opened table store"
        );
        Ok(Self::assemble(
            dir,
            table_id,
            schema,
            records,
            index_file,
            cache,
            options,
            StoreState {
                index_set: index_set.copy(true),
                index_version,
                committed_journals: Vec::new(),
                gc_queue,
                free_rows,
                next_row,
            },
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        dir: PathBuf,
        table_id: TableId,
        schema: TableSchema,
        records: RecordFile,
        index_file: IndexFile,
        cache: Arc<CellCache>,
        options: StoreOptions,
        state: StoreState,
    ) -> Arc<Self> {
        let ranks = (0..schema.column_count()).map(|_| ColumnRank::new()).collect();
        Arc::new_cyclic(|this| Self {
            table_id,
            schema,
            dir,
            options,
            records,
            index_file,
            cache,
            state: Mutex::new(state),
            cursor: Mutex::new(RecordCursor::default()),
            root_locks: AtomicUsize::new(0),
            ranks,
            reclaim_generation: AtomicU64::new(0),
            stats: TableStats::new(),
            this: this.clone(),
        })
    }

    #[inline]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    #[inline]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    #[inline]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn stats(&self) -> TableStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of committed rows.
    pub fn committed_row_count(&self) -> usize {
        self.state.lock().index_set.row_count()
    }

    /// Commit id of the durable index version.
    pub fn index_version(&self) -> CommitId {
        self.state.lock().index_version
    }

    /// Rows waiting for reclamation.
    pub fn pending_gc(&self) -> usize {
        self.state.lock().gc_queue.len()
    }

    pub fn record_state(&self, row: RowIndex) -> Option<RecordState> {
        self.records.state(row)
    }

    // ---------------------------------------------------------------------
    // Rows
    // ---------------------------------------------------------------------

    /// Appends an uncommitted row and returns its index.
    pub fn add_row(&self, mut cells: Vec<Value>) -> Result<RowIndex> {
        self.schema.coerce_row(&mut cells)?;
        let payload = encode_cells(&cells);

        let (row, reused) = {
            let mut state = self.state.lock();
            match state.free_rows.pop() {
                Some(row) => (row, true),
                None => {
                    let row = state.next_row;
                    state.next_row += 1;
                    (row, false)
                }
            }
        };

        if reused && self.records.state(row) != Some(RecordState::Reclaimed) {
            return Err(Error::consistency(format!(
                "free row {} of table {} is not reclaimed",
                row, self.table_id
            )));
        }
        if let Err(e) = self
            .records
            .append(slot_of(row), RecordState::Uncommitted, &payload)
        {
            self.state.lock().free_rows.push(row);
            return Err(e);
        }

        {
            let mut cursor = self.cursor.lock();
            if cursor.row == Some(row) {
                cursor.reset();
            }
        }
        for (column, value) in cells.into_iter().enumerate() {
            self.cache.put(self.table_id, row, column, value);
        }
        for (column, rank) in self.ranks.iter().enumerate() {
            rank.add_row(row, &ColumnComparator::new(self, column))?;
        }
        self.stats.record_insert();
        Ok(row)
    }

    /// Returns the value of one cell.
    pub fn get_cell_contents(&self, column: usize, row: RowIndex) -> Result<Value> {
        if column >= self.schema.column_count() {
            return Err(Error::invalid_operation(format!(
                "column {} out of range for table {}",
                column,
                self.schema.name()
            )));
        }
        if let Some(value) = self.cache.get(self.table_id, row, column) {
            self.stats.record_cache_hit();
            return Ok(value);
        }
        self.stats.record_cache_miss();

        let mut cursor = self.cursor.lock();
        if cursor.row != Some(row) {
            cursor.payload = self.records.read_row(row)?;
            cursor.row = Some(row);
            cursor.next_column = 0;
            cursor.offset = 0;
        } else if column < cursor.next_column {
            cursor.next_column = 0;
            cursor.offset = 0;
        }

        let cursor = &mut *cursor;
        let mut reader = ByteReader::new(&cursor.payload);
        reader.seek(cursor.offset)?;
        while cursor.next_column < column {
            skip_cell(&mut reader)?;
            cursor.next_column += 1;
        }
        let value = read_cell(&mut reader)?;
        cursor.next_column = column + 1;
        cursor.offset = reader.position();

        self.cache.put(self.table_id, row, column, value.clone());
        Ok(value)
    }

    /// Reads every cell of a row.
    pub fn get_row(&self, row: RowIndex) -> Result<Vec<Value>> {
        (0..self.schema.column_count())
            .map(|column| self.get_cell_contents(column, row))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Index sets
    // ---------------------------------------------------------------------

    /// Returns an immutable copy of the committed indices.
    pub fn snapshot_index_set(&self) -> IndexSet {
        self.state.lock().index_set.copy(true)
    }

    /// Returns a mutable working copy of the committed indices.
    pub fn latest_index_set(&self) -> IndexSet {
        self.state.lock().index_set.copy(false)
    }

    /// Applies one journal entry to a working index set.
    pub fn apply_entry(&self, set: &mut IndexSet, entry: JournalEntry) -> Result<()> {
        match entry {
            JournalEntry::Add(row) => {
                set.master_mut().insert(row, &RowOrder)?;
                for column in 0..set.column_count() {
                    set.column_mut(column)?
                        .insert(row, &ColumnComparator::new(self, column))?;
                }
            }
            JournalEntry::Remove(row) => {
                set.master_mut().remove(row, &RowOrder)?;
                for column in 0..set.column_count() {
                    set.column_mut(column)?
                        .remove(row, &ColumnComparator::new(self, column))?;
                }
            }
        }
        Ok(())
    }

    /// Applies a sequence of journal entries to a working index set.
    pub fn replay_journal(&self, set: &mut IndexSet, entries: &[JournalEntry]) -> Result<()> {
        for entry in entries {
            self.apply_entry(set, *entry)?;
        }
        Ok(())
    }

    /// Builds an index over `rows` ordered by `column`.
    pub fn derive_subset_index(&self, column: usize, rows: &[RowIndex]) -> Result<SortedIndex> {
        let rank = self.ranks.get(column).ok_or_else(|| {
            Error::invalid_operation(format!(
                "column {} out of range for table {}",
                column,
                self.schema.name()
            ))
        })?;
        let threshold = self.options.subset_sort_threshold;
        if rows.len() > threshold && !rank.is_ready() {
            self.request_rank_build(column);
        }
        let cmp = ColumnComparator::new(self, column);
        rank.with_lookup(|ranks| SortedIndex::derive_subset_index(rows, &cmp, ranks, threshold))
    }

    /// Starts building the rank cache of a column if none is ready or running.
    pub fn request_rank_build(&self, column: usize) {
        let Some(rank) = self.ranks.get(column) else {
            return;
        };
        if !rank.begin_build() {
            return;
        }
        let Some(store) = self.this.upgrade() else {
            rank.finish_build(None, || false);
            return;
        };
        if self.options.background_work {
            let spawned = std::thread::Builder::new()
                .name(format!("keel-rank-{}-{}", self.table_id, column))
                .spawn(move || store.build_rank(column));
            if let Err(e) = spawned {
                warn!(table_id = self.table_id, column, error = %e, "could not spawn rank build");
                rank.finish_build(None, || false);
            }
        } else {
            store.build_rank(column);
        }
    }

    fn build_rank(&self, column: usize) {
        let (index, generation) = {
            let state = self.state.lock();
            let index = match state.index_set.column(column) {
                Ok(index) => index.copy(true),
                Err(_) => {
                    self.ranks[column].finish_build(None, || false);
                    return;
                }
            };
            (index, self.reclaim_generation.load(AtomicOrdering::Acquire))
        };
        let built = RankCache::build(&index, &ColumnComparator::new(self, column));
        let cache = match built {
            Ok(cache) => {
                debug!(table_id = self.table_id, column, rows = cache.len(), "built rank cache");
                Some(cache)
            }
            Err(e) => {
                warn!(table_id = self.table_id, column, error = %e, "rank cache build failed");
                None
            }
        };
        self.ranks[column].finish_build(cache, || {
            self.reclaim_generation.load(AtomicOrdering::Acquire) == generation
        });
    }

    /// Returns true if the rank cache of `column` is ready.
    pub fn has_rank_cache(&self, column: usize) -> bool {
        self.ranks.get(column).map_or(false, ColumnRank::is_ready)
    }

    // ---------------------------------------------------------------------
    // Commit and rollback
    // ---------------------------------------------------------------------

    /// Makes a journal part of the committed state.
    ///
    /// `index_set` is the committed indices with the journal replayed on top.
    /// Both files are synced before the new index set is published.
    pub fn commit_transaction_change(
        &self,
        commit_id: CommitId,
        mut journal: MasterTableJournal,
        index_set: IndexSet,
    ) -> Result<()> {
        journal.check_order()?;
        let mut removed = Vec::new();
        for entry in journal.entries() {
            match *entry {
                JournalEntry::Add(row) => {
                    self.transition(row, RecordState::Uncommitted, RecordState::CommittedAdded)?;
                }
                JournalEntry::Remove(row) => {
                    self.transition(row, RecordState::CommittedAdded, RecordState::CommittedRemoved)?;
                    removed.push(row);
                }
            }
        }
        if self.options.sync_writes {
            self.records.sync()?;
        }
        self.index_file.write(commit_id, &index_set)?;

        journal.set_commit_id(commit_id);
        let mut state = self.state.lock();
        state.index_set = index_set.copy(true);
        state.index_version = commit_id;
        state.gc_queue.extend_from_slice(&removed);
        state.committed_journals.push(Arc::new(journal));
        drop(state);

        self.stats.record_removes(removed.len() as u64);
        self.stats.record_commit();
        debug!(table_id = self.table_id, commit_id, removed = removed.len(), "committed table change");
        Ok(())
    }

    /// Discards the rows a journal added.
    pub fn rollback_transaction_change(&self, journal: &MasterTableJournal) -> Result<()> {
        let mut discarded = Vec::new();
        for entry in journal.entries() {
            if let JournalEntry::Add(row) = *entry {
                self.transition(row, RecordState::Uncommitted, RecordState::CommittedRemoved)?;
                discarded.push(row);
            }
        }
        self.state.lock().gc_queue.extend_from_slice(&discarded);
        debug!(table_id = self.table_id, discarded = discarded.len(), "rolled back table change");
        Ok(())
    }

    fn transition(&self, row: RowIndex, from: RecordState, to: RecordState) -> Result<()> {
        match self.records.state(row) {
            Some(state) if state == from && state.can_become(to) => {
                self.records.write_state(row, to)
            }
            state => Err(Error::consistency(format!(
                "row {} of table {} is {:?}, expected {:?}",
                row, self.table_id, state, from
            ))),
        }
    }

    /// Returns journals committed after `commit_id`.
    pub fn journals_since(&self, commit_id: CommitId) -> Vec<Arc<MasterTableJournal>> {
        self.state
            .lock()
            .committed_journals
            .iter()
            .filter(|j| j.commit_id().map_or(false, |c| c > commit_id))
            .cloned()
            .collect()
    }

    /// Discards journals no open transaction can conflict with.
    pub fn merge_journals(&self, min_commit_id: CommitId) {
        {
            let mut state = self.state.lock();
            state
                .committed_journals
                .retain(|j| j.commit_id().map_or(true, |c| c > min_commit_id));
        }
        if self.root_lock_count() == 0 {
            if let Err(e) = self.collect_garbage() {
                warn!(table_id = self.table_id, error = %e, "row collection failed");
            }
        }
    }

    /// Number of journals kept for conflict scans.
    pub fn journal_history_len(&self) -> usize {
        self.state.lock().committed_journals.len()
    }

    // ---------------------------------------------------------------------
    // Root locks and collection
    // ---------------------------------------------------------------------

    pub fn add_root_lock(&self) {
        self.root_locks.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Releases a root lock, collecting garbage when the last one goes.
    pub fn remove_root_lock(&self) -> Result<()> {
        let previous = self
            .root_locks
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| {
                Error::consistency(format!("root lock underflow on table {}", self.table_id))
            })?;
        if previous == 1 {
            self.collect_garbage()?;
        }
        Ok(())
    }

    pub fn root_lock_count(&self) -> usize {
        self.root_locks.load(AtomicOrdering::Acquire)
    }

    /// Takes a root lock released when the guard drops.
    pub fn root_lock(self: &Arc<Self>) -> RootLock {
        self.add_root_lock();
        RootLock {
            store: Arc::clone(self),
        }
    }

    /// Reclaims every queued row if no root lock is held.
    ///
    /// Returns the number of rows reclaimed.
    pub fn collect_garbage(&self) -> Result<usize> {
        let mut state = self.state.lock();
        if self.root_lock_count() > 0 || state.gc_queue.is_empty() {
            return Ok(0);
        }
        let queue = std::mem::take(&mut state.gc_queue);
        let mut reclaimed = 0;
        for (i, row) in queue.iter().enumerate() {
            match self.reclaim_locked(&mut state, *row) {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    state.gc_queue.extend_from_slice(&queue[i..]);
                    return Err(e);
                }
            }
        }
        if reclaimed > 0 {
            debug!(table_id = self.table_id, reclaimed, "collected removed rows");
        }
        Ok(reclaimed)
    }

    /// Reclaims `row` if it is committed-removed, not indexed, and no root
    /// lock is held.
    pub fn hard_check_and_reclaim_row(&self, row: RowIndex) -> Result<bool> {
        let mut state = self.state.lock();
        if self.root_lock_count() > 0 {
            return Ok(false);
        }
        let reclaimed = self.reclaim_locked(&mut state, row)?;
        if reclaimed {
            state.gc_queue.retain(|r| *r != row);
        }
        Ok(reclaimed)
    }

    /// Reclaims a committed-removed row, failing while root locked.
    pub fn hard_remove_row(&self, row: RowIndex) -> Result<()> {
        let mut state = self.state.lock();
        if self.root_lock_count() > 0 {
            return Err(Error::invalid_operation(format!(
                "table {} is root locked; row {} cannot be removed",
                self.table_id, row
            )));
        }
        if !self.reclaim_locked(&mut state, row)? {
            return Err(Error::consistency(format!(
                "row {} of table {} is not a removed row",
                row, self.table_id
            )));
        }
        state.gc_queue.retain(|r| *r != row);
        Ok(())
    }

    fn reclaim_locked(&self, state: &mut StoreState, row: RowIndex) -> Result<bool> {
        if self.records.state(row) != Some(RecordState::CommittedRemoved) {
            return Ok(false);
        }
        if state.index_set.master().contains(row, &RowOrder)? {
            return Ok(false);
        }
        self.records.write_state(row, RecordState::Reclaimed)?;
        state.free_rows.push(row);

        self.reclaim_generation.fetch_add(1, AtomicOrdering::AcqRel);
        for rank in &self.ranks {
            rank.reclaim(row);
        }
        self.cache.evict_row(self.table_id, row, self.schema.column_count());
        {
            let mut cursor = self.cursor.lock();
            if cursor.row == Some(row) {
                cursor.reset();
            }
        }
        self.stats.record_reclaim();
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Maintenance
    // ---------------------------------------------------------------------

    /// Returns the next value of the table's unique-id counter.
    ///
    /// The counter is durable and never rolled back.
    pub fn next_unique_id(&self) -> Result<u64> {
        self.records.next_unique_id(self.options.sync_writes)
    }

    /// Re-derives every column index from the master index and repairs
    /// record states of committed rows.
    pub fn check_and_repair(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let mut state = self.state.lock();
        let rows = state.index_set.rows();

        for row in &rows {
            match self.records.state(*row) {
                Some(RecordState::CommittedAdded) => {}
                Some(RecordState::Reclaimed) | None => {
                    return Err(Error::format(format!(
                        "committed row {} of table {} has no live record",
                        row, self.table_id
                    )));
                }
                Some(other) => {
                    warn!(table_id = self.table_id, row, state = ?other, "repairing committed row state");
                    self.records.write_state(*row, RecordState::CommittedAdded)?;
                    report.states_repaired += 1;
                }
            }
        }

        let mut columns = Vec::with_capacity(self.schema.column_count());
        for column in 0..self.schema.column_count() {
            let derived = SortedIndex::derive_subset_index(
                &rows,
                &ColumnComparator::new(self, column),
                None,
                usize::MAX,
            )?;
            if derived.to_vec() != state.index_set.column(column)?.to_vec() {
                warn!(table_id = self.table_id, column, "column index rebuilt");
                report.indexes_rebuilt += 1;
            }
            columns.push(derived);
        }

        if report.indexes_rebuilt > 0 {
            let master = SortedIndex::from_sorted(rows);
            let rebuilt = IndexSet::new(self.table_id, master, columns);
            self.index_file.write(state.index_version, &rebuilt)?;
            state.index_set = rebuilt.copy(true);
        }
        if report.states_repaired > 0 {
            self.records.sync()?;
        }
        info!(
            table_id = self.table_id,
            states_repaired = report.states_repaired,
            indexes_rebuilt = report.indexes_rebuilt,
            "checked table store"
        );
        Ok(report)
    }

    /// Flushes the record file.
    pub fn flush(&self) -> Result<()> {
        self.records.sync()
    }

    /// Deletes the table's files.
    pub fn delete_files(&self) -> Result<()> {
        self.cache.evict_table(self.table_id);
        delete_table_files(&self.dir, self.table_id)?;
        info!(table_id = self.table_id, name = self.schema.name(), "deleted table files");
        Ok(())
    }

    /// Returns true if both files of a table exist in `dir`.
    pub fn files_exist(dir: &Path, table_id: TableId) -> bool {
        record_path(dir, table_id).exists() && index_path(dir, table_id).exists()
    }
}

/// Root lock held on a store until dropped.
#[derive(Debug)]
pub struct RootLock {
    store: Arc<MasterTableStore>,
}

impl RootLock {
    pub fn store(&self) -> &Arc<MasterTableStore> {
        &self.store
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = self.store.remove_root_lock() {
            warn!(table_id = self.store.table_id, error = %e, "releasing root lock failed");
        }
    }
}
