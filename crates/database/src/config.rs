//! Database configuration.

use keel_core::{Error, Result};
use keel_index::DEFAULT_SUBSET_SORT_THRESHOLD;
use keel_storage::{StoreOptions, DEFAULT_CELL_CACHE_CAPACITY};
use std::path::PathBuf;

/// Configuration for a [`Conglomerate`](crate::Conglomerate).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory holding the state, lock, record and index files.
    pub dir: PathBuf,

    /// Whether commits fsync record, index and state files.
    pub sync_writes: bool,

    /// Fail a commit when a table it only read was changed since its snapshot.
    pub strict_dirty_select: bool,

    /// Number of decoded cells kept in the shared cell cache.
    pub cell_cache_capacity: usize,

    /// Subsets above this size use a rank cache when deriving a sort.
    pub subset_sort_threshold: usize,

    /// Run rank builds and dropped-table cleanup on background threads.
    pub background_work: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/keel"),
            sync_writes: true,
            strict_dirty_select: false,
            cell_cache_capacity: DEFAULT_CELL_CACHE_CAPACITY,
            subset_sort_threshold: DEFAULT_SUBSET_SORT_THRESHOLD,
            background_work: true,
        }
    }
}

impl DatabaseConfig {
    /// Creates a configuration for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets whether commits sync to disk.
    #[must_use]
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Sets strict dirty-select checking.
    #[must_use]
    pub fn with_strict_dirty_select(mut self, strict: bool) -> Self {
        self.strict_dirty_select = strict;
        self
    }

    /// Sets the cell cache capacity.
    #[must_use]
    pub fn with_cell_cache_capacity(mut self, capacity: usize) -> Self {
        self.cell_cache_capacity = capacity;
        self
    }

    /// Sets the subset size above which rank caches are used.
    #[must_use]
    pub fn with_subset_sort_threshold(mut self, threshold: usize) -> Self {
        self.subset_sort_threshold = threshold;
        self
    }

    /// Sets whether background threads are used.
    #[must_use]
    pub fn with_background_work(mut self, enabled: bool) -> Self {
        self.background_work = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(Error::invalid_operation("database directory is empty"));
        }
        if self.subset_sort_threshold == 0 {
            return Err(Error::invalid_operation(
                "subset sort threshold must be positive",
            ));
        }
        Ok(())
    }

    pub(crate) fn store_options(&self) -> StoreOptions {
        StoreOptions {
            sync_writes: self.sync_writes,
            subset_sort_threshold: self.subset_sort_threshold,
            background_work: self.background_work,
        }
    }
}
