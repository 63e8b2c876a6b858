//! Keel Storage - Durable table stores for the Keel storage core.
//!
//! This crate provides the physical layer of one table:
//!
//! - `MasterTableStore`: record file, committed indices, record lifecycle
//! - `RecordFile` / `IndexFile`: the on-disk record log and versioned indices
//! - `IndexSet`: point-in-time master and column indices of a table
//! - `MasterTableJournal`: the add/remove log of one transaction on one table
//! - `CellCache`: decoded cells shared by every table
//! - `RowSet` / `MutableRowSet` / `IndexQuery`: read and write interfaces
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use keel_core::schema::TableBuilder;
//! use keel_core::{DataType, Value};
//! use keel_storage::{CellCache, IndexQuery, MasterTableJournal, MasterTableStore, RowSet,
//!     StoreOptions, TableSnapshot};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let schema = TableBuilder::new("users")
//!     .unwrap()
//!     .add_column("id", DataType::Int64)
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! let store = MasterTableStore::create(
//!     dir.path(), 1, schema, Arc::new(CellCache::default()), StoreOptions::default(),
//! ).unwrap();
//!
//! // Rows are uncommitted until a journal is merged.
//! let mut journal = MasterTableJournal::new(1);
//! journal.add(store.add_row(vec![Value::Int64(7)]).unwrap());
//! let mut set = store.latest_index_set();
//! store.replay_journal(&mut set, journal.entries()).unwrap();
//! store.commit_transaction_change(1, journal, set).unwrap();
//!
//! let snapshot = TableSnapshot::committed(store);
//! assert_eq!(snapshot.row_count(), 1);
//! assert_eq!(snapshot.select_equal(0, &Value::Int64(7)).unwrap().len(), 1);
//! ```

pub mod cell_cache;
pub mod index_file;
pub mod index_set;
pub mod journal;
pub mod master_table;
mod rank;
pub mod record;
pub mod record_file;
pub mod source;
pub mod stats;

pub use cell_cache::{CellCache, DEFAULT_CELL_CACHE_CAPACITY};
pub use index_file::IndexFile;
pub use index_set::IndexSet;
pub use journal::{JournalEntry, MasterTableJournal};
pub use master_table::{
    delete_table_files, record_path, stored_table_ids, ColumnComparator, MasterTableStore,
    RepairReport, RootLock, StoreOptions,
};
pub use record::RecordState;
pub use record_file::RecordFile;
pub use source::{IndexQuery, MutableRowSet, RowSet, TableSnapshot};
pub use stats::{TableStats, TableStatsSnapshot};
