//! Keel Database - Transactions and the commit protocol for the Keel storage core.
//!
//! This crate ties table stores together into one database:
//!
//! - `Conglomerate`: all tables, the commit lock, the catalog and the commit counter
//! - `Transaction`: a snapshot-isolated view that journals its changes
//! - `MutableTable`: one table as seen and changed by a transaction
//! - `ConstraintChecker`: primary key, unique, foreign key, not-null and check validation
//! - `DatabaseConfig`: directory, durability and background work settings
//!
//! # Example
//!
//! ```rust
//! use keel_core::schema::TableBuilder;
//! use keel_core::{DataType, Value};
//! use keel_database::{Conglomerate, DatabaseConfig};
//! use keel_storage::{IndexQuery, MutableRowSet, RowSet};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let db = Conglomerate::create(DatabaseConfig::new(dir.path())).unwrap();
//!
//! let mut txn = db.create_transaction().unwrap();
//! txn.create_table(
//!     TableBuilder::new("users")
//!         .unwrap()
//!         .add_column("id", DataType::Int64)
//!         .unwrap()
//!         .add_column("name", DataType::String)
//!         .unwrap()
//!         .add_primary_key(&["id"])
//!         .unwrap()
//!         .build()
//!         .unwrap(),
//! )
//! .unwrap();
//! txn.get_table("users")
//!     .unwrap()
//!     .add_row(vec![Value::Int64(1), Value::String("Alice".into())])
//!     .unwrap();
//! txn.commit().unwrap();
//!
//! let mut reader = db.create_transaction().unwrap();
//! let users = reader.get_table("users").unwrap();
//! assert_eq!(users.row_count(), 1);
//! assert_eq!(users.select_equal(0, &Value::Int64(1)).unwrap().len(), 1);
//! ```

pub mod catalog;
pub mod config;
pub mod conglomerate;
pub mod constraint;
pub mod lock_file;
pub mod state_store;
pub mod transaction;

pub use catalog::{Catalog, TableEntry};
pub use config::DatabaseConfig;
pub use conglomerate::{sys_tables_schema, Conglomerate, TransactionId, SYS_TABLES, SYS_TABLES_ID};
pub use constraint::{CheckScope, ConstraintChecker, ViewSet};
pub use lock_file::LockFile;
pub use state_store::{StateChain, StateStore};
pub use transaction::{MutableTable, Transaction};
