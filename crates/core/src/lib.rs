//! Keel Core - Core types and schema definitions for the Keel storage engine.
//!
//! This crate provides the foundational types shared by every Keel crate:
//!
//! - `DataType`: Supported cell types (Boolean, Int32, Int64, Float64, String, DateTime, Bytes)
//! - `Value`: Runtime values that can be stored in a cell
//! - `codec`: Length-prefixed binary encoding of cells
//! - `schema`: Schema definitions (Column, TableSchema, constraints, check expressions)
//! - `Error`: Error types for storage and transaction operations
//!
//! # Example
//!
//! ```rust
//! use keel_core::{DataType, Value};
//! use keel_core::schema::TableBuilder;
//!
//! let table = TableBuilder::new("users")
//!     .unwrap()
//!     .add_column("id", DataType::Int64)
//!     .unwrap()
//!     .add_column("name", DataType::String)
//!     .unwrap()
//!     .add_primary_key(&["id"])
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! let mut row = vec![Value::Int32(1), Value::String("Alice".into())];
//! table.coerce_row(&mut row).unwrap();
//! assert_eq!(row[0], Value::Int64(1));
//! ```

pub mod codec;
mod error;
pub mod schema;
mod types;
mod value;

pub use error::{ConflictKind, ConstraintKind, Error, Result};
pub use types::DataType;
pub use value::Value;

/// Stable index of a row within one table.
pub type RowIndex = u64;

/// Identifier of a table within one conglomerate.
pub type TableId = u32;

/// Serialization order of committed transactions.
pub type CommitId = u64;
