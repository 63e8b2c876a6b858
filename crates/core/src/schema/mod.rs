//! Schema module for Keel.
//!
//! This module contains all schema-related definitions including columns, tables,
//! constraints, check expressions and the binary schema encoding.

mod check;
mod column;
mod constraint;
mod encoding;
mod table;

pub use check::{CheckExpr, CompareOp};
pub use column::Column;
pub use constraint::{CheckConstraint, ConstraintTiming, Constraints, ForeignKey, UniqueKey};
pub use encoding::{decode_schema, encode_schema};
pub use table::{TableBuilder, TableSchema};
