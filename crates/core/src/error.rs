//! Error types for the Keel storage core.

use crate::types::DataType;
use std::io;
use thiserror::Error;

/// Result type alias for Keel operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The kind of serialization conflict detected at commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both transactions added or removed the same row.
    RowClash,
    /// A table read by the transaction was changed by a concurrent commit (strict mode).
    DirtySelect,
    /// A table created by the transaction already exists.
    DuplicateTable,
    /// A table used or dropped by the transaction was dropped concurrently.
    TableDropped,
}

/// The kind of integrity constraint that was violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    NotNull,
    Type,
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

/// Error types for Keel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serializable conflict detected at commit. The transaction must be discarded.
    #[error("transaction conflict ({kind:?}): {message}")]
    Conflict { kind: ConflictKind, message: String },

    /// Integrity constraint violation.
    #[error("{kind:?} constraint '{constraint}' violated on table {table}: {message}")]
    ConstraintViolation {
        kind: ConstraintKind,
        table: String,
        constraint: String,
        message: String,
    },

    /// An internal invariant does not hold. Signals storage corruption.
    #[error("consistency assertion failed: {message}")]
    ConsistencyAssertion { message: String },

    /// I/O failure while reading, writing or syncing durable state.
    #[error("durability failure: {source}")]
    Durability {
        #[from]
        source: io::Error,
    },

    /// Corrupt or mismatched on-disk data.
    #[error("format error: {message}")]
    Format { message: String },

    /// Attempted to mutate an immutable index copy.
    #[error("attempted to mutate an immutable index")]
    ImmutableViolation,

    /// Cell type does not match the column type.
    #[error("type mismatch on column {column}: expected {expected:?}, got {got:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        got: DataType,
    },

    #[error("table not found: {name}")]
    TableNotFound { name: String },

    #[error("table already exists: {name}")]
    TableExists { name: String },

    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Another process owns the database directory.
    #[error("database directory is locked by another process: {path}")]
    DatabaseLocked { path: String },
}

impl Error {
    /// Creates a conflict error.
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        Error::Conflict {
            kind,
            message: message.into(),
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint(
        kind: ConstraintKind,
        table: impl Into<String>,
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::ConstraintViolation {
            kind,
            table: table.into(),
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    /// Creates a consistency assertion error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Error::ConsistencyAssertion {
            message: message.into(),
        }
    }

    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format {
            message: message.into(),
        }
    }

    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound { name: name.into() }
    }

    /// Creates a column not found error.
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for conflicts detected at commit.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns true for statement-level constraint violations.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation { .. } | Error::TypeMismatch { .. })
    }

    /// Returns true if the affected store must be considered untrustworthy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConsistencyAssertion { .. } | Error::Durability { .. } | Error::Format { .. }
        )
    }
}
