//! Table definition for Keel schemas.

use super::check::CheckExpr;
use super::column::Column;
use super::constraint::{CheckConstraint, ConstraintTiming, Constraints, ForeignKey, UniqueKey};
use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::Value;

/// A table definition. Immutable for the lifetime of the table that owns it.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    constraints: Constraints,
}

impl TableSchema {
    /// Creates a schema with the given columns and no constraints.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.at_position(i))
            .collect();

        Self {
            name: name.into(),
            columns,
            constraints: Constraints::new(),
        }
    }

    pub(crate) fn from_parts(name: String, columns: Vec<Column>, constraints: Constraints) -> Self {
        let mut schema = Self::new(name, columns);
        schema.constraints = constraints;
        schema
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Gets a column index by name, failing with `ColumnNotFound`.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.get_column_index(name)
            .ok_or_else(|| Error::column_not_found(&self.name, name))
    }

    /// Resolves the column positions of a unique key.
    pub fn key_columns(&self, key: &UniqueKey) -> Result<Vec<usize>> {
        key.columns.iter().map(|c| self.column_index(c)).collect()
    }

    /// Returns the primary key constraint if defined.
    pub fn primary_key(&self) -> Option<&UniqueKey> {
        self.constraints.primary_key()
    }

    /// Returns a copy of this schema under another table name.
    pub fn renamed(&self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        let mut schema = self.clone();
        schema.name = name;
        Ok(schema)
    }

    /// Validates a row against column arity and cell types. Nullability is a
    /// constraint and is checked with the other constraints.
    ///
    /// `Int32` cells stored in an `Int64` column are widened in place so that
    /// equal keys always have equal representations.
    pub fn coerce_row(&self, cells: &mut [Value]) -> Result<()> {
        if cells.len() != self.columns.len() {
            return Err(Error::invalid_operation(format!(
                "table {} has {} columns, row has {} cells",
                self.name,
                self.columns.len(),
                cells.len()
            )));
        }
        for (column, cell) in self.columns.iter().zip(cells.iter_mut()) {
            let Some(got) = cell.data_type() else {
                continue;
            };
            if !column.data_type().accepts(got) {
                return Err(Error::TypeMismatch {
                    column: column.name().to_string(),
                    expected: column.data_type(),
                    got,
                });
            }
            if column.data_type() == DataType::Int64 {
                if let Value::Int32(v) = cell {
                    *cell = Value::Int64(i64::from(*v));
                }
            }
        }
        Ok(())
    }
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Table, column and constraint names are ASCII identifiers.
pub(crate) fn check_naming_rules(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(Error::invalid_schema("Name cannot be empty"));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::invalid_schema(format!(
            "Name must start with letter or underscore: {}",
            name
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::invalid_schema(format!(
            "Name contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}

/// Builds a [`TableSchema`], validating every name and reference as it goes.
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    constraints: Constraints,
}

impl TableBuilder {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            columns: Vec::new(),
            constraints: Constraints::new(),
        })
    }

    fn require_columns(&self, columns: &[&str]) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::invalid_schema("Key must name at least one column"));
        }
        for name in columns {
            if !self.columns.iter().any(|c| c.name() == *name) {
                return Err(Error::invalid_schema(format!("Column not found: {}", name)));
            }
        }
        Ok(())
    }

    fn check_constraint_name(&self, name: &str) -> Result<()> {
        check_naming_rules(name)?;
        if self.constraints.names().any(|n| n == name) {
            return Err(Error::invalid_schema(format!(
                "Constraint already exists: {}",
                name
            )));
        }
        Ok(())
    }

    pub fn add_column(self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        self.add_column_def(Column::new(name, data_type))
    }

    /// Adds a column carrying its own nullability and default.
    pub fn add_column_def(mut self, column: Column) -> Result<Self> {
        check_naming_rules(column.name())?;
        if self.columns.iter().any(|c| c.name() == column.name()) {
            return Err(Error::invalid_schema(format!(
                "Column already exists: {}",
                column.name()
            )));
        }
        self.columns.push(column);
        Ok(self)
    }

    /// Marks columns as nullable. Unknown names are ignored.
    pub fn add_nullable(mut self, columns: &[&str]) -> Self {
        for col in self.columns.iter_mut().filter(|c| columns.contains(&c.name())) {
            *col = col.clone().nullable(true);
        }
        self
    }

    /// Sets the primary key. Key columns become non-nullable.
    pub fn add_primary_key(mut self, columns: &[&str]) -> Result<Self> {
        if self.constraints.primary_key().is_some() {
            return Err(Error::invalid_schema(format!(
                "Table {} already has a primary key",
                self.name
            )));
        }
        self.require_columns(columns)?;
        let pk_name = format!("pk_{}", self.name);
        self.check_constraint_name(&pk_name)?;

        for col in self.columns.iter_mut().filter(|c| columns.contains(&c.name())) {
            *col = col.clone().nullable(false);
        }
        self.constraints
            .set_primary_key(UniqueKey::new(pk_name, owned(columns), ConstraintTiming::Immediate));
        Ok(self)
    }

    pub fn add_unique(self, name: impl Into<String>, columns: &[&str]) -> Result<Self> {
        self.add_unique_with(name, columns, ConstraintTiming::Immediate)
    }

    pub fn add_unique_with(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        timing: ConstraintTiming,
    ) -> Result<Self> {
        let name = name.into();
        self.check_constraint_name(&name)?;
        self.require_columns(columns)?;
        self.constraints.push_unique(UniqueKey::new(name, owned(columns), timing));
        Ok(self)
    }

    /// Adds a foreign key from `child_column` to `parent_table.parent_column`.
    /// The parent is resolved when rows are checked, so it may be created later.
    pub fn add_foreign_key(
        self,
        name: impl Into<String>,
        child_column: &str,
        parent_table: &str,
        parent_column: &str,
    ) -> Result<Self> {
        self.add_foreign_key_with(
            name,
            child_column,
            parent_table,
            parent_column,
            ConstraintTiming::Immediate,
        )
    }

    pub fn add_foreign_key_with(
        mut self,
        name: impl Into<String>,
        child_column: &str,
        parent_table: &str,
        parent_column: &str,
        timing: ConstraintTiming,
    ) -> Result<Self> {
        let name = name.into();
        self.check_constraint_name(&name)?;
        check_naming_rules(parent_table)?;
        check_naming_rules(parent_column)?;
        self.require_columns(&[child_column])?;
        self.constraints.push_foreign_key(ForeignKey {
            name,
            child_column: child_column.to_string(),
            parent_table: parent_table.to_string(),
            parent_column: parent_column.to_string(),
            timing,
        });
        Ok(self)
    }

    pub fn add_check(self, name: impl Into<String>, expr: CheckExpr) -> Result<Self> {
        self.add_check_with(name, expr, ConstraintTiming::Immediate)
    }

    pub fn add_check_with(
        mut self,
        name: impl Into<String>,
        expr: CheckExpr,
        timing: ConstraintTiming,
    ) -> Result<Self> {
        let name = name.into();
        self.check_constraint_name(&name)?;
        if expr.max_column() >= self.columns.len() {
            return Err(Error::invalid_schema(format!(
                "Check {} references column {} beyond table width {}",
                name,
                expr.max_column(),
                self.columns.len()
            )));
        }
        self.constraints.push_check(CheckConstraint { name, expr, timing });
        Ok(self)
    }

    pub fn build(self) -> Result<TableSchema> {
        if self.columns.is_empty() {
            return Err(Error::invalid_schema(format!(
                "Table {} has no columns",
                self.name
            )));
        }
        Ok(TableSchema::from_parts(
            self.name,
            self.columns,
            self.constraints,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::check::CompareOp;

    fn users() -> TableSchema {
        TableBuilder::new("users")
            .unwrap()
            .add_column("id", DataType::Int64)
            .unwrap()
            .add_column("name", DataType::String)
            .unwrap()
            .add_column("email", DataType::String)
            .unwrap()
            .add_nullable(&["email"])
            .add_primary_key(&["id"])
            .unwrap()
            .add_unique("uq_email", &["email"])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_builder() {
        let table = users();
        assert_eq!(table.name(), "users");
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.primary_key().unwrap().name, "pk_users");
        assert_eq!(table.constraints().unique_keys().len(), 1);
        assert_eq!(table.get_column("email").unwrap().position(), 2);
    }

    #[test]
    fn test_table_get_column() {
        let table = users();
        assert!(table.get_column("id").is_some());
        assert!(table.get_column("unknown").is_none());
        assert!(matches!(
            table.column_index("unknown"),
            Err(Error::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_rejected_definitions() {
        let base = || {
            TableBuilder::new("t")
                .unwrap()
                .add_column("id", DataType::Int64)
                .unwrap()
        };
        let cases: Vec<(&str, Result<TableBuilder>)> = vec![
            ("leading digit", base().add_column("1st", DataType::Int32)),
            ("duplicate column", base().add_column("id", DataType::Int32)),
            ("key on missing column", base().add_unique("uq", &["nope"])),
            ("empty key", base().add_unique("uq", &[])),
            (
                "check beyond width",
                base().add_check("ck", CheckExpr::compare(3, CompareOp::Gt, 0i64)),
            ),
            (
                "duplicate constraint",
                base()
                    .add_unique("uq", &["id"])
                    .and_then(|b| b.add_check("uq", CheckExpr::IsNotNull(0))),
            ),
            (
                "second primary key",
                base()
                    .add_primary_key(&["id"])
                    .and_then(|b| b.add_primary_key(&["id"])),
            ),
        ];
        for (label, result) in cases {
            assert!(
                matches!(result, Err(Error::InvalidSchema { .. })),
                "{} should be rejected",
                label
            );
        }
        assert!(TableBuilder::new("").is_err());
        assert!(TableBuilder::new("bad-name").is_err());
        assert!(TableBuilder::new("x").unwrap().build().is_err());
    }

    #[test]
    fn test_primary_key_not_nullable() {
        let table = TableBuilder::new("t")
            .unwrap()
            .add_column("data", DataType::Bytes)
            .unwrap()
            .add_primary_key(&["data"])
            .unwrap()
            .build()
            .unwrap();
        assert!(!table.get_column("data").unwrap().is_nullable());
    }

    #[test]
    fn test_coerce_row() {
        let table = users();
        let mut row = vec![
            Value::Int32(7),
            Value::String("a".into()),
            Value::Null,
        ];
        table.coerce_row(&mut row).unwrap();
        assert_eq!(row[0], Value::Int64(7));

        let mut bad = vec![Value::String("x".into()), Value::Null, Value::Null];
        assert!(matches!(
            table.coerce_row(&mut bad),
            Err(Error::TypeMismatch { .. })
        ));

        let mut short = vec![Value::Int64(1)];
        assert!(table.coerce_row(&mut short).is_err());
    }

    #[test]
    fn test_renamed() {
        let renamed = users().renamed("people").unwrap();
        assert_eq!(renamed.name(), "people");
        assert_eq!(renamed.column_count(), 3);
    }
}
