//! Integrity constraint checking.
//!
//! Checks run against [`TableSnapshot`] views, so the same code validates a
//! single statement inside a transaction (against its private working copies)
//! and a whole commit (against the merged view of every table).

use hashbrown::HashMap;
use keel_core::schema::{ConstraintTiming, ForeignKey, TableSchema, UniqueKey};
use keel_core::{ConstraintKind, Error, Result, RowIndex, Value};
use keel_storage::{IndexQuery, RowSet, TableSnapshot};

/// Which constraints a check evaluates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckScope {
    /// Only constraints evaluated after every statement.
    Immediate,
    /// Every constraint, as at commit.
    All,
}

impl CheckScope {
    fn includes(&self, timing: ConstraintTiming) -> bool {
        match self {
            CheckScope::All => true,
            CheckScope::Immediate => timing == ConstraintTiming::Immediate,
        }
    }
}

/// The views of every visible table, keyed by table name.
#[derive(Clone, Debug, Default)]
pub struct ViewSet {
    views: HashMap<String, TableSnapshot>,
}

impl ViewSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, view: TableSnapshot) {
        self.views.insert(view.schema().name().to_string(), view);
    }

    pub fn get(&self, name: &str) -> Option<&TableSnapshot> {
        self.views.get(name)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Tables holding a foreign key to `parent`, with the key.
    fn referencing<'a>(
        &'a self,
        parent: &'a str,
    ) -> impl Iterator<Item = (&'a TableSnapshot, &'a ForeignKey)> + 'a {
        self.views.values().flat_map(move |view| {
            view.schema()
                .constraints()
                .foreign_keys()
                .iter()
                .filter(move |fk| fk.parent_table == parent)
                .map(move |fk| (view, fk))
        })
    }
}

/// Constraint checker for validating database constraints.
pub struct ConstraintChecker;

impl ConstraintChecker {
    /// Checks rows present in `view` after an insert.
    pub fn check_added_rows(
        view: &TableSnapshot,
        rows: &[RowIndex],
        views: &ViewSet,
        scope: CheckScope,
    ) -> Result<()> {
        let schema = view.schema();
        for &row in rows {
            let cells = read_row(view, row)?;
            Self::check_not_null(schema, &cells)?;
            Self::check_types(schema, &cells)?;
            if let Some(pk) = schema.primary_key() {
                if scope.includes(pk.timing) {
                    Self::check_unique(view, pk, ConstraintKind::PrimaryKey, row, &cells)?;
                }
            }
            for key in schema.constraints().unique_keys() {
                if scope.includes(key.timing) {
                    Self::check_unique(view, key, ConstraintKind::Unique, row, &cells)?;
                }
            }
            for fk in schema.constraints().foreign_keys() {
                if scope.includes(fk.timing) {
                    Self::check_foreign_key_for_insert(schema, fk, &cells, views)?;
                }
            }
            for check in schema.constraints().checks() {
                if scope.includes(check.timing) && !check.expr.passes(&cells) {
                    return Err(Error::constraint(
                        ConstraintKind::Check,
                        schema.name(),
                        &check.name,
                        format!("row {} fails the check expression", row),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Checks rows that `view` no longer contains. Only foreign keys that
    /// reference this table can be broken by a removal.
    pub fn check_removed_rows(
        view: &TableSnapshot,
        rows: &[RowIndex],
        views: &ViewSet,
        scope: CheckScope,
    ) -> Result<()> {
        let schema = view.schema();
        for (child, fk) in views.referencing(schema.name()) {
            if !scope.includes(fk.timing) {
                continue;
            }
            let parent_column = schema.column_index(&fk.parent_column)?;
            let child_column = child.schema().column_index(&fk.child_column)?;
            for &row in rows {
                let value = view.cell(parent_column, row)?;
                if value.is_null() || !view.select_equal(parent_column, &value)?.is_empty() {
                    continue;
                }
                let children = child.select_equal(child_column, &value)?;
                if !children.is_empty() {
                    return Err(Error::constraint(
                        ConstraintKind::ForeignKey,
                        child.schema().name(),
                        &fk.name,
                        format!(
                            "cannot remove {:?} from {}: referenced by {} rows",
                            value,
                            schema.name(),
                            children.len()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Checks the not-null constraint for a row.
    pub fn check_not_null(schema: &TableSchema, cells: &[Value]) -> Result<()> {
        for (column, cell) in schema.columns().iter().zip(cells) {
            if cell.is_null() && !column.is_nullable() {
                return Err(Error::constraint(
                    ConstraintKind::NotNull,
                    schema.name(),
                    column.name(),
                    format!("column {} is not nullable", column.name()),
                ));
            }
        }
        Ok(())
    }

    /// Checks that every cell matches its column type.
    pub fn check_types(schema: &TableSchema, cells: &[Value]) -> Result<()> {
        for (column, cell) in schema.columns().iter().zip(cells) {
            if let Some(got) = cell.data_type() {
                if !column.data_type().accepts(got) {
                    return Err(Error::constraint(
                        ConstraintKind::Type,
                        schema.name(),
                        column.name(),
                        format!("expected {:?}, got {:?}", column.data_type(), got),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_unique(
        view: &TableSnapshot,
        key: &UniqueKey,
        kind: ConstraintKind,
        row: RowIndex,
        cells: &[Value],
    ) -> Result<()> {
        let schema = view.schema();
        let columns = schema.key_columns(key)?;
        let key_values: Vec<&Value> = columns.iter().map(|&c| &cells[c]).collect();
        if key_values.iter().any(|v| v.is_null()) {
            if kind == ConstraintKind::PrimaryKey {
                return Err(Error::constraint(
                    kind,
                    schema.name(),
                    &key.name,
                    format!("row {} has a NULL key column", row),
                ));
            }
            return Ok(());
        }

        let candidates = view.select_equal(columns[0], key_values[0])?;
        for other in candidates {
            if other == row {
                continue;
            }
            let mut same = true;
            for (&column, value) in columns.iter().zip(&key_values).skip(1) {
                if view.cell(column, other)? != **value {
                    same = false;
                    break;
                }
            }
            if same {
                return Err(Error::constraint(
                    kind,
                    schema.name(),
                    &key.name,
                    format!("duplicate key {:?} (rows {} and {})", key_values, other, row),
                ));
            }
        }
        Ok(())
    }

    fn check_foreign_key_for_insert(
        schema: &TableSchema,
        fk: &ForeignKey,
        cells: &[Value],
        views: &ViewSet,
    ) -> Result<()> {
        let value = &cells[schema.column_index(&fk.child_column)?];
        if value.is_null() {
            return Ok(());
        }
        let violation = |message: String| {
            Error::constraint(ConstraintKind::ForeignKey, schema.name(), &fk.name, message)
        };
        let Some(parent) = views.get(&fk.parent_table) else {
            return Err(violation(format!(
                "referenced table {} does not exist",
                fk.parent_table
            )));
        };
        let parent_column = parent.schema().column_index(&fk.parent_column)?;
        if parent.select_equal(parent_column, value)?.is_empty() {
            return Err(violation(format!(
                "referenced key {:?} does not exist in {}",
                value, fk.parent_table
            )));
        }
        Ok(())
    }
}

fn read_row(view: &TableSnapshot, row: RowIndex) -> Result<Vec<Value>> {
    (0..view.column_count())
        .map(|column| view.cell(column, row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::schema::{CheckExpr, CompareOp, TableBuilder};
    use keel_core::DataType;
    use keel_storage::{CellCache, JournalEntry, MasterTableStore, StoreOptions};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn users() -> TableSchema {
        TableBuilder::new("users")
            .unwrap()
            .add_column("id", DataType::Int64)
            .unwrap()
            .add_column("email", DataType::String)
            .unwrap()
            .add_column("age", DataType::Int32)
            .unwrap()
            .add_nullable(&["email", "age"])
            .add_primary_key(&["id"])
            .unwrap()
            .add_unique("uq_email", &["email"])
            .unwrap()
            .add_check("ck_age", CheckExpr::compare(2, CompareOp::GtEq, 0))
            .unwrap()
            .build()
            .unwrap()
    }

    fn orders() -> TableSchema {
        TableBuilder::new("orders")
            .unwrap()
            .add_column("id", DataType::Int64)
            .unwrap()
            .add_column("user_id", DataType::Int64)
            .unwrap()
            .add_nullable(&["user_id"])
            .add_primary_key(&["id"])
            .unwrap()
            .add_foreign_key("fk_orders_user", "user_id", "users", "id")
            .unwrap()
            .build()
            .unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        users: TableSnapshot,
        orders: TableSnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cache = Arc::new(CellCache::new(64));
            let options = StoreOptions {
                sync_writes: false,
                ..StoreOptions::default()
            };
            let users = MasterTableStore::create(dir.path(), 1, users(), cache.clone(), options.clone())
                .unwrap();
            let orders =
                MasterTableStore::create(dir.path(), 2, orders(), cache, options).unwrap();
            Self {
                _dir: dir,
                users: TableSnapshot::committed(users).to_working(),
                orders: TableSnapshot::committed(orders).to_working(),
            }
        }

        fn add(view: &mut TableSnapshot, cells: Vec<Value>) -> RowIndex {
            let row = view.store().add_row(cells).unwrap();
            view.apply(JournalEntry::Add(row)).unwrap();
            row
        }

        fn views(&self) -> ViewSet {
            let mut views = ViewSet::new();
            views.insert(self.users.clone());
            views.insert(self.orders.clone());
            views
        }
    }

    fn user(id: i64, email: Option<&str>, age: Option<i32>) -> Vec<Value> {
        vec![id.into(), email.into(), age.into()]
    }

    #[test]
    fn test_primary_key_and_unique() {
        let mut f = Fixture::new();
        let a = Fixture::add(&mut f.users, user(1, Some("a@x"), Some(30)));
        ConstraintChecker::check_added_rows(&f.users, &[a], &f.views(), CheckScope::All).unwrap();

        let b = Fixture::add(&mut f.users, user(1, Some("b@x"), None));
        let err = ConstraintChecker::check_added_rows(&f.users, &[b], &f.views(), CheckScope::All)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation { kind: ConstraintKind::PrimaryKey, .. }
        ));

        let c = Fixture::add(&mut f.users, user(2, Some("a@x"), None));
        let err = ConstraintChecker::check_added_rows(&f.users, &[c], &f.views(), CheckScope::All)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation { kind: ConstraintKind::Unique, .. }
        ));

        // NULLs never collide in a unique key.
        let d = Fixture::add(&mut f.users, user(3, None, None));
        let e = Fixture::add(&mut f.users, user(4, None, None));
        ConstraintChecker::check_added_rows(&f.users, &[d, e], &f.views(), CheckScope::All)
            .unwrap();
    }

    #[test]
    fn test_not_null_and_check() {
        let mut f = Fixture::new();
        let row = Fixture::add(&mut f.users, vec![Value::Null, Value::Null, Value::Null]);
        let err =
            ConstraintChecker::check_added_rows(&f.users, &[row], &f.views(), CheckScope::Immediate)
                .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation { kind: ConstraintKind::NotNull, .. }
        ));

        let row = Fixture::add(&mut f.users, user(9, None, Some(-1)));
        let err =
            ConstraintChecker::check_added_rows(&f.users, &[row], &f.views(), CheckScope::Immediate)
                .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation { kind: ConstraintKind::Check, .. }
        ));
    }

    #[test]
    fn test_foreign_key_restrict() {
        let mut f = Fixture::new();
        let parent = Fixture::add(&mut f.users, user(1, None, None));
        let child = Fixture::add(&mut f.orders, vec![10i64.into(), 1i64.into()]);
        ConstraintChecker::check_added_rows(&f.orders, &[child], &f.views(), CheckScope::All)
            .unwrap();

        let orphan = Fixture::add(&mut f.orders, vec![11i64.into(), 2i64.into()]);
        assert!(ConstraintChecker::check_added_rows(
            &f.orders,
            &[orphan],
            &f.views(),
            CheckScope::All
        )
        .is_err());

        f.users.apply(JournalEntry::Remove(parent)).unwrap();
        let err =
            ConstraintChecker::check_removed_rows(&f.users, &[parent], &f.views(), CheckScope::All)
                .unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation { kind: ConstraintKind::ForeignKey, .. }
        ));

        // Another row still supplies the referenced key.
        Fixture::add(&mut f.users, user(1, None, None));
        ConstraintChecker::check_removed_rows(&f.users, &[parent], &f.views(), CheckScope::All)
            .unwrap();
    }
}
