//! Declared integrity constraints of a table.

use super::check::CheckExpr;

/// When a constraint is evaluated.
///
/// Every constraint is evaluated at commit. `Immediate` constraints are also
/// evaluated after each statement that touches the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConstraintTiming {
    #[default]
    Immediate,
    Deferred,
}

impl ConstraintTiming {
    pub(crate) fn tag(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        [ConstraintTiming::Immediate, ConstraintTiming::Deferred]
            .into_iter()
            .find(|t| t.tag() == tag)
    }
}

/// Primary key or unique key: no two live rows share the same tuple of
/// non-NULL values in `columns`.
#[derive(Clone, Debug, PartialEq)]
pub struct UniqueKey {
    pub name: String,
    /// Column names in key order.
    pub columns: Vec<String>,
    pub timing: ConstraintTiming,
}

impl UniqueKey {
    pub fn new(name: impl Into<String>, columns: Vec<String>, timing: ConstraintTiming) -> Self {
        Self { name: name.into(), columns, timing }
    }
}

/// Single-column reference from a child table to a parent column.
///
/// Removing a referenced parent row is rejected while children still point
/// at it.
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
    pub timing: ConstraintTiming,
}

/// A row passes when `expr` does not evaluate to false.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckConstraint {
    pub name: String,
    pub expr: CheckExpr,
    pub timing: ConstraintTiming,
}

/// All constraints declared on one table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Constraints {
    primary_key: Option<UniqueKey>,
    unique: Vec<UniqueKey>,
    foreign_keys: Vec<ForeignKey>,
    checks: Vec<CheckConstraint>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_primary_key(&mut self, key: UniqueKey) {
        self.primary_key = Some(key);
    }

    pub(crate) fn push_unique(&mut self, key: UniqueKey) {
        self.unique.push(key);
    }

    pub(crate) fn push_foreign_key(&mut self, fk: ForeignKey) {
        self.foreign_keys.push(fk);
    }

    pub(crate) fn push_check(&mut self, check: CheckConstraint) {
        self.checks.push(check);
    }

    #[inline]
    pub fn primary_key(&self) -> Option<&UniqueKey> {
        self.primary_key.as_ref()
    }

    /// Unique keys other than the primary key.
    #[inline]
    pub fn unique_keys(&self) -> &[UniqueKey] {
        &self.unique
    }

    #[inline]
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    #[inline]
    pub fn checks(&self) -> &[CheckConstraint] {
        &self.checks
    }

    /// Names of every declared constraint.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.primary_key
            .iter()
            .chain(&self.unique)
            .map(|k| k.name.as_str())
            .chain(self.foreign_keys.iter().map(|k| k.name.as_str()))
            .chain(self.checks.iter().map(|k| k.name.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.names().next().is_none()
    }
}
