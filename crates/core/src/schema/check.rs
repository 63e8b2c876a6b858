//! Check-constraint expressions.
//!
//! A deliberately small, serializable predicate language evaluated against one row.
//! Evaluation is three-valued: a comparison involving NULL is unknown, and a check
//! constraint only fails when its expression is definitely false.

use crate::value::Value;
use std::cmp::Ordering;

/// Comparison operator in a check expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            CompareOp::Eq => 0,
            CompareOp::NotEq => 1,
            CompareOp::Lt => 2,
            CompareOp::LtEq => 3,
            CompareOp::Gt => 4,
            CompareOp::GtEq => 5,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompareOp::Eq),
            1 => Some(CompareOp::NotEq),
            2 => Some(CompareOp::Lt),
            3 => Some(CompareOp::LtEq),
            4 => Some(CompareOp::Gt),
            5 => Some(CompareOp::GtEq),
            _ => None,
        }
    }

    fn matches(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        }
    }
}

/// A boolean expression over the columns of one row.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckExpr {
    /// `column <op> literal`
    Compare {
        column: usize,
        op: CompareOp,
        value: Value,
    },
    /// `column IS NOT NULL`
    IsNotNull(usize),
    And(Box<CheckExpr>, Box<CheckExpr>),
    Or(Box<CheckExpr>, Box<CheckExpr>),
    Not(Box<CheckExpr>),
}

impl CheckExpr {
    /// Builds `column <op> value`.
    pub fn compare(column: usize, op: CompareOp, value: impl Into<Value>) -> Self {
        CheckExpr::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn and(self, other: CheckExpr) -> Self {
        CheckExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: CheckExpr) -> Self {
        CheckExpr::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        CheckExpr::Not(Box::new(self))
    }

    /// Evaluates against a row. `None` is SQL unknown.
    pub fn evaluate(&self, cells: &[Value]) -> Option<bool> {
        match self {
            CheckExpr::Compare { column, op, value } => {
                let cell = cells.get(*column)?;
                if cell.is_null() || value.is_null() {
                    return None;
                }
                Some(op.matches(cell.cmp(value)))
            }
            CheckExpr::IsNotNull(column) => Some(!cells.get(*column).map_or(true, Value::is_null)),
            CheckExpr::And(a, b) => match (a.evaluate(cells), b.evaluate(cells)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            CheckExpr::Or(a, b) => match (a.evaluate(cells), b.evaluate(cells)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            CheckExpr::Not(a) => a.evaluate(cells).map(|v| !v),
        }
    }

    /// Returns true unless the expression is definitely false.
    pub fn passes(&self, cells: &[Value]) -> bool {
        self.evaluate(cells) != Some(false)
    }

    /// Returns the highest column index referenced by the expression.
    pub fn max_column(&self) -> usize {
        match self {
            CheckExpr::Compare { column, .. } | CheckExpr::IsNotNull(column) => *column,
            CheckExpr::And(a, b) | CheckExpr::Or(a, b) => a.max_column().max(b.max_column()),
            CheckExpr::Not(a) => a.max_column(),
        }
    }
}
