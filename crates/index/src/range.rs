//! Range descriptions for sorted index selection.
//!
//! A range is two points, each a `(flag, value)` pair. The flag says where the
//! point sits relative to the run of rows equal to the value, so open and
//! closed bounds resolve through the same position arithmetic.

use keel_core::Value;

/// Position of a range point relative to the rows equal to its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeFlag {
    /// The first row equal to the value (or where it would be).
    FirstValue,
    /// The last row equal to the value (or the last row before it).
    LastValue,
    /// The last row strictly before the value.
    BeforeFirstValue,
    /// The first row strictly after the value.
    AfterLastValue,
}

/// The value of a range point.
#[derive(Clone, Debug, PartialEq)]
pub enum RangeValue {
    /// A concrete value.
    Value(Value),
    /// The value of the first row in the index.
    FirstInSet,
    /// The value of the last row in the index.
    LastInSet,
}

impl From<Value> for RangeValue {
    fn from(v: Value) -> Self {
        RangeValue::Value(v)
    }
}

/// An inclusive range of positions in a sorted index.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectableRange {
    pub start_flag: RangeFlag,
    pub start: RangeValue,
    pub end_flag: RangeFlag,
    pub end: RangeValue,
}

impl SelectableRange {
    pub fn new(
        start_flag: RangeFlag,
        start: impl Into<RangeValue>,
        end_flag: RangeFlag,
        end: impl Into<RangeValue>,
    ) -> Self {
        Self {
            start_flag,
            start: start.into(),
            end_flag,
            end: end.into(),
        }
    }

    /// Every row, NULL included.
    pub fn full() -> Self {
        Self::new(
            RangeFlag::FirstValue,
            RangeValue::FirstInSet,
            RangeFlag::LastValue,
            RangeValue::LastInSet,
        )
    }

    /// Rows equal to `value`.
    pub fn equal(value: Value) -> Self {
        Self::new(
            RangeFlag::FirstValue,
            value.clone(),
            RangeFlag::LastValue,
            value,
        )
    }

    /// Non-NULL rows from `start` onwards.
    pub(crate) fn from_value(start_flag: RangeFlag, start: Value) -> Self {
        Self::new(start_flag, start, RangeFlag::LastValue, RangeValue::LastInSet)
    }

    /// Non-NULL rows up to `end`.
    pub(crate) fn non_null_to(end_flag: RangeFlag, end: Value) -> Self {
        Self::new(RangeFlag::AfterLastValue, Value::Null, end_flag, end)
    }
}
