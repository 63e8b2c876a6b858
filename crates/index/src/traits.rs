//! Caller-facing key ranges and the rank lookup seam used by the sorted index.

use crate::range::{RangeFlag, RangeValue, SelectableRange};
use keel_core::{RowIndex, Value};
use std::ops::Bound;

/// A range of keys over one column.
///
/// `All` matches every row including NULL and `Only(Value::Null)` matches the
/// NULL rows. A `Span` never matches NULL, whatever its bounds.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyRange {
    All,
    Only(Value),
    Span { lower: Bound<Value>, upper: Bound<Value> },
}

fn edge(value: Value, exclusive: bool) -> Bound<Value> {
    if exclusive {
        Bound::Excluded(value)
    } else {
        Bound::Included(value)
    }
}

impl KeyRange {
    pub fn all() -> Self {
        KeyRange::All
    }

    pub fn only(key: impl Into<Value>) -> Self {
        KeyRange::Only(key.into())
    }

    pub fn lower_bound(value: impl Into<Value>, exclusive: bool) -> Self {
        KeyRange::Span {
            lower: edge(value.into(), exclusive),
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound(value: impl Into<Value>, exclusive: bool) -> Self {
        KeyRange::Span {
            lower: Bound::Unbounded,
            upper: edge(value.into(), exclusive),
        }
    }

    pub fn bound(
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        lower_exclusive: bool,
        upper_exclusive: bool,
    ) -> Self {
        KeyRange::Span {
            lower: edge(lower.into(), lower_exclusive),
            upper: edge(upper.into(), upper_exclusive),
        }
    }

    pub fn contains(&self, key: &Value) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Only(k) => key == k,
            KeyRange::Span { .. } if key.is_null() => false,
            KeyRange::Span { lower, upper } => {
                let above = match lower {
                    Bound::Included(v) => key >= v,
                    Bound::Excluded(v) => key > v,
                    Bound::Unbounded => true,
                };
                let below = match upper {
                    Bound::Included(v) => key <= v,
                    Bound::Excluded(v) => key < v,
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }
}

impl From<KeyRange> for SelectableRange {
    fn from(range: KeyRange) -> Self {
        let (lower, upper) = match range {
            KeyRange::All => return SelectableRange::full(),
            KeyRange::Only(v) => return SelectableRange::equal(v),
            KeyRange::Span { lower, upper } => (lower, upper),
        };
        // Starting after the NULL run keeps NULL rows out of every span.
        let (start_flag, start) = match lower {
            Bound::Included(v) if !v.is_null() => (RangeFlag::FirstValue, v),
            Bound::Excluded(v) => (RangeFlag::AfterLastValue, v),
            _ => (RangeFlag::AfterLastValue, Value::Null),
        };
        let (end_flag, end) = match upper {
            Bound::Included(v) => (RangeFlag::LastValue, RangeValue::Value(v)),
            Bound::Excluded(v) => (RangeFlag::BeforeFirstValue, RangeValue::Value(v)),
            Bound::Unbounded => (RangeFlag::LastValue, RangeValue::LastInSet),
        };
        SelectableRange::new(start_flag, start, end_flag, end)
    }
}

/// Sparse sort ranks for the rows of one column.
///
/// Equal values share a rank and a smaller rank means a smaller value. A lookup
/// that returns `None` for any row makes the caller fall back to comparisons.
pub trait RankLookup {
    fn rank_of(&self, row: RowIndex) -> Option<u64>;
}
