//! Comparators that order row indices by column value.
//!
//! A sorted index stores row indices only. The values they are ordered by live
//! in the table store, so every search goes through an [`IndexComparator`].
//! Reads may hit storage, hence every comparison is fallible.

use keel_core::{Result, RowIndex, Value};
use std::cmp::Ordering;

/// Orders rows by the value of one column.
pub trait IndexComparator {
    /// Compares the column values of two rows.
    fn compare_rows(&self, a: RowIndex, b: RowIndex) -> Result<Ordering>;

    /// Compares the column value of `row` against `value`.
    fn compare_value(&self, row: RowIndex, value: &Value) -> Result<Ordering>;
}

impl<C: IndexComparator + ?Sized> IndexComparator for &C {
    fn compare_rows(&self, a: RowIndex, b: RowIndex) -> Result<Ordering> {
        (**self).compare_rows(a, b)
    }

    fn compare_value(&self, row: RowIndex, value: &Value) -> Result<Ordering> {
        (**self).compare_value(row, value)
    }
}

/// Orders rows by their row index. Used by the master row-existence index.
#[derive(Clone, Copy, Debug, Default)]
pub struct RowOrder;

impl IndexComparator for RowOrder {
    fn compare_rows(&self, a: RowIndex, b: RowIndex) -> Result<Ordering> {
        Ok(a.cmp(&b))
    }

    fn compare_value(&self, row: RowIndex, value: &Value) -> Result<Ordering> {
        Ok(match value.as_i64() {
            Some(v) if v < 0 => Ordering::Greater,
            Some(v) => row.cmp(&(v as u64)),
            // NULL and non-integers sort before every row.
            None => Ordering::Greater,
        })
    }
}

/// Orders rows by values held in memory, where row `r` has value `values[r]`.
#[derive(Clone, Copy, Debug)]
pub struct SliceComparator<'a> {
    values: &'a [Value],
}

impl<'a> SliceComparator<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    fn value(&self, row: RowIndex) -> Result<&'a Value> {
        self.values.get(row as usize).ok_or_else(|| {
            keel_core::Error::consistency(format!(
                "row {} beyond {} in-memory values",
                row,
                self.values.len()
            ))
        })
    }
}

impl IndexComparator for SliceComparator<'_> {
    fn compare_rows(&self, a: RowIndex, b: RowIndex) -> Result<Ordering> {
        Ok(self.value(a)?.cmp(self.value(b)?))
    }

    fn compare_value(&self, row: RowIndex, value: &Value) -> Result<Ordering> {
        Ok(self.value(row)?.cmp(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_order() {
        let cmp = RowOrder;
        assert_eq!(cmp.compare_rows(1, 2).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare_value(5, &Value::Int64(5)).unwrap(), Ordering::Equal);
        assert_eq!(cmp.compare_value(0, &Value::Null).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_slice_comparator() {
        let values = vec![Value::Int64(3), Value::Null, Value::Int64(1)];
        let cmp = SliceComparator::new(&values);
        assert_eq!(cmp.compare_rows(0, 2).unwrap(), Ordering::Greater);
        assert_eq!(cmp.compare_rows(1, 2).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare_value(0, &Value::Int64(3)).unwrap(), Ordering::Equal);
        assert!(cmp.compare_rows(0, 9).is_err());
    }
}
