//! Sorted column index.
//!
//! A `SortedIndex` keeps the row indices of one column ordered by cell value.
//! It never stores values itself: every search asks an [`IndexComparator`] to
//! compare a stored row against a probe, so the same structure serves every
//! column type and the master row-existence index.
//!
//! # Ordering
//!
//! NULL sorts first. Rows with equal values keep their insertion order because
//! a new row is always placed after the last row equal to it.

use crate::block_list::BlockList;
use crate::comparator::IndexComparator;
use crate::range::{RangeFlag, RangeValue, SelectableRange};
use crate::traits::RankLookup;
use keel_core::codec::{ByteReader, ByteWriter};
use keel_core::{Error, Result, RowIndex, Value};
use std::cmp::Ordering;

/// Default subset size up to which `derive_subset_index` insertion sorts.
pub const DEFAULT_SUBSET_SORT_THRESHOLD: usize = 250;

/// The thing a stored row is compared against during a search.
#[derive(Clone, Copy)]
enum Probe<'a> {
    Value(&'a Value),
    Row(RowIndex),
}

impl Probe<'_> {
    /// Compares stored `row` against the probe.
    fn compare(&self, row: RowIndex, cmp: &dyn IndexComparator) -> Result<Ordering> {
        match self {
            Probe::Value(v) => cmp.compare_value(row, v),
            Probe::Row(r) => cmp.compare_rows(row, *r),
        }
    }
}

/// An ordered list of row indices for one column.
#[derive(Clone, Debug, Default)]
pub struct SortedIndex {
    list: BlockList,
    immutable: bool,
    created_size: usize,
}

impl SortedIndex {
    /// Creates an empty mutable index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mutable index from rows already in sorted order.
    pub fn from_sorted(rows: Vec<RowIndex>) -> Self {
        Self {
            list: BlockList::from_ordered(rows),
            immutable: false,
            created_size: 0,
        }
    }

    /// Number of rows in the index.
    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Returns a copy of this index.
    ///
    /// Both kinds of copy share storage with the source until one side is
    /// mutated. An immutable copy rejects mutation and remembers its size so
    /// [`verify_unchanged`](Self::verify_unchanged) can detect interference.
    pub fn copy(&self, immutable: bool) -> SortedIndex {
        SortedIndex {
            list: self.list.clone(),
            immutable,
            created_size: self.list.len(),
        }
    }

    /// Fails with `ConsistencyAssertion` if an immutable copy changed size.
    pub fn verify_unchanged(&self) -> Result<()> {
        if self.immutable && self.list.len() != self.created_size {
            return Err(Error::consistency(format!(
                "immutable index changed size from {} to {}",
                self.created_size,
                self.list.len()
            )));
        }
        Ok(())
    }

    fn check_mutable(&self) -> Result<()> {
        if self.immutable {
            return Err(Error::ImmutableViolation);
        }
        Ok(())
    }

    /// Number of rows strictly before `probe`.
    fn lower_bound(&self, probe: Probe<'_>, cmp: &dyn IndexComparator) -> Result<usize> {
        self.list
            .partition_point(|r| Ok(probe.compare(r, cmp)? == Ordering::Less))
    }

    /// Number of rows at or before `probe`.
    fn upper_bound(&self, probe: Probe<'_>, cmp: &dyn IndexComparator) -> Result<usize> {
        self.list
            .partition_point(|r| Ok(probe.compare(r, cmp)? != Ordering::Greater))
    }

    /// Position of the first row equal to `value`, if any.
    pub fn search_first(&self, value: &Value, cmp: &dyn IndexComparator) -> Result<Option<usize>> {
        let pos = self.lower_bound(Probe::Value(value), cmp)?;
        match self.list.get(pos) {
            Some(r) if cmp.compare_value(r, value)? == Ordering::Equal => Ok(Some(pos)),
            _ => Ok(None),
        }
    }

    /// Position of the last row equal to `value`, if any.
    pub fn search_last(&self, value: &Value, cmp: &dyn IndexComparator) -> Result<Option<usize>> {
        let pos = self.upper_bound(Probe::Value(value), cmp)?;
        if pos == 0 {
            return Ok(None);
        }
        match self.list.get(pos - 1) {
            Some(r) if cmp.compare_value(r, value)? == Ordering::Equal => Ok(Some(pos - 1)),
            _ => Ok(None),
        }
    }

    /// Inserts `row` after every row whose value is equal to it.
    pub fn insert(&mut self, row: RowIndex, cmp: &dyn IndexComparator) -> Result<()> {
        self.check_mutable()?;
        let pos = self.upper_bound(Probe::Row(row), cmp)?;
        if pos > 0 && self.list.get(pos - 1) == Some(row) {
            return Err(Error::consistency(format!(
                "row {} is already in the index",
                row
            )));
        }
        self.list.insert(pos, row);
        Ok(())
    }

    /// Removes `row`, searching the run of rows equal to it.
    pub fn remove(&mut self, row: RowIndex, cmp: &dyn IndexComparator) -> Result<()> {
        self.check_mutable()?;
        let start = self.lower_bound(Probe::Row(row), cmp)?;
        let end = self.upper_bound(Probe::Row(row), cmp)?;
        let mut run = Vec::new();
        self.list.collect_range(start, end, &mut run);
        match run.iter().position(|r| *r == row) {
            Some(offset) => {
                self.list.remove(start + offset);
                Ok(())
            }
            None => Err(Error::consistency(format!(
                "row {} not found at its position in the index",
                row
            ))),
        }
    }

    /// Returns true if `row` is in the index.
    pub fn contains(&self, row: RowIndex, cmp: &dyn IndexComparator) -> Result<bool> {
        let start = self.lower_bound(Probe::Row(row), cmp)?;
        let end = self.upper_bound(Probe::Row(row), cmp)?;
        let mut run = Vec::new();
        self.list.collect_range(start, end, &mut run);
        Ok(run.contains(&row))
    }

    /// Iterates all rows in index order.
    pub fn iter(&self) -> impl Iterator<Item = RowIndex> + '_ {
        self.list.iter()
    }

    /// Returns all rows in index order.
    pub fn to_vec(&self) -> Vec<RowIndex> {
        self.list.to_vec()
    }

    fn resolve_probe<'a>(&self, value: &'a RangeValue) -> Option<Probe<'a>> {
        match value {
            RangeValue::Value(v) => Some(Probe::Value(v)),
            RangeValue::FirstInSet => self.list.first().map(Probe::Row),
            RangeValue::LastInSet => self.list.last().map(Probe::Row),
        }
    }

    /// Resolves a range point to a signed position.
    fn position_of(
        &self,
        flag: RangeFlag,
        value: &RangeValue,
        cmp: &dyn IndexComparator,
    ) -> Result<Option<i64>> {
        let Some(probe) = self.resolve_probe(value) else {
            return Ok(None);
        };
        let pos = match flag {
            RangeFlag::FirstValue => self.lower_bound(probe, cmp)? as i64,
            RangeFlag::LastValue => self.upper_bound(probe, cmp)? as i64 - 1,
            RangeFlag::BeforeFirstValue => self.lower_bound(probe, cmp)? as i64 - 1,
            RangeFlag::AfterLastValue => self.upper_bound(probe, cmp)? as i64,
        };
        Ok(Some(pos))
    }

    /// Resolves a range to a half-open span of positions.
    fn span_of(
        &self,
        range: &SelectableRange,
        cmp: &dyn IndexComparator,
    ) -> Result<Option<(usize, usize)>> {
        if self.list.is_empty() {
            return Ok(None);
        }
        let Some(start) = self.position_of(range.start_flag, &range.start, cmp)? else {
            return Ok(None);
        };
        let Some(end) = self.position_of(range.end_flag, &range.end, cmp)? else {
            return Ok(None);
        };
        let start = start.max(0);
        let end = end.min(self.list.len() as i64 - 1);
        if end < start {
            return Ok(None);
        }
        Ok(Some((start as usize, end as usize + 1)))
    }

    /// Selects every row in `range`, in index order.
    pub fn select_range(
        &self,
        range: &SelectableRange,
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        let mut out = Vec::new();
        if let Some((start, end)) = self.span_of(range, cmp)? {
            self.list.collect_range(start, end, &mut out);
        }
        Ok(out)
    }

    /// Selects the union of `ranges`, in index order, each row at most once.
    pub fn select_ranges(
        &self,
        ranges: &[SelectableRange],
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        let mut spans = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(span) = self.span_of(range, cmp)? {
                spans.push(span);
            }
        }
        spans.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        let mut out = Vec::new();
        for (start, end) in merged {
            self.list.collect_range(start, end, &mut out);
        }
        Ok(out)
    }

    /// Selects every row, NULL included.
    pub fn select_all(&self) -> Vec<RowIndex> {
        self.list.to_vec()
    }

    /// Selects rows equal to `value`.
    pub fn select_equal(&self, value: &Value, cmp: &dyn IndexComparator) -> Result<Vec<RowIndex>> {
        self.select_range(&SelectableRange::equal(value.clone()), cmp)
    }

    /// Selects non-NULL rows not equal to `value`.
    pub fn select_not_equal(
        &self,
        value: &Value,
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        self.select_ranges(
            &[
                SelectableRange::non_null_to(RangeFlag::BeforeFirstValue, value.clone()),
                SelectableRange::from_value(RangeFlag::AfterLastValue, value.clone()),
            ],
            cmp,
        )
    }

    /// Selects the rows holding the smallest value.
    pub fn select_first(&self, cmp: &dyn IndexComparator) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::new(
                RangeFlag::FirstValue,
                RangeValue::FirstInSet,
                RangeFlag::LastValue,
                RangeValue::FirstInSet,
            ),
            cmp,
        )
    }

    /// Selects every row except those holding the smallest value.
    pub fn select_rest(&self, cmp: &dyn IndexComparator) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::new(
                RangeFlag::AfterLastValue,
                RangeValue::FirstInSet,
                RangeFlag::LastValue,
                RangeValue::LastInSet,
            ),
            cmp,
        )
    }

    /// Selects the rows holding the largest value.
    pub fn select_last(&self, cmp: &dyn IndexComparator) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::new(
                RangeFlag::FirstValue,
                RangeValue::LastInSet,
                RangeFlag::LastValue,
                RangeValue::LastInSet,
            ),
            cmp,
        )
    }

    /// Selects every row except those holding the largest value.
    pub fn select_not_last(&self, cmp: &dyn IndexComparator) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::new(
                RangeFlag::FirstValue,
                RangeValue::FirstInSet,
                RangeFlag::BeforeFirstValue,
                RangeValue::LastInSet,
            ),
            cmp,
        )
    }

    /// Selects non-NULL rows `< value`.
    pub fn select_less(&self, value: &Value, cmp: &dyn IndexComparator) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::non_null_to(RangeFlag::BeforeFirstValue, value.clone()),
            cmp,
        )
    }

    /// Selects non-NULL rows `<= value`.
    pub fn select_less_or_equal(
        &self,
        value: &Value,
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::non_null_to(RangeFlag::LastValue, value.clone()),
            cmp,
        )
    }

    /// Selects rows `> value`.
    pub fn select_greater(
        &self,
        value: &Value,
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        self.select_range(
            &SelectableRange::from_value(RangeFlag::AfterLastValue, value.clone()),
            cmp,
        )
    }

    /// Selects rows `>= value`. A NULL bound selects the non-NULL rows.
    pub fn select_greater_or_equal(
        &self,
        value: &Value,
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        let flag = if value.is_null() {
            RangeFlag::AfterLastValue
        } else {
            RangeFlag::FirstValue
        };
        self.select_range(&SelectableRange::from_value(flag, value.clone()), cmp)
    }

    /// Selects non-NULL rows with `low <= value < high`.
    pub fn select_between(
        &self,
        low: &Value,
        high: &Value,
        cmp: &dyn IndexComparator,
    ) -> Result<Vec<RowIndex>> {
        let start_flag = if low.is_null() {
            RangeFlag::AfterLastValue
        } else {
            RangeFlag::FirstValue
        };
        self.select_range(
            &SelectableRange::new(
                start_flag,
                low.clone(),
                RangeFlag::BeforeFirstValue,
                high.clone(),
            ),
            cmp,
        )
    }

    /// Builds a new mutable index over exactly `rows`, ordered by value.
    ///
    /// Rows with equal values keep their order in `rows`. Subsets larger than
    /// `threshold` are sorted by rank when `ranks` covers every row; otherwise
    /// they are insertion sorted through `cmp`. Both paths give the same order.
    pub fn derive_subset_index(
        rows: &[RowIndex],
        cmp: &dyn IndexComparator,
        ranks: Option<&dyn RankLookup>,
        threshold: usize,
    ) -> Result<SortedIndex> {
        if rows.len() > threshold {
            if let Some(ranks) = ranks {
                let ranked: Option<Vec<(u64, RowIndex)>> = rows
                    .iter()
                    .map(|r| ranks.rank_of(*r).map(|rank| (rank, *r)))
                    .collect();
                if let Some(mut ranked) = ranked {
                    ranked.sort_by_key(|(rank, _)| *rank);
                    return Ok(SortedIndex::from_sorted(
                        ranked.into_iter().map(|(_, r)| r).collect(),
                    ));
                }
            }
        }

        let mut index = SortedIndex::new();
        for row in rows {
            let pos = index.upper_bound(Probe::Row(*row), cmp)?;
            index.list.insert(pos, *row);
        }
        Ok(index)
    }

    /// Serializes the ordered row list.
    pub fn write_to(&self, out: &mut ByteWriter) {
        out.put_u64(self.list.len() as u64);
        for row in self.list.iter() {
            out.put_u64(row);
        }
    }

    /// Deserializes an index written by [`write_to`](Self::write_to).
    ///
    /// Fails with `Format` when `expected_count` is given and differs from the
    /// stored count.
    pub fn read_from(reader: &mut ByteReader<'_>, expected_count: Option<usize>) -> Result<Self> {
        let count = reader.get_u64()? as usize;
        if let Some(expected) = expected_count {
            if count != expected {
                return Err(Error::format(format!(
                    "index holds {} rows, table has {}",
                    count, expected
                )));
            }
        }
        if count > reader.remaining() / 8 {
            return Err(Error::format(format!(
                "index count {} exceeds remaining data",
                count
            )));
        }
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            rows.push(reader.get_u64()?);
        }
        Ok(SortedIndex::from_sorted(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{RowOrder, SliceComparator};
    use hashbrown::HashMap;

    fn build(values: &[Value]) -> SortedIndex {
        let cmp = SliceComparator::new(values);
        let mut index = SortedIndex::new();
        for row in 0..values.len() as u64 {
            index.insert(row, &cmp).unwrap();
        }
        index
    }

    fn ints(vals: &[Option<i64>]) -> Vec<Value> {
        vals.iter().map(|v| Value::from(*v)).collect()
    }

    #[test]
    fn test_insert_keeps_order_and_stability() {
        let values = ints(&[Some(5), Some(1), None, Some(5), Some(3), Some(1)]);
        let index = build(&values);
        assert_eq!(index.to_vec(), vec![2, 1, 5, 4, 0, 3]);
    }

    #[test]
    fn test_duplicate_insert_is_assertion() {
        let values = ints(&[Some(1), Some(2)]);
        let cmp = SliceComparator::new(&values);
        let mut index = build(&values);
        let err = index.insert(1, &cmp).unwrap_err();
        assert!(matches!(err, Error::ConsistencyAssertion { .. }));
    }

    #[test]
    fn test_remove() {
        let values = ints(&[Some(2), Some(2), Some(2), Some(1)]);
        let cmp = SliceComparator::new(&values);
        let mut index = build(&values);
        index.remove(1, &cmp).unwrap();
        assert_eq!(index.to_vec(), vec![3, 0, 2]);
        let err = index.remove(1, &cmp).unwrap_err();
        assert!(matches!(err, Error::ConsistencyAssertion { .. }));
    }

    #[test]
    fn test_selections() {
        let values = ints(&[Some(10), None, Some(20), Some(30), Some(20), None, Some(40)]);
        let cmp = SliceComparator::new(&values);
        let index = build(&values);

        assert_eq!(index.select_all(), vec![1, 5, 0, 2, 4, 3, 6]);
        assert_eq!(index.select_equal(&Value::Int64(20), &cmp).unwrap(), vec![2, 4]);
        assert!(index.select_equal(&Value::Int64(25), &cmp).unwrap().is_empty());
        assert_eq!(index.select_equal(&Value::Null, &cmp).unwrap(), vec![1, 5]);
        assert_eq!(index.select_first(&cmp).unwrap(), vec![1, 5]);
        assert_eq!(index.select_rest(&cmp).unwrap(), vec![0, 2, 4, 3, 6]);
        assert_eq!(index.select_last(&cmp).unwrap(), vec![6]);
        assert_eq!(index.select_not_last(&cmp).unwrap(), vec![1, 5, 0, 2, 4, 3]);
        assert_eq!(index.select_less(&Value::Int64(20), &cmp).unwrap(), vec![0]);
        assert_eq!(
            index.select_less_or_equal(&Value::Int64(20), &cmp).unwrap(),
            vec![0, 2, 4]
        );
        assert_eq!(index.select_greater(&Value::Int64(20), &cmp).unwrap(), vec![3, 6]);
        assert_eq!(
            index.select_greater_or_equal(&Value::Int64(30), &cmp).unwrap(),
            vec![3, 6]
        );
        assert_eq!(
            index.select_greater_or_equal(&Value::Null, &cmp).unwrap(),
            vec![0, 2, 4, 3, 6]
        );
        assert_eq!(
            index
                .select_between(&Value::Int64(20), &Value::Int64(40), &cmp)
                .unwrap(),
            vec![2, 4, 3]
        );
        assert_eq!(
            index.select_not_equal(&Value::Int64(20), &cmp).unwrap(),
            vec![0, 3, 6]
        );
        assert_eq!(index.search_first(&Value::Int64(20), &cmp).unwrap(), Some(3));
        assert_eq!(index.search_last(&Value::Int64(20), &cmp).unwrap(), Some(4));
        assert_eq!(index.search_last(&Value::Int64(21), &cmp).unwrap(), None);
    }

    #[test]
    fn test_select_ranges_union() {
        let values = ints(&[Some(1), Some(2), Some(3), Some(4), Some(5)]);
        let cmp = SliceComparator::new(&values);
        let index = build(&values);
        let rows = index
            .select_ranges(
                &[
                    SelectableRange::from(crate::KeyRange::bound(4i64, 5i64, false, false)),
                    SelectableRange::from(crate::KeyRange::bound(1i64, 2i64, false, false)),
                    SelectableRange::from(crate::KeyRange::bound(2i64, 3i64, false, false)),
                ],
                &cmp,
            )
            .unwrap();
        assert_eq!(rows, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_index() {
        let values: Vec<Value> = Vec::new();
        let cmp = SliceComparator::new(&values);
        let index = SortedIndex::new();
        assert!(index.select_first(&cmp).unwrap().is_empty());
        assert!(index.select_range(&SelectableRange::full(), &cmp).unwrap().is_empty());
    }

    #[test]
    fn test_immutable_copy() {
        let values = ints(&[Some(1), Some(2), Some(3)]);
        let cmp = SliceComparator::new(&values);
        let index = build(&values);

        let mut frozen = index.copy(true);
        assert!(frozen.is_immutable());
        assert!(matches!(frozen.insert(0, &cmp), Err(Error::ImmutableViolation)));
        assert!(matches!(frozen.remove(0, &cmp), Err(Error::ImmutableViolation)));
        frozen.verify_unchanged().unwrap();

        let mut working = frozen.copy(false);
        working.remove(1, &cmp).unwrap();
        assert_eq!(working.len(), 2);
        assert_eq!(frozen.len(), 3);
        frozen.verify_unchanged().unwrap();
    }

    struct MapRanks(HashMap<RowIndex, u64>);

    impl RankLookup for MapRanks {
        fn rank_of(&self, row: RowIndex) -> Option<u64> {
            self.0.get(&row).copied()
        }
    }

    #[test]
    fn test_derive_subset_index() {
        let values = ints(&[Some(3), Some(1), Some(2), Some(1), None, Some(3)]);
        let cmp = SliceComparator::new(&values);
        let subset = [5, 0, 3, 4, 1];

        let by_compare = SortedIndex::derive_subset_index(&subset, &cmp, None, 250).unwrap();
        assert_eq!(by_compare.to_vec(), vec![4, 3, 1, 5, 0]);

        let ranks = MapRanks(
            [(0, 30), (1, 10), (2, 20), (3, 10), (4, 0), (5, 30)]
                .into_iter()
                .collect(),
        );
        let by_rank = SortedIndex::derive_subset_index(&subset, &cmp, Some(&ranks), 2).unwrap();
        assert_eq!(by_rank.to_vec(), by_compare.to_vec());

        let partial = MapRanks([(0, 30)].into_iter().collect());
        let fallback = SortedIndex::derive_subset_index(&subset, &cmp, Some(&partial), 2).unwrap();
        assert_eq!(fallback.to_vec(), by_compare.to_vec());
    }

    #[test]
    fn test_persistence() {
        let mut index = SortedIndex::new();
        for row in [4u64, 9, 1, 7] {
            index.insert(row, &RowOrder).unwrap();
        }
        let mut w = ByteWriter::new();
        index.write_to(&mut w);

        let mut r = ByteReader::new(w.as_slice());
        let loaded = SortedIndex::read_from(&mut r, Some(4)).unwrap();
        assert_eq!(loaded.to_vec(), vec![1, 4, 7, 9]);

        let mut r = ByteReader::new(w.as_slice());
        let err = SortedIndex::read_from(&mut r, Some(5)).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
