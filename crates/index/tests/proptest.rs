//! Property-based tests for keel-index using proptest.
//!
//! Every selection must equal a filtered linear scan of the same values in
//! ascending value order, whatever the interleaving of inserts and removes.

use keel_core::{RowIndex, Value};
use keel_index::{KeyRange, SelectableRange, SliceComparator, SortedIndex};
use proptest::prelude::*;

fn arb_cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        6 => (-20i64..20).prop_map(Value::Int64),
    ]
}

fn arb_bound() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        6 => (-22i64..22).prop_map(Value::Int64),
    ]
}

fn arb_range() -> impl Strategy<Value = KeyRange> {
    prop_oneof![
        Just(KeyRange::All),
        arb_bound().prop_map(KeyRange::Only),
        (arb_bound(), any::<bool>()).prop_map(|(v, ex)| KeyRange::lower_bound(v, ex)),
        (arb_bound(), any::<bool>()).prop_map(|(v, ex)| KeyRange::upper_bound(v, ex)),
        (arb_bound(), arb_bound(), any::<bool>(), any::<bool>())
            .prop_map(|(a, b, lx, ux)| KeyRange::bound(a, b, lx, ux)),
    ]
}

/// Rows currently present, in the order a stable sort by value gives.
fn expected_order(values: &[Value], present: &[RowIndex]) -> Vec<RowIndex> {
    let mut rows = present.to_vec();
    rows.sort_by(|a, b| values[*a as usize].cmp(&values[*b as usize]));
    rows
}

fn scan(values: &[Value], present: &[RowIndex], pred: impl Fn(&Value) -> bool) -> Vec<RowIndex> {
    expected_order(values, present)
        .into_iter()
        .filter(|r| pred(&values[*r as usize]))
        .collect()
}

/// Applies inserts, then removes every row whose flag is set.
fn build(values: &[Value], removals: &[bool]) -> (SortedIndex, Vec<RowIndex>) {
    let cmp = SliceComparator::new(values);
    let mut index = SortedIndex::new();
    let mut present = Vec::new();
    for row in 0..values.len() as u64 {
        index.insert(row, &cmp).unwrap();
        present.push(row);
    }
    for (row, remove) in removals.iter().enumerate() {
        let row = row as u64;
        if *remove && (row as usize) < values.len() {
            index.remove(row, &cmp).unwrap();
            present.retain(|r| *r != row);
        }
    }
    (index, present)
}

proptest! {
    /// Test that the index order is a stable sort of the present rows.
    #[test]
    fn index_order_matches_stable_sort(
        values in prop::collection::vec(arb_cell(), 0..200),
        removals in prop::collection::vec(any::<bool>(), 0..200),
    ) {
        let (index, present) = build(&values, &removals);
        prop_assert_eq!(index.select_all(), expected_order(&values, &present));
    }

    /// Test that range selection equals a filtered scan.
    #[test]
    fn select_range_matches_scan(
        values in prop::collection::vec(arb_cell(), 0..150),
        removals in prop::collection::vec(any::<bool>(), 0..150),
        range in arb_range(),
    ) {
        let cmp = SliceComparator::new(&values);
        let (index, present) = build(&values, &removals);
        let selectable: SelectableRange = range.clone().into();
        let got = index.select_range(&selectable, &cmp).unwrap();
        prop_assert_eq!(got, scan(&values, &present, |v| range.contains(v)));
    }

    /// Test that the comparison selections equal filtered scans.
    #[test]
    fn comparisons_match_scan(
        values in prop::collection::vec(arb_cell(), 0..150),
        removals in prop::collection::vec(any::<bool>(), 0..150),
        probe in (-22i64..22).prop_map(Value::Int64),
        high in (-22i64..22).prop_map(Value::Int64),
    ) {
        let cmp = SliceComparator::new(&values);
        let (index, present) = build(&values, &removals);
        let non_null = |v: &Value| !v.is_null();

        prop_assert_eq!(
            index.select_equal(&probe, &cmp).unwrap(),
            scan(&values, &present, |v| *v == probe)
        );
        prop_assert_eq!(
            index.select_not_equal(&probe, &cmp).unwrap(),
            scan(&values, &present, |v| non_null(v) && *v != probe)
        );
        prop_assert_eq!(
            index.select_less(&probe, &cmp).unwrap(),
            scan(&values, &present, |v| non_null(v) && *v < probe)
        );
        prop_assert_eq!(
            index.select_less_or_equal(&probe, &cmp).unwrap(),
            scan(&values, &present, |v| non_null(v) && *v <= probe)
        );
        prop_assert_eq!(
            index.select_greater(&probe, &cmp).unwrap(),
            scan(&values, &present, |v| *v > probe)
        );
        prop_assert_eq!(
            index.select_greater_or_equal(&probe, &cmp).unwrap(),
            scan(&values, &present, |v| *v >= probe)
        );
        prop_assert_eq!(
            index.select_between(&probe, &high, &cmp).unwrap(),
            scan(&values, &present, |v| non_null(v) && *v >= probe && *v < high)
        );
    }

    /// Test first/last/rest selections against the sorted rows.
    #[test]
    fn first_last_rest_match_scan(
        values in prop::collection::vec(arb_cell(), 0..100),
        removals in prop::collection::vec(any::<bool>(), 0..100),
    ) {
        let cmp = SliceComparator::new(&values);
        let (index, present) = build(&values, &removals);
        let sorted = expected_order(&values, &present);

        match (sorted.first(), sorted.last()) {
            (Some(first), Some(last)) => {
                let min = values[*first as usize].clone();
                let max = values[*last as usize].clone();
                prop_assert_eq!(index.select_first(&cmp).unwrap(), scan(&values, &present, |v| *v == min));
                prop_assert_eq!(index.select_rest(&cmp).unwrap(), scan(&values, &present, |v| *v != min));
                prop_assert_eq!(index.select_last(&cmp).unwrap(), scan(&values, &present, |v| *v == max));
                prop_assert_eq!(index.select_not_last(&cmp).unwrap(), scan(&values, &present, |v| *v != max));
            }
            _ => {
                prop_assert!(index.select_first(&cmp).unwrap().is_empty());
                prop_assert!(index.select_last(&cmp).unwrap().is_empty());
            }
        }
    }

    /// Test that a derived subset index is a stable sort of the subset.
    #[test]
    fn derive_subset_is_stable_sort(
        values in prop::collection::vec(arb_cell(), 1..120),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0..80),
    ) {
        let cmp = SliceComparator::new(&values);
        let mut subset: Vec<RowIndex> = picks.iter().map(|p| p.index(values.len()) as u64).collect();
        let mut seen = std::collections::HashSet::new();
        subset.retain(|r| seen.insert(*r));

        let derived = SortedIndex::derive_subset_index(&subset, &cmp, None, 250).unwrap();
        let mut expected = subset.clone();
        expected.sort_by(|a, b| values[*a as usize].cmp(&values[*b as usize]));
        prop_assert_eq!(derived.to_vec(), expected);
    }
}
