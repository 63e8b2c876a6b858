//! Integration tests for keel-storage table stores.

use keel_core::schema::{TableBuilder, TableSchema};
use keel_core::{DataType, RowIndex, Value};
use keel_storage::{
    CellCache, IndexQuery, MasterTableJournal, MasterTableStore, RecordState, RowSet,
    StoreOptions, TableSnapshot,
};
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;

fn schema() -> TableSchema {
    TableBuilder::new("events")
        .unwrap()
        .add_column("id", DataType::Int64)
        .unwrap()
        .add_column("score", DataType::Int32)
        .unwrap()
        .add_column("tag", DataType::String)
        .unwrap()
        .add_column("payload", DataType::Bytes)
        .unwrap()
        .add_nullable(&["score", "tag"])
        .build()
        .unwrap()
}

fn options() -> StoreOptions {
    StoreOptions {
        sync_writes: false,
        subset_sort_threshold: 8,
        background_work: false,
    }
}

fn create(dir: &TempDir) -> Arc<MasterTableStore> {
    MasterTableStore::create(dir.path(), 4, schema(), Arc::new(CellCache::new(128)), options())
        .unwrap()
}

fn reopen(dir: &TempDir, durable: u64) -> Arc<MasterTableStore> {
    MasterTableStore::open(dir.path(), 4, durable, Arc::new(CellCache::new(128)), options())
        .unwrap()
}

fn commit(store: &MasterTableStore, commit_id: u64, journal: MasterTableJournal) {
    let mut set = store.latest_index_set();
    store.replay_journal(&mut set, journal.entries()).unwrap();
    store.commit_transaction_change(commit_id, journal, set).unwrap();
}

fn event(id: i64, score: Option<i32>, tag: Option<&str>) -> Vec<Value> {
    vec![
        Value::Int64(id),
        score.into(),
        tag.map(String::from).into(),
        Value::Bytes(vec![id as u8; (id % 5) as usize]),
    ]
}

#[test]
fn test_round_trip_across_reopen() {
    let dir = TempDir::new().unwrap();
    let store = create(&dir);
    let rows_in = vec![
        event(1, Some(10), Some("a")),
        event(2, None, Some("b")),
        event(3, Some(-4), None),
    ];
    let mut journal = MasterTableJournal::new(4);
    let mut rows = Vec::new();
    for cells in &rows_in {
        let r = store.add_row(cells.clone()).unwrap();
        assert_eq!(&store.get_row(r).unwrap(), cells);
        journal.add(r);
        rows.push(r);
    }
    commit(&store, 1, journal);
    drop(store);

    let store = reopen(&dir, 1);
    for (r, cells) in rows.iter().zip(&rows_in) {
        assert_eq!(&store.get_row(*r).unwrap(), cells);
        assert_eq!(store.record_state(*r), Some(RecordState::CommittedAdded));
    }
}

#[test]
fn test_snapshot_queries() {
    let dir = TempDir::new().unwrap();
    let store = create(&dir);
    let mut journal = MasterTableJournal::new(4);
    for (id, score) in [(1, Some(5)), (2, None), (3, Some(1)), (4, Some(5)), (5, Some(9))] {
        journal.add(store.add_row(event(id, score, None)).unwrap());
    }
    commit(&store, 1, journal);

    let snapshot = TableSnapshot::committed(Arc::clone(&store));
    let ids = |rows: Vec<RowIndex>| -> Vec<Value> {
        rows.into_iter().map(|r| snapshot.cell(0, r).unwrap()).collect()
    };
    assert_eq!(
        ids(snapshot.select_equal(1, &Value::Int32(5)).unwrap()),
        vec![Value::Int64(1), Value::Int64(4)]
    );
    assert_eq!(ids(snapshot.select_first(1).unwrap()), vec![Value::Int64(2)]);
    assert_eq!(ids(snapshot.select_last(1).unwrap()), vec![Value::Int64(5)]);
    assert_eq!(snapshot.select_rest(1).unwrap().len(), 4);
    assert_eq!(ids(snapshot.select_less(1, &Value::Int32(5)).unwrap()), vec![Value::Int64(3)]);
    assert_eq!(snapshot.select_not_equal(1, &Value::Int32(5)).unwrap().len(), 2);
}

#[test]
fn test_working_copy_isolated_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = create(&dir);
    let committed = TableSnapshot::committed(Arc::clone(&store));
    let mut working = committed.to_working();

    let r = store.add_row(event(1, Some(1), None)).unwrap();
    working.apply(keel_storage::JournalEntry::Add(r)).unwrap();
    assert_eq!(working.row_count(), 1);
    assert_eq!(committed.row_count(), 0);
    committed.index_set().verify_unchanged().unwrap();
}

#[test]
fn test_rollback_leaves_indices_identical() {
    let dir = TempDir::new().unwrap();
    let store = create(&dir);
    let mut journal = MasterTableJournal::new(4);
    for id in 0..20 {
        journal.add(store.add_row(event(id, Some((id % 3) as i32), None)).unwrap());
    }
    commit(&store, 1, journal);
    let before = store.snapshot_index_set();

    let mut journal = MasterTableJournal::new(4);
    for id in 20..30 {
        journal.add(store.add_row(event(id, Some(0), None)).unwrap());
    }
    store.rollback_transaction_change(&journal).unwrap();

    let after = store.snapshot_index_set();
    assert_eq!(before.rows(), after.rows());
    for column in 0..before.column_count() {
        assert_eq!(
            before.column(column).unwrap().to_vec(),
            after.column(column).unwrap().to_vec()
        );
    }
    assert_eq!(store.collect_garbage().unwrap(), 10);
}

#[derive(Clone, Debug)]
enum Op {
    Add(i32),
    Remove(usize),
    Commit,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (-5i32..5).prop_map(Op::Add),
        2 => (0usize..64).prop_map(Op::Remove),
        1 => Just(Op::Commit),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After any sequence of commits, every column index equals a stable sort
    /// of the committed rows, and a reopened store agrees.
    #[test]
    fn committed_indices_match_scan(ops in prop::collection::vec(arb_op(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let store = create(&dir);
        let mut live: Vec<RowIndex> = Vec::new();
        let mut pending = MasterTableJournal::new(4);
        let mut commit_id = 0u64;
        let mut next_id = 0i64;

        for op in ops.into_iter().chain(std::iter::once(Op::Commit)) {
            match op {
                Op::Add(score) => {
                    let r = store.add_row(event(next_id, Some(score), None)).unwrap();
                    next_id += 1;
                    pending.add(r);
                    live.push(r);
                }
                Op::Remove(i) if !live.is_empty() => {
                    let r = live.remove(i % live.len());
                    pending.remove(r);
                }
                Op::Remove(_) => {}
                Op::Commit => {
                    commit_id += 1;
                    let journal = std::mem::replace(&mut pending, MasterTableJournal::new(4));
                    commit(&store, commit_id, journal);
                    store.collect_garbage().unwrap();
                }
            }
        }

        let check = |store: &MasterTableStore| -> Result<(), TestCaseError> {
            let set = store.snapshot_index_set();
            let mut expected = live.clone();
            expected.sort_unstable();
            prop_assert_eq!(set.rows(), expected.clone());
            let column = set.column(1).unwrap().to_vec();
            let scores: Vec<Value> = column
                .iter()
                .map(|r| store.get_cell_contents(1, *r).unwrap())
                .collect();
            let mut sorted = scores.clone();
            sorted.sort();
            prop_assert_eq!(scores, sorted);
            let mut members = column;
            members.sort_unstable();
            prop_assert_eq!(members, expected);
            Ok(())
        };
        check(&*store)?;
        drop(store);
        let store = reopen(&dir, commit_id);
        check(&*store)?;
    }
}
