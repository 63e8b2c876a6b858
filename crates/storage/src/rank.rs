//! Per-column rank cache slot.
//!
//! A slot moves `Absent -> Building -> Ready`. A ready cache is kept current as
//! rows are added; it goes `Stale` when a gap runs out or a distinct-value
//! representative is reclaimed, and the next large derivation rebuilds it.

use keel_core::{Result, RowIndex};
use keel_index::{IndexComparator, RankCache, RankInsert, RankLookup};
use parking_lot::Mutex;

#[derive(Debug, Default)]
enum RankState {
    #[default]
    Absent,
    Building,
    Ready(RankCache),
    Stale,
}

#[derive(Debug, Default)]
pub(crate) struct ColumnRank {
    state: Mutex<RankState>,
}

impl ColumnRank {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), RankState::Ready(_))
    }

    /// Claims the slot for a build. Returns false if one is ready or running.
    pub(crate) fn begin_build(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            RankState::Absent | RankState::Stale => {
                *state = RankState::Building;
                true
            }
            RankState::Building | RankState::Ready(_) => false,
        }
    }

    /// Publishes a finished build, or marks the slot stale when `cache` is
    /// `None` or the build was overtaken.
    pub(crate) fn finish_build(&self, cache: Option<RankCache>, still_valid: impl FnOnce() -> bool) {
        let mut state = self.state.lock();
        if !matches!(*state, RankState::Building) {
            return;
        }
        *state = match cache {
            Some(cache) if still_valid() => RankState::Ready(cache),
            _ => RankState::Stale,
        };
    }

    /// Runs `f` with the ready cache, if any.
    pub(crate) fn with_lookup<R>(&self, f: impl FnOnce(Option<&dyn RankLookup>) -> R) -> R {
        let state = self.state.lock();
        match &*state {
            RankState::Ready(cache) => f(Some(cache)),
            _ => f(None),
        }
    }

    /// Ranks a newly added row in a ready cache.
    pub(crate) fn add_row(&self, row: RowIndex, cmp: &dyn IndexComparator) -> Result<()> {
        let mut state = self.state.lock();
        if let RankState::Ready(cache) = &mut *state {
            if cache.insert(row, cmp)? == RankInsert::Exhausted {
                *state = RankState::Stale;
            }
        }
        Ok(())
    }

    /// Drops a reclaimed row from a ready cache.
    pub(crate) fn reclaim(&self, row: RowIndex) {
        let mut state = self.state.lock();
        if let RankState::Ready(cache) = &mut *state {
            if cache.is_representative(row) {
                *state = RankState::Stale;
            } else {
                cache.forget(row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Value;
    use keel_index::{SliceComparator, SortedIndex};

    fn ready_slot(values: &[Value]) -> ColumnRank {
        let cmp = SliceComparator::new(values);
        let mut index = SortedIndex::new();
        for row in 0..values.len() as u64 {
            index.insert(row, &cmp).unwrap();
        }
        let slot = ColumnRank::new();
        assert!(slot.begin_build());
        slot.finish_build(Some(RankCache::build(&index, &cmp).unwrap()), || true);
        slot
    }

    #[test]
    fn test_lifecycle() {
        let values = vec![Value::Int64(2), Value::Int64(1), Value::Int64(2)];
        let slot = ready_slot(&values);
        assert!(slot.is_ready());
        assert!(!slot.begin_build());
        slot.with_lookup(|l| assert!(l.and_then(|l| l.rank_of(1)).is_some()));

        // Row 2 shares its value with representative row 0.
        slot.reclaim(2);
        assert!(slot.is_ready());
        slot.reclaim(1);
        assert!(!slot.is_ready());
        assert!(slot.begin_build());
    }

    #[test]
    fn test_overtaken_build_is_stale() {
        let slot = ColumnRank::new();
        assert!(slot.begin_build());
        slot.finish_build(Some(RankCache::default()), || false);
        assert!(!slot.is_ready());
        assert!(slot.begin_build());
    }
}
