//! Sparse rank cache for one column.
//!
//! Ranks are spaced by [`RANK_GAP`] so a new distinct value usually fits
//! between its neighbours without renumbering. When two neighbouring ranks
//! leave no room the insert reports exhaustion and the owner rebuilds.

use crate::comparator::IndexComparator;
use crate::sorted_index::SortedIndex;
use crate::traits::RankLookup;
use hashbrown::HashMap;
use keel_core::{Result, RowIndex};
use std::cmp::Ordering;

/// Distance between consecutive ranks after a build.
pub const RANK_GAP: u64 = 1 << 16;

/// Rank of the smallest value after a build, leaving room below it.
const BASE_RANK: u64 = 1 << 40;

/// Outcome of [`RankCache::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankInsert {
    /// The row was ranked.
    Ranked(u64),
    /// No rank is free between the neighbours; the cache must be rebuilt.
    Exhausted,
}

/// Row → rank map for one column.
#[derive(Clone, Debug, Default)]
pub struct RankCache {
    ranks: HashMap<RowIndex, u64>,
    /// One representative row per distinct value, ordered by rank.
    distinct: Vec<(u64, RowIndex)>,
}

impl RankCache {
    /// Ranks every row of a column index.
    pub fn build(index: &SortedIndex, cmp: &dyn IndexComparator) -> Result<Self> {
        let mut cache = RankCache {
            ranks: HashMap::with_capacity(index.len()),
            distinct: Vec::new(),
        };
        let mut rank = BASE_RANK;
        let mut prev: Option<RowIndex> = None;
        for row in index.iter() {
            match prev {
                Some(p) if cmp.compare_rows(p, row)? == Ordering::Equal => {}
                Some(_) => {
                    rank += RANK_GAP;
                    cache.distinct.push((rank, row));
                }
                None => cache.distinct.push((rank, row)),
            }
            cache.ranks.insert(row, rank);
            prev = Some(row);
        }
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Ranks a newly added row.
    pub fn insert(&mut self, row: RowIndex, cmp: &dyn IndexComparator) -> Result<RankInsert> {
        let mut lo = 0usize;
        let mut hi = self.distinct.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare_rows(self.distinct[mid].1, row)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    let rank = self.distinct[mid].0;
                    self.ranks.insert(row, rank);
                    return Ok(RankInsert::Ranked(rank));
                }
            }
        }

        let below = lo.checked_sub(1).map(|i| self.distinct[i].0);
        let above = self.distinct.get(lo).map(|d| d.0);
        let rank = match (below, above) {
            (None, None) => BASE_RANK,
            (Some(b), None) => match b.checked_add(RANK_GAP) {
                Some(r) => r,
                None => return Ok(RankInsert::Exhausted),
            },
            (None, Some(a)) => {
                if a == 0 {
                    return Ok(RankInsert::Exhausted);
                }
                a / 2
            }
            (Some(b), Some(a)) => {
                if a - b < 2 {
                    return Ok(RankInsert::Exhausted);
                }
                b + (a - b) / 2
            }
        };
        self.distinct.insert(lo, (rank, row));
        self.ranks.insert(row, rank);
        Ok(RankInsert::Ranked(rank))
    }

    /// Returns true if `row` is a distinct-value representative.
    ///
    /// Reclaiming such a row invalidates the cache, because later inserts would
    /// compare against whatever value reuses the slot.
    pub fn is_representative(&self, row: RowIndex) -> bool {
        self.ranks
            .get(&row)
            .map_or(false, |rank| {
                self.distinct
                    .binary_search_by_key(rank, |d| d.0)
                    .map_or(false, |i| self.distinct[i].1 == row)
            })
    }

    /// Forgets a reclaimed row that is not a representative.
    pub fn forget(&mut self, row: RowIndex) {
        self.ranks.remove(&row);
    }
}

impl RankLookup for RankCache {
    fn rank_of(&self, row: RowIndex) -> Option<u64> {
        self.ranks.get(&row).copied()
    }
}
