//! Per-table statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one table store.
#[derive(Debug, Default)]
pub struct TableStats {
    inserts: AtomicU64,
    removes: AtomicU64,
    commits: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    reclaimed: AtomicU64,
}

/// Point-in-time copy of [`TableStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStatsSnapshot {
    pub inserts: u64,
    pub removes: u64,
    pub commits: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub reclaimed: u64,
}

impl TableStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a physical insert.
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts committed removals.
    pub fn record_removes(&self, count: u64) {
        self.removes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaim(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> TableStatsSnapshot {
        TableStatsSnapshot {
            inserts: self.inserts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

impl TableStatsSnapshot {
    /// Fraction of cell reads served from the cache.
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
