//! Cell cache shared by every table of a database.

use hashbrown::HashMap;
use keel_core::{RowIndex, TableId, Value};
use parking_lot::Mutex;

/// Default number of cached cells.
pub const DEFAULT_CELL_CACHE_CAPACITY: usize = 64 * 1024;

type CellKey = (TableId, RowIndex, u32);

#[derive(Debug, Default)]
struct CacheState {
    cells: HashMap<CellKey, (Value, u64)>,
    tick: u64,
}

/// Decoded cell values keyed by (table, row, column).
///
/// When the cache grows past its capacity the least recently touched quarter
/// is evicted.
#[derive(Debug)]
pub struct CellCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl CellCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a cached cell.
    pub fn get(&self, table: TableId, row: RowIndex, column: usize) -> Option<Value> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let entry = state.cells.get_mut(&(table, row, column as u32))?;
        entry.1 = tick;
        Some(entry.0.clone())
    }

    /// Caches a cell.
    pub fn put(&self, table: TableId, row: RowIndex, column: usize, value: Value) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        state.cells.insert((table, row, column as u32), (value, tick));
        if state.cells.len() > self.capacity {
            Self::evict_oldest(&mut state, self.capacity);
        }
    }

    fn evict_oldest(state: &mut CacheState, capacity: usize) {
        let mut ticks: Vec<u64> = state.cells.values().map(|(_, t)| *t).collect();
        let keep = capacity - capacity / 4;
        let cut = ticks.len().saturating_sub(keep);
        if cut == 0 {
            return;
        }
        let (_, threshold, _) = ticks.select_nth_unstable(cut - 1);
        let threshold = *threshold;
        state.cells.retain(|_, (_, t)| *t > threshold);
    }

    /// Drops every cached cell of a row.
    pub fn evict_row(&self, table: TableId, row: RowIndex, column_count: usize) {
        let mut state = self.state.lock();
        for column in 0..column_count {
            state.cells.remove(&(table, row, column as u32));
        }
    }

    /// Drops every cached cell of a table.
    pub fn evict_table(&self, table: TableId) {
        self.state.lock().cells.retain(|(t, _, _), _| *t != table);
    }
}

impl Default for CellCache {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_CACHE_CAPACITY)
    }
}
