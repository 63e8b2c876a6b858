//! Copy-on-write block list of row indices.
//!
//! Rows are kept in a list of bounded blocks. The outer list and every block are
//! reference counted, so cloning the list is O(blocks) and a mutation only copies
//! the outer list and the one block it touches.

use keel_core::{Result, RowIndex};
use std::sync::Arc;

/// Maximum number of entries per block before it is split.
pub const MAX_BLOCK_SIZE: usize = 512;

/// An ordered sequence of row indices stored in shared blocks.
#[derive(Clone, Debug, Default)]
pub struct BlockList {
    blocks: Arc<Vec<Arc<Vec<RowIndex>>>>,
    len: usize,
}

impl BlockList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from rows already in their final order.
    pub fn from_ordered(rows: Vec<RowIndex>) -> Self {
        let len = rows.len();
        let half = MAX_BLOCK_SIZE / 2;
        let blocks = rows
            .chunks(half.max(1))
            .map(|chunk| Arc::new(chunk.to_vec()))
            .collect();
        Self {
            blocks: Arc::new(blocks),
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if both lists share the same outer storage.
    pub fn shares_storage_with(&self, other: &BlockList) -> bool {
        Arc::ptr_eq(&self.blocks, &other.blocks)
    }

    /// Resolves a position into (block, offset).
    fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        let mut remaining = pos;
        for (i, block) in self.blocks.iter().enumerate() {
            if remaining < block.len() {
                return Some((i, remaining));
            }
            remaining -= block.len();
        }
        None
    }

    /// Returns the row at `pos`.
    pub fn get(&self, pos: usize) -> Option<RowIndex> {
        if pos + 1 == self.len {
            return self.last();
        }
        self.locate(pos).map(|(b, o)| self.blocks[b][o])
    }

    pub fn first(&self) -> Option<RowIndex> {
        self.blocks.first().and_then(|b| b.first().copied())
    }

    pub fn last(&self) -> Option<RowIndex> {
        self.blocks.last().and_then(|b| b.last().copied())
    }

    /// Inserts `row` so that it ends up at position `pos`.
    pub fn insert(&mut self, pos: usize, row: RowIndex) {
        debug_assert!(pos <= self.len);
        let blocks = Arc::make_mut(&mut self.blocks);
        if blocks.is_empty() {
            blocks.push(Arc::new(vec![row]));
            self.len = 1;
            return;
        }

        // Appending at the very end goes to the last block.
        let (b, o) = {
            let mut remaining = pos;
            let mut found = (blocks.len() - 1, blocks[blocks.len() - 1].len());
            for (i, block) in blocks.iter().enumerate() {
                if remaining < block.len() {
                    found = (i, remaining);
                    break;
                }
                remaining -= block.len();
            }
            found
        };

        let block = Arc::make_mut(&mut blocks[b]);
        block.insert(o, row);
        if block.len() > MAX_BLOCK_SIZE {
            let tail = block.split_off(block.len() / 2);
            blocks.insert(b + 1, Arc::new(tail));
        }
        self.len += 1;
    }

    /// Removes and returns the row at `pos`.
    pub fn remove(&mut self, pos: usize) -> Option<RowIndex> {
        let (b, o) = self.locate(pos)?;
        let blocks = Arc::make_mut(&mut self.blocks);
        let block = Arc::make_mut(&mut blocks[b]);
        let row = block.remove(o);
        if block.is_empty() {
            blocks.remove(b);
        }
        self.len -= 1;
        Some(row)
    }

    /// Returns the number of leading rows for which `pred` holds.
    ///
    /// The list must be partitioned by `pred`: every row for which it holds comes
    /// before every row for which it does not.
    pub fn partition_point<F>(&self, mut pred: F) -> Result<usize>
    where
        F: FnMut(RowIndex) -> Result<bool>,
    {
        // Find the first block whose last row fails the predicate.
        let (mut lo, mut hi) = (0usize, self.blocks.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let last = *self.blocks[mid].last().unwrap_or(&0);
            if pred(last)? {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let before: usize = self.blocks[..lo].iter().map(|b| b.len()).sum();
        let Some(block) = self.blocks.get(lo) else {
            return Ok(before);
        };

        let (mut l, mut h) = (0usize, block.len());
        while l < h {
            let mid = l + (h - l) / 2;
            if pred(block[mid])? {
                l = mid + 1;
            } else {
                h = mid;
            }
        }
        Ok(before + l)
    }

    /// Iterates all rows in order.
    pub fn iter(&self) -> impl Iterator<Item = RowIndex> + '_ {
        self.blocks.iter().flat_map(|b| b.iter().copied())
    }

    /// Collects rows in positions `start..end`.
    pub fn collect_range(&self, start: usize, end: usize, out: &mut Vec<RowIndex>) {
        let end = end.min(self.len);
        if start >= end {
            return;
        }
        let Some((mut b, mut o)) = self.locate(start) else {
            return;
        };
        let mut left = end - start;
        out.reserve(left);
        while left > 0 && b < self.blocks.len() {
            let block = &self.blocks[b];
            let take = (block.len() - o).min(left);
            out.extend_from_slice(&block[o..o + take]);
            left -= take;
            b += 1;
            o = 0;
        }
    }

    /// Returns all rows as a vector.
    pub fn to_vec(&self) -> Vec<RowIndex> {
        let mut out = Vec::with_capacity(self.len);
        self.collect_range(0, self.len, &mut out);
        out
    }
}
