//! Keel Index - Sorted column indices for the Keel storage core.
//!
//! This crate provides the ordered row-index structure used for predicate
//! evaluation:
//!
//! - `SortedIndex`: row indices of one column kept in value order
//! - `SelectableRange` / `KeyRange`: range descriptions resolved by binary search
//! - `IndexComparator`: the seam through which an index reads cell values
//! - `RankCache` / `RankLookup`: optional sort ranks for fast subset derivation
//!
//! # Example
//!
//! ```rust
//! use keel_core::Value;
//! use keel_index::{KeyRange, SelectableRange, SliceComparator, SortedIndex};
//!
//! let values = vec![Value::Int64(30), Value::Int64(10), Value::Null, Value::Int64(20)];
//! let cmp = SliceComparator::new(&values);
//!
//! let mut index = SortedIndex::new();
//! for row in 0..values.len() as u64 {
//!     index.insert(row, &cmp).unwrap();
//! }
//!
//! // NULL sorts first
//! assert_eq!(index.select_all(), vec![2, 1, 3, 0]);
//!
//! // Range query
//! let range: SelectableRange = KeyRange::lower_bound(20i64, false).into();
//! assert_eq!(index.select_range(&range, &cmp).unwrap(), vec![3, 0]);
//! ```

pub mod block_list;
pub mod comparator;
pub mod range;
pub mod rank_cache;
pub mod sorted_index;
pub mod traits;

pub use block_list::BlockList;
pub use comparator::{IndexComparator, RowOrder, SliceComparator};
pub use range::{RangeFlag, RangeValue, SelectableRange};
pub use rank_cache::{RankCache, RankInsert};
pub use sorted_index::{SortedIndex, DEFAULT_SUBSET_SORT_THRESHOLD};
pub use traits::{KeyRange, RankLookup};
