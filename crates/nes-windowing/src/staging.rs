//! `KeyedSliceStaging` (grounded on `KeyedSliceStaging.hpp`): the global
//! merge point every thread-local store's triggered slices flow into,
//! keyed by `sliceEnd`. Once the number of contributions for a given
//! `sliceEnd` equals the number of thread-local stores, that slice's
//! merge is complete and ready to finalize into output records.

use dashmap::DashMap;

use crate::keyed_slice::KeyedSlice;

struct StagingEntry {
    merged: KeyedSlice,
    contributions: usize,
}

#[derive(Default)]
pub struct SliceStaging {
    entries: DashMap<u64, StagingEntry>,
}

impl SliceStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one worker's slice into the running merge for its `end`.
    /// Returns the contribution count so far for that `end` and whether
    /// the merged state is non-empty (an empty merge still counts toward
    /// completeness but is not worth dispatching, per §4.I step 3).
    pub fn add_to_slice(&self, slice: KeyedSlice) -> (usize, bool) {
        let end = slice.end();
        let mut entry = self.entries.entry(end).or_insert_with(|| StagingEntry { merged: KeyedSlice::new(slice.start(), end), contributions: 0 });
        entry.merged.merge_from(slice);
        entry.contributions += 1;
        (entry.contributions, !entry.merged.is_empty())
    }

    /// Removes and returns the finalized slice once its contribution
    /// count reaches the expected number of thread-local stores. At most
    /// one caller ever observes `Some` for a given `end` (spec.md §8
    /// property: "at-most-one complete emission per sliceEnd globally").
    pub fn take_ready(&self, end: u64) -> Option<KeyedSlice> {
        self.entries.remove(&end).map(|(_, entry)| entry.merged)
    }

    /// All currently staged slices regardless of contribution count,
    /// draining the staging area entirely — used on graceful stop.
    pub fn take_all(&self) -> Vec<KeyedSlice> {
        let keys: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        keys.into_iter().filter_map(|end| self.entries.remove(&end).map(|(_, entry)| entry.merged)).collect()
    }
}
