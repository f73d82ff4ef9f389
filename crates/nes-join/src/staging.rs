//! `JoinSliceStaging`: the global merge point every thread-local join
//! store's triggered slices flow into, keyed by `sliceEnd` — identical in
//! shape to `nes_windowing::SliceStaging`. Each worker contributes at most
//! once per `sliceEnd` regardless of which side(s) it held data for, so a
//! slice is complete once contributions equal the number of thread-local
//! stores (spec.md §4.J: `Open -> Sealed` transition).

use dashmap::DashMap;

use crate::join_slice::JoinSlice;

struct StagingEntry {
    merged: JoinSlice,
    contributions: usize,
}

#[derive(Default)]
pub struct JoinSliceStaging {
    entries: DashMap<u64, StagingEntry>,
}

impl JoinSliceStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_slice(&self, slice: JoinSlice) -> usize {
        let end = slice.end();
        let mut entry = self.entries.entry(end).or_insert_with(|| StagingEntry { merged: JoinSlice::new(slice.start(), end), contributions: 0 });
        entry.merged.merge_from(slice);
        entry.contributions += 1;
        entry.contributions
    }

    pub fn take_ready(&self, end: u64) -> Option<JoinSlice> {
        self.entries.remove(&end).map(|(_, entry)| entry.merged)
    }

    pub fn take_all(&self) -> Vec<JoinSlice> {
        let keys: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        keys.into_iter().filter_map(|end| self.entries.remove(&end).map(|(_, entry)| entry.merged)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::{Record, Value};
    use nes_plan::JoinSide;
    use nes_windowing::group_key::GroupKey;

    #[test]
    fn slice_becomes_ready_once_every_worker_contributed() {
        let staging = JoinSliceStaging::new();
        assert_eq!(staging.add_to_slice(JoinSlice::new(0, 10)), 1);
        assert!(staging.take_ready(10).is_none());

        assert_eq!(staging.add_to_slice(JoinSlice::new(0, 10)), 2);
        assert!(staging.take_ready(10).is_some());
        assert!(staging.take_ready(10).is_none(), "already taken");
    }

    #[test]
    fn contributions_combine_both_sides_worth_of_state() {
        let staging = JoinSliceStaging::new();
        let mut a = JoinSlice::new(0, 10);
        a.insert(JoinSide::Left, GroupKey(vec![Value::Int64(1)]), Record::new());
        staging.add_to_slice(a);

        let mut b = JoinSlice::new(0, 10);
        b.insert(JoinSide::Right, GroupKey(vec![Value::Int64(1)]), Record::new());
        staging.add_to_slice(b);

        let merged = staging.take_ready(10).unwrap();
        assert_eq!(merged.left.len(), 1);
        assert_eq!(merged.right.len(), 1);
    }
}
