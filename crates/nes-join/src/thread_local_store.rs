//! Single-writer (one per worker, spec.md §5) store of `JoinSlice`s kept
//! sorted ascending by `end`, mirroring
//! `nes_windowing::ThreadLocalSliceStore` — the same slice-edge arithmetic
//! applies to a join's build side as to a keyed aggregation's.

use nes_core::{EngineError, EngineResult, Record, Value};
use nes_plan::JoinSide;
use nes_windowing::group_key::GroupKey;
use nes_windowing::SliceAssigner;

use crate::join_slice::JoinSlice;

pub struct ThreadLocalJoinSliceStore {
    slices: Vec<JoinSlice>,
    last_watermark: u64,
}

impl ThreadLocalJoinSliceStore {
    pub fn new() -> Self {
        ThreadLocalJoinSliceStore { slices: Vec::new(), last_watermark: 0 }
    }

    pub fn last_watermark(&self) -> u64 {
        self.last_watermark
    }

    pub fn set_last_watermark(&mut self, watermark: u64) {
        self.last_watermark = watermark;
    }

    pub fn insert(&mut self, ts: u64, assigner: &SliceAssigner, side: JoinSide, key: Value, record: Record) -> EngineResult<()> {
        if ts <= self.last_watermark {
            return Err(EngineError::WindowAssignmentDrop { ts });
        }
        let Some(start) = assigner.slice_start(ts) else {
            return Err(EngineError::WindowAssignmentDrop { ts });
        };
        let end = assigner.slice_end(ts);

        let position = match self.slices.iter().position(|slice| slice.end() == end) {
            Some(index) => index,
            None => {
                let insert_at = self.slices.iter().position(|slice| slice.end() > end).unwrap_or(self.slices.len());
                self.slices.insert(insert_at, JoinSlice::new(start, end));
                insert_at
            }
        };
        self.slices[position].insert(side, GroupKey(vec![key]), record);
        Ok(())
    }

    pub fn drain_triggered(&mut self, watermark: u64) -> Vec<JoinSlice> {
        let split_at = self.slices.iter().position(|slice| slice.end() > watermark).unwrap_or(self.slices.len());
        self.slices.drain(..split_at).collect()
    }

    pub fn drain_all(&mut self) -> Vec<JoinSlice> {
        self.slices.drain(..).collect()
    }
}

impl Default for ThreadLocalJoinSliceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_stay_sorted_by_end_and_drain_in_order() {
        let assigner = SliceAssigner::new(10, 10, 0);
        let mut store = ThreadLocalJoinSliceStore::new();

        store.insert(25, &assigner, JoinSide::Left, Value::Int64(1), Record::new()).unwrap();
        store.insert(5, &assigner, JoinSide::Right, Value::Int64(1), Record::new()).unwrap();
        store.insert(15, &assigner, JoinSide::Left, Value::Int64(1), Record::new()).unwrap();

        let triggered = store.drain_triggered(20);
        assert_eq!(triggered.len(), 2);
        assert_eq!(triggered[0].end(), 10);
        assert_eq!(triggered[1].end(), 20);
    }

    #[test]
    fn late_tuple_is_rejected() {
        let assigner = SliceAssigner::new(10, 10, 0);
        let mut store = ThreadLocalJoinSliceStore::new();
        store.set_last_watermark(30);
        let err = store.insert(10, &assigner, JoinSide::Left, Value::Int64(1), Record::new()).unwrap_err();
        assert!(matches!(err, EngineError::WindowAssignmentDrop { ts: 10 }));
    }
}
