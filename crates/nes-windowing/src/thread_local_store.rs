//! `KeyedThreadLocalSliceStore` (grounded on `KeyedThreadLocalSliceStore.hpp`):
//! single-writer by construction (spec.md §5 — pinned to one worker), so no
//! internal locking. Holds slices sorted ascending by `end`, which is what
//! lets trigger scan them in order and stop at the first one not yet
//! closed by the watermark.

use std::collections::HashMap;

use nes_core::{EngineError, EngineResult, Value};
use nes_plan::AggregateSpec;

use crate::keyed_slice::KeyedSlice;
use crate::slice_assigner::SliceAssigner;

pub struct ThreadLocalSliceStore {
    slices: Vec<KeyedSlice>,
    last_watermark: u64,
}

impl ThreadLocalSliceStore {
    pub fn new() -> Self {
        ThreadLocalSliceStore { slices: Vec::new(), last_watermark: 0 }
    }

    pub fn last_watermark(&self) -> u64 {
        self.last_watermark
    }

    pub fn set_last_watermark(&mut self, watermark: u64) {
        self.last_watermark = watermark;
    }

    /// Locates (creating if needed) the slice `ts` belongs to and upserts
    /// the group's partial. Rejects late tuples and tuples outside every
    /// active window definition, mirroring §4.I's correctness invariants.
    pub fn insert(
        &mut self,
        ts: u64,
        assigner: &SliceAssigner,
        group_key: Vec<Value>,
        values: &HashMap<String, Value>,
        aggregates: &[AggregateSpec],
    ) -> EngineResult<()> {
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
                self.slices.insert(insert_at, KeyedSlice::new(start, end));
                insert_at
            }
        };
        self.slices[position].insert(group_key, values, aggregates);
        Ok(())
    }

    /// Removes and returns every slice whose end is at or before
    /// `watermark`, in ascending end order — the thread-local contribution
    /// the handler stages globally once the watermark passes them.
    pub fn drain_triggered(&mut self, watermark: u64) -> Vec<KeyedSlice> {
        let split_at = self.slices.iter().position(|slice| slice.end() > watermark).unwrap_or(self.slices.len());
        self.slices.drain(..split_at).collect()
    }

    /// Drains every remaining slice regardless of watermark — used on
    /// graceful stop, which flushes the staging area "as if the watermark
    /// had advanced to +∞" (spec.md §4.I).
    pub fn drain_all(&mut self) -> Vec<KeyedSlice> {
        self.slices.drain(..).collect()
    }
}

impl Default for ThreadLocalSliceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_plan::AggregateFunction;

    fn spec() -> Vec<AggregateSpec> {
        vec![AggregateSpec { input_field: "value".into(), function: AggregateFunction::Sum, output_field: "sum".into() }]
    }

    #[test]
    fn slices_stay_sorted_by_end_and_drain_in_order() {
        let assigner = SliceAssigner::new(10, 10, 0);
        let mut store = ThreadLocalSliceStore::new();
        let mut values = HashMap::new();
        values.insert("value".to_string(), Value::Int64(1));

        store.insert(25, &assigner, vec![Value::Int64(1)], &values, &spec()).unwrap();
        store.insert(5, &assigner, vec![Value::Int64(1)], &values, &spec()).unwrap();
        store.insert(15, &assigner, vec![Value::Int64(1)], &values, &spec()).unwrap();

        let triggered = store.drain_triggered(20);
        assert_eq!(triggered.len(), 2);
        assert_eq!(triggered[0].end(), 10);
        assert_eq!(triggered[1].end(), 20);
    }

    #[test]
    fn late_tuple_is_rejected() {
        let assigner = SliceAssigner::new(10, 10, 0);
        let mut store = ThreadLocalSliceStore::new();
        store.set_last_watermark(30);
        let values = HashMap::new();
        let err = store.insert(10, &assigner, vec![Value::Int64(1)], &values, &spec()).unwrap_err();
        assert!(matches!(err, EngineError::WindowAssignmentDrop { ts: 10 }));
    }
}
