//! `KeyedSlicePreAggregationHandler` (grounded on
//! `KeyedSlicePreAggregationHandler.cpp`): owns one `SliceAssigner`, one
//! `ThreadLocalSliceStore` per worker, the global `SliceStaging` area, and
//! a `WindowCombiner` for a single keyed-window aggregation. A finalized
//! slice only ever covers one slice's worth of a window; the combiner is
//! what folds slices into whole `[windowStart, windowStart + size)` windows
//! for sliding windows (`slide < size`) before `push_finalized` ever runs —
//! for tumbling windows (`slide == size`) a slice already is a window, so
//! the combiner degenerates to a pass-through. Implements both
//! `nes_runtime::hooks::AggregationSink` (the `AggregationBuild` side) and
//! `AggregationSource` (the paired `AggregationMergeScan` side) — the
//! teacher's design dispatches a `SliceMergeTask` buffer to a distinct
//! merge pipeline once a slice's contributions are complete; this
//! implementation finalizes a completed window into output records
//! immediately and hands them to whichever pipeline next calls
//! `drain_triggered`, since our synchronous executor has no separate
//! buffer-dispatch path for merge work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use nes_core::{EngineResult, OriginId, Record, SequenceNumber, Value, WorkerId};
use nes_plan::{AggregateSpec, WindowSpec};
use nes_runtime::{AggregationSink, AggregationSource, MultiOriginWatermarkProcessor};
use parking_lot::Mutex;

use crate::keyed_slice::KeyedSlice;
use crate::slice_assigner::SliceAssigner;
use crate::staging::SliceStaging;
use crate::thread_local_store::ThreadLocalSliceStore;
use crate::window_combiner::WindowCombiner;

pub struct KeyedSlicePreAggregationHandler {
    assigner: SliceAssigner,
    group_by: Vec<String>,
    aggregates: Vec<AggregateSpec>,
    thread_local_stores: Vec<Mutex<ThreadLocalSliceStore>>,
    staging: SliceStaging,
    combiner: Mutex<WindowCombiner>,
    watermark_processor: MultiOriginWatermarkProcessor,
    merge_origin: OriginId,
    merge_sequence: AtomicU64,
    ready: Mutex<VecDeque<Record>>,
}

impl KeyedSlicePreAggregationHandler {
    pub fn new(
        window: WindowSpec,
        group_by: Vec<String>,
        aggregates: Vec<AggregateSpec>,
        num_workers: usize,
        known_origins: impl IntoIterator<Item = OriginId>,
        merge_origin: OriginId,
    ) -> Self {
        KeyedSlicePreAggregationHandler {
            assigner: SliceAssigner::new(window.size, window.slide, window.deploy_time),
            group_by,
            aggregates,
            thread_local_stores: (0..num_workers.max(1)).map(|_| Mutex::new(ThreadLocalSliceStore::new())).collect(),
            staging: SliceStaging::new(),
            combiner: Mutex::new(WindowCombiner::new(window)),
            watermark_processor: MultiOriginWatermarkProcessor::new(known_origins),
            merge_origin,
            merge_sequence: AtomicU64::new(0),
            ready: Mutex::new(VecDeque::new()),
        }
    }

    fn store_index(&self, worker_id: WorkerId) -> usize {
        (worker_id.as_u64() as usize) % self.thread_local_stores.len()
    }

    /// Emits one output record per group key in a *window-complete*
    /// `KeyedSlice` — either a tumbling slice (which is itself a whole
    /// window) or the output of `WindowCombiner::combine`/`drain_all` for a
    /// sliding window.
    fn push_finalized(&self, start: u64, end: u64, merged: KeyedSlice) {
        let mut ready = self.ready.lock();
        for (key, accumulators) in merged.into_entries() {
            let mut record = Record::new()
                .with("start", Value::UInt64(start))
                .with("end", Value::UInt64(end))
                .with("origin", Value::UInt64(self.merge_origin.as_u64()))
                .with("sequence", Value::UInt64(self.merge_sequence.fetch_add(1, Ordering::Relaxed)));
            for (name, value) in self.group_by.iter().zip(key) {
                record.set(name.clone(), value);
            }
            for (spec, accumulator) in self.aggregates.iter().zip(&accumulators) {
                record.set(spec.output_field.clone(), accumulator.finalize());
            }
            ready.push_back(record);
        }
    }

    /// Flushes every thread-local store, the staging area, and every
    /// in-progress window combination unconditionally, as though the
    /// watermark had advanced to +∞ (spec.md §4.I, graceful stop).
    /// Registered as a `nes_runtime::Finalizer` at plan deployment.
    pub fn flush(&self) -> EngineResult<()> {
        for store in &self.thread_local_stores {
            for slice in store.lock().drain_all() {
                self.staging.add_to_slice(slice);
            }
        }
        let mut combiner = self.combiner.lock();
        for slice in self.staging.take_all() {
            for window in combiner.combine(slice) {
                if !window.is_empty() {
                    self.push_finalized(window.start(), window.end(), window);
                }
            }
        }
        for window in combiner.drain_all() {
            if !window.is_empty() {
                self.push_finalized(window.start(), window.end(), window);
            }
        }
        Ok(())
    }
}

impl AggregationSink for KeyedSlicePreAggregationHandler {
    fn ingest(&self, worker_id: WorkerId, group_key: Vec<Value>, record: &Record, _window: WindowSpec, event_time: u64) -> EngineResult<()> {
        let values = record.iter().map(|(name, value)| (name.clone(), value.clone())).collect();
        let index = self.store_index(worker_id);
        self.thread_local_stores[index].lock().insert(event_time, &self.assigner, group_key, &values, &self.aggregates)
    }

    fn trigger(&self, worker_id: WorkerId, origin: OriginId, sequence_number: SequenceNumber, watermark_ts: u64) -> EngineResult<()> {
        let global_watermark = self.watermark_processor.update_watermark(watermark_ts, sequence_number, origin)?;
        let index = self.store_index(worker_id);

        let triggered = {
            let mut store = self.thread_local_stores[index].lock();
            if global_watermark <= store.last_watermark() {
                return Ok(());
            }
            let triggered = store.drain_triggered(global_watermark);
            store.set_last_watermark(global_watermark);
            triggered
        };

        for slice in triggered {
            let end = slice.end();
            let (contributions, _) = self.staging.add_to_slice(slice);
            if contributions == self.thread_local_stores.len() {
                if let Some(merged) = self.staging.take_ready(end) {
                    for window in self.combiner.lock().combine(merged) {
                        if !window.is_empty() {
                            self.push_finalized(window.start(), window.end(), window);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl AggregationSource for KeyedSlicePreAggregationHandler {
    fn drain_triggered(&self) -> EngineResult<Vec<Record>> {
        Ok(self.ready.lock().drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::SequenceNumber;
    use nes_plan::AggregateFunction;

    fn handler(num_workers: usize) -> KeyedSlicePreAggregationHandler {
        KeyedSlicePreAggregationHandler::new(
            WindowSpec::tumbling(10),
            vec!["key".into()],
            vec![AggregateSpec { input_field: "value".into(), function: AggregateFunction::Sum, output_field: "sum".into() }],
            num_workers,
            [OriginId(0)],
            OriginId(99),
        )
    }

    #[test]
    fn single_worker_triggers_once_watermark_passes_slice_end() {
        let h = handler(1);
        h.ingest(WorkerId(0), vec![Value::Int64(1)], &Record::new().with("value", Value::Int64(5)), WindowSpec::tumbling(10), 3).unwrap();
        h.ingest(WorkerId(0), vec![Value::Int64(1)], &Record::new().with("value", Value::Int64(7)), WindowSpec::tumbling(10), 8).unwrap();
        assert!(h.drain_triggered().unwrap().is_empty());

        h.trigger(WorkerId(0), OriginId(0), SequenceNumber(1), 15).unwrap();
        let out = h.drain_triggered().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("sum"), Some(&Value::Int64(12)));
        assert_eq!(out[0].get("start"), Some(&Value::UInt64(0)));
        assert_eq!(out[0].get("end"), Some(&Value::UInt64(10)));
    }

    #[test]
    fn two_workers_must_both_contribute_before_a_slice_emits() {
        let h = handler(2);
        h.ingest(WorkerId(0), vec![Value::Int64(1)], &Record::new().with("value", Value::Int64(5)), WindowSpec::tumbling(10), 3).unwrap();
        h.ingest(WorkerId(1), vec![Value::Int64(1)], &Record::new().with("value", Value::Int64(9)), WindowSpec::tumbling(10), 4).unwrap();

        h.trigger(WorkerId(0), OriginId(0), SequenceNumber(1), 15).unwrap();
        assert!(h.drain_triggered().unwrap().is_empty(), "worker 1 has not triggered yet");

        h.trigger(WorkerId(1), OriginId(0), SequenceNumber(2), 15).unwrap();
        let out = h.drain_triggered().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("sum"), Some(&Value::Int64(14)));
    }

    #[test]
    fn flush_emits_partial_state_regardless_of_contribution_count() {
        let h = handler(2);
        h.ingest(WorkerId(0), vec![Value::Int64(1)], &Record::new().with("value", Value::Int64(5)), WindowSpec::tumbling(10), 3).unwrap();
        h.flush().unwrap();
        let out = h.drain_triggered().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("sum"), Some(&Value::Int64(5)));
    }

    /// Size=10, slide=5, single worker. Input `(1,1),(4,1),(5,1),(9,1),(10,1)`
    /// (event-time, count aggregate), watermark=15: windows `{0,10,cnt=4}`
    /// and `{5,15,cnt=3}` complete off the three slices the watermark
    /// closes; `{10,20,cnt=1}` only has one of its two slices and needs a
    /// graceful-stop flush to surface as a partial window.
    #[test]
    fn sliding_window_combines_slices_into_whole_windows() {
        let h = KeyedSlicePreAggregationHandler::new(
            WindowSpec::sliding(10, 5),
            vec![],
            vec![AggregateSpec { input_field: "v".into(), function: AggregateFunction::Count, output_field: "cnt".into() }],
            1,
            [OriginId(0)],
            OriginId(99),
        );
        for ts in [1u64, 4, 5, 9, 10] {
            h.ingest(WorkerId(0), vec![], &Record::new().with("v", Value::Int64(1)), WindowSpec::sliding(10, 5), ts).unwrap();
        }
        assert!(h.drain_triggered().unwrap().is_empty());

        h.trigger(WorkerId(0), OriginId(0), SequenceNumber(1), 15).unwrap();
        let mut out = h.drain_triggered().unwrap();
        assert_eq!(out.len(), 2, "windows [0,10) and [5,15) both complete once the watermark closes their slices");

        h.flush().unwrap();
        out.extend(h.drain_triggered().unwrap());
        assert_eq!(out.len(), 3);

        let window = |start: u64, end: u64| {
            out.iter().find(|r| r.get("start") == Some(&Value::UInt64(start)) && r.get("end") == Some(&Value::UInt64(end))).unwrap()
        };
        assert_eq!(window(0, 10).get("cnt"), Some(&Value::UInt64(4)));
        assert_eq!(window(5, 15).get("cnt"), Some(&Value::UInt64(3)));
        assert_eq!(window(10, 20).get("cnt"), Some(&Value::UInt64(1)));
    }
}
