//! `WindowCombiner` (grounded on the original NES `CombiningWindowOperator`
//! step, which NES-RS had collapsed away): a finalized slice only covers
//! `[sliceStart, sliceEnd)`, not a whole window. For a sliding window
//! (`slide < size`) each slice feeds every window instance whose
//! `[windowStart, windowStart + size)` contains it, and a window is only
//! complete once every one of its contributing slices has arrived. For a
//! tumbling window (`slide == size`) each slice *is* a window and this
//! degenerates to one contribution per window, emitted immediately.

use std::collections::HashMap;

use nes_plan::WindowSpec;

use crate::keyed_slice::KeyedSlice;

struct WindowEntry {
    merged: KeyedSlice,
    contributions: u64,
}

pub struct WindowCombiner {
    size: u64,
    slide: u64,
    deploy_time: u64,
    slices_per_window: u64,
    windows: HashMap<(u64, u64), WindowEntry>,
}

impl WindowCombiner {
    pub fn new(window: WindowSpec) -> Self {
        let slide = window.slide.max(1);
        WindowCombiner {
            size: window.size,
            slide,
            deploy_time: window.deploy_time,
            slices_per_window: window.size.div_ceil(slide).max(1),
            windows: HashMap::new(),
        }
    }

    /// Folds one finalized slice into every window instance it belongs to.
    /// Returns the windows that now hold every expected contribution,
    /// removed from the in-progress map.
    pub fn combine(&mut self, slice: KeyedSlice) -> Vec<KeyedSlice> {
        let slice_start = slice.start();
        let slice_end = slice.end();

        for k in 0..self.slices_per_window {
            let Some(window_start) = slice_start.checked_sub(k * self.slide) else { break };
            if window_start < self.deploy_time {
                break;
            }
            let window_end = window_start + self.size;
            if window_end < slice_end {
                continue;
            }
            let entry = self
                .windows
                .entry((window_start, window_end))
                .or_insert_with(|| WindowEntry { merged: KeyedSlice::new(window_start, window_end), contributions: 0 });
            entry.merged.merge_from(slice.clone());
            entry.contributions += 1;
        }

        let ready: Vec<(u64, u64)> =
            self.windows.iter().filter(|(_, entry)| entry.contributions >= self.slices_per_window).map(|(bounds, _)| *bounds).collect();
        ready.into_iter().filter_map(|bounds| self.windows.remove(&bounds).map(|entry| entry.merged)).collect()
    }

    /// Drains every in-progress window regardless of contribution count, as
    /// though the stream had ended — used on graceful stop alongside
    /// `SliceStaging::take_all`.
    pub fn drain_all(&mut self) -> Vec<KeyedSlice> {
        self.windows.drain().map(|(_, entry)| entry.merged).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::Value;
    use nes_plan::{AggregateFunction, AggregateSpec};

    fn spec() -> Vec<AggregateSpec> {
        vec![AggregateSpec { input_field: "value".into(), function: AggregateFunction::Count, output_field: "cnt".into() }]
    }

    fn slice(start: u64, end: u64, keys: &[i64]) -> KeyedSlice {
        let mut slice = KeyedSlice::new(start, end);
        let mut values = HashMap::new();
        values.insert("value".to_string(), Value::Int64(1));
        for key in keys {
            slice.insert(vec![Value::Int64(*key)], &values, &spec());
        }
        slice
    }

    #[test]
    fn tumbling_window_completes_on_its_one_and_only_slice() {
        let mut combiner = WindowCombiner::new(WindowSpec::tumbling(10));
        let complete = combiner.combine(slice(0, 10, &[1, 1]));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (0, 10));
    }

    #[test]
    fn sliding_window_waits_for_every_contributing_slice() {
        // size=10, slide=5: window [0,10) needs slices [0,5) and [5,10).
        let mut combiner = WindowCombiner::new(WindowSpec::sliding(10, 5));
        assert!(combiner.combine(slice(0, 5, &[1, 1])).is_empty(), "window [0,10) still missing slice [5,10)");
        let complete = combiner.combine(slice(5, 10, &[1]));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (0, 10));
    }

    #[test]
    fn one_slice_feeds_two_overlapping_windows() {
        let mut combiner = WindowCombiner::new(WindowSpec::sliding(10, 5));
        combiner.combine(slice(0, 5, &[1]));
        // slice [5,10) completes window [0,10) and opens window [5,15).
        let complete = combiner.combine(slice(5, 10, &[1]));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (0, 10));

        let complete = combiner.combine(slice(10, 15, &[1]));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (5, 15));
    }

    #[test]
    fn drain_all_returns_partial_windows_regardless_of_contribution_count() {
        let mut combiner = WindowCombiner::new(WindowSpec::sliding(10, 5));
        combiner.combine(slice(10, 15, &[1]));
        let drained = combiner.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!((drained[0].start(), drained[0].end()), (10, 20));
    }
}
