//! `JoinWindowCombiner`: the join-side counterpart to
//! `nes_windowing::WindowCombiner`. A finalized `JoinSlice` only ever covers
//! `[sliceStart, sliceEnd)`, not a whole window — for a sliding window
//! (`slide < size`) each slice feeds every window instance whose
//! `[windowStart, windowStart + size)` contains it, and the join crossing
//! must not run until every contributing slice for a window has arrived.
//! For a tumbling window (`slide == size`) a slice already is a window and
//! this degenerates to one contribution per window, released immediately.

use std::collections::HashMap;

use nes_plan::WindowSpec;

use crate::join_slice::JoinSlice;

struct WindowEntry {
    merged: JoinSlice,
    contributions: u64,
}

pub struct JoinWindowCombiner {
    size: u64,
    slide: u64,
    deploy_time: u64,
    slices_per_window: u64,
    windows: HashMap<(u64, u64), WindowEntry>,
}

impl JoinWindowCombiner {
    pub fn new(window: WindowSpec) -> Self {
        let slide = window.slide.max(1);
        JoinWindowCombiner {
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
    pub fn combine(&mut self, slice: JoinSlice) -> Vec<JoinSlice> {
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
                .or_insert_with(|| WindowEntry { merged: JoinSlice::new(window_start, window_end), contributions: 0 });
            entry.merged.merge_from(slice.clone());
            entry.contributions += 1;
        }

        let ready: Vec<(u64, u64)> =
            self.windows.iter().filter(|(_, entry)| entry.contributions >= self.slices_per_window).map(|(bounds, _)| *bounds).collect();
        ready.into_iter().filter_map(|bounds| self.windows.remove(&bounds).map(|entry| entry.merged)).collect()
    }

    /// Drains every in-progress window regardless of contribution count, as
    /// though the stream had ended — used on graceful stop alongside
    /// `JoinSliceStaging::take_all`.
    pub fn drain_all(&mut self) -> Vec<JoinSlice> {
        self.windows.drain().map(|(_, entry)| entry.merged).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::{Record, Value};
    use nes_plan::JoinSide;
    use nes_windowing::group_key::GroupKey;

    fn slice(start: u64, end: u64, left: i64, right: i64) -> JoinSlice {
        let mut slice = JoinSlice::new(start, end);
        slice.insert(JoinSide::Left, GroupKey(vec![Value::Int64(left)]), Record::new().with("l", Value::Int64(left)));
        slice.insert(JoinSide::Right, GroupKey(vec![Value::Int64(right)]), Record::new().with("r", Value::Int64(right)));
        slice
    }

    #[test]
    fn tumbling_window_completes_on_its_one_and_only_slice() {
        let mut combiner = JoinWindowCombiner::new(WindowSpec::tumbling(10));
        let complete = combiner.combine(slice(0, 10, 1, 1));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (0, 10));
    }

    #[test]
    fn sliding_window_waits_for_every_contributing_slice() {
        // size=10, slide=5: window [0,10) needs slices [0,5) and [5,10).
        let mut combiner = JoinWindowCombiner::new(WindowSpec::sliding(10, 5));
        assert!(combiner.combine(slice(0, 5, 1, 1)).is_empty(), "window [0,10) still missing slice [5,10)");
        let complete = combiner.combine(slice(5, 10, 2, 2));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (0, 10));
        assert_eq!(complete[0].left.len(), 2);
        assert_eq!(complete[0].right.len(), 2);
    }

    #[test]
    fn one_slice_feeds_two_overlapping_windows() {
        let mut combiner = JoinWindowCombiner::new(WindowSpec::sliding(10, 5));
        combiner.combine(slice(0, 5, 1, 1));
        // slice [5,10) completes window [0,10) and opens window [5,15).
        let complete = combiner.combine(slice(5, 10, 2, 2));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (0, 10));

        let complete = combiner.combine(slice(10, 15, 3, 3));
        assert_eq!(complete.len(), 1);
        assert_eq!((complete[0].start(), complete[0].end()), (5, 15));
    }

    #[test]
    fn drain_all_returns_partial_windows_regardless_of_contribution_count() {
        let mut combiner = JoinWindowCombiner::new(WindowSpec::sliding(10, 5));
        combiner.combine(slice(10, 15, 1, 1));
        let drained = combiner.drain_all();
        assert_eq!(drained.len(), 1);
        assert_eq!((drained[0].start(), drained[0].end()), (10, 20));
    }
}
