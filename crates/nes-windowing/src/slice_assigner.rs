//! Slice-edge arithmetic for keyed time windows (spec.md §4.I).
//!
//! A window with `size = A` and `slide = B`, deployed at `deployTime = C`,
//! starts its x-th instance at `x * B + C` and ends it at `x * B + A + C`.
//! Tumbling windows are the special case `A == B`. Given an incoming
//! tuple's timestamp `ts`, the slice it falls into is bounded by the
//! nearest window edges on either side, maximized/minimized across every
//! currently active window definition (deployment times can be added or
//! removed while the query runs). Ported from the four-case structure of
//! the teacher's `SliceAssigner`, generalized from one deployment time to
//! a set of them.

use parking_lot::Mutex;

/// One active window definition: `size`/`slide` in the same unit as the
/// timestamps the assigner is fed (milliseconds for event-time windows,
/// tuple counts for `WindowKind::Count`).
#[derive(Debug, Clone, Copy)]
struct Definition {
    size: u64,
    slide: u64,
    deploy_time: u64,
}

pub struct SliceAssigner {
    definitions: Mutex<Vec<Definition>>,
}

impl SliceAssigner {
    pub fn new(size: u64, slide: u64, deploy_time: u64) -> Self {
        SliceAssigner { definitions: Mutex::new(vec![Definition { size, slide, deploy_time }]) }
    }

    pub fn add_definition(&self, size: u64, slide: u64, deploy_time: u64) {
        self.definitions.lock().push(Definition { size, slide, deploy_time });
    }

    pub fn remove_definition(&self, deploy_time: u64) {
        self.definitions.lock().retain(|d| d.deploy_time != deploy_time);
    }

    /// Start of the slice `ts` falls into, or `None` if `ts` precedes every
    /// active definition's deployment time (spec.md §4.I: dropped with a
    /// logged error, counted as `WindowAssignmentDrop`, not a failure).
    pub fn slice_start(&self, ts: u64) -> Option<u64> {
        let definitions = self.definitions.lock();
        let mut slice_start: Option<u64> = None;

        for def in definitions.iter() {
            if ts < def.deploy_time {
                continue;
            }
            let last_window_start_before_ts = ts - ((ts - def.deploy_time) % def.slide);
            let candidate = if ts < def.deploy_time + def.size {
                last_window_start_before_ts
            } else {
                let last_window_end_before_ts = ts - ((ts - def.size - def.deploy_time) % def.slide);
                last_window_start_before_ts.max(last_window_end_before_ts)
            };
            slice_start = Some(slice_start.map_or(candidate, |current| current.max(candidate)));
        }
        slice_start
    }

    /// End of the slice `ts` falls into. Unlike `slice_start`, this is
    /// always defined once at least one definition exists: a definition
    /// deployed after `ts` still bounds the slice end from above (its
    /// deployment time is the next window start).
    pub fn slice_end(&self, ts: u64) -> u64 {
        let definitions = self.definitions.lock();
        let mut slice_end = u64::MAX;

        for def in definitions.iter() {
            if ts < def.deploy_time {
                slice_end = slice_end.min(def.deploy_time);
                continue;
            }
            let next_window_start_after_ts = ts - ((ts - def.deploy_time) % def.slide) + def.slide;
            let next_window_end_after_ts = if ts < def.deploy_time + def.size {
                def.deploy_time + def.size
            } else {
                ts - ((ts - def.deploy_time - def.size) % def.slide) + def.slide
            };
            slice_end = slice_end.min(next_window_end_after_ts).min(next_window_start_after_ts);
        }
        slice_end
    }
}
