//! `MultiOriginWatermarkProcessor` (spec.md §4.H). Per origin, tracks the
//! highest sequence number such that all `[1..n]` sequence numbers have
//! been observed, collapsing gaps with a min-heap of pending sequence
//! numbers; the per-origin watermark is the max timestamp reported for
//! that contiguous prefix. The global watermark is the min across origins.
//!
//! Monotonicity: the returned global watermark never decreases. Updates
//! are serialized per origin (a fine-grained lock per origin id, via
//! `dashmap`) and the global min is recomputed under a short critical
//! section over all origins' current watermark values.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use nes_core::{EngineError, EngineResult, OriginId, SequenceNumber};
use parking_lot::Mutex;

/// Per-origin gap tracking: `next_expected` is the lowest sequence number
/// not yet folded into the contiguous prefix; `pending` holds
/// out-of-order arrivals (by sequence number, smallest first) together
/// with the timestamp each carried, so once a gap closes the skipped-over
/// entries can be folded in order.
struct OriginState {
    next_expected: u64,
    watermark: u64,
    pending: BinaryHeap<Reverse<(u64, u64)>>,
}

impl OriginState {
    fn new() -> Self {
        OriginState { next_expected: 1, watermark: 0, pending: BinaryHeap::new() }
    }

    /// Folds `(ts, sequence_number)` in; returns this origin's watermark
    /// after folding, or an error if the pending set grows unboundedly
    /// because a gap never closes (spec.md §13, open-question decision 3).
    fn update(&mut self, ts: u64, sequence_number: u64) -> EngineResult<u64> {
        const MAX_PENDING: usize = 1 << 20;

        self.pending.push(Reverse((sequence_number, ts)));
        if self.pending.len() > MAX_PENDING {
            return Err(EngineError::WatermarkProtocolFailure {
                origin: OriginId::INVALID,
                reason: format!("pending sequence-number set exceeded {MAX_PENDING} entries without closing a gap"),
            });
        }

        while let Some(&Reverse((seq, ts))) = self.pending.peek() {
            if seq == self.next_expected {
                self.pending.pop();
                self.watermark = self.watermark.max(ts);
                self.next_expected += 1;
            } else {
                break;
            }
        }
        Ok(self.watermark)
    }
}

pub struct MultiOriginWatermarkProcessor {
    origins: DashMap<OriginId, Mutex<OriginState>>,
    global: AtomicU64,
}

impl MultiOriginWatermarkProcessor {
    /// `known_origins` is the set of origin ids known at plan time (spec.md
    /// §4.H): the global watermark is the min over exactly these origins,
    /// so every one of them must contribute before it can advance.
    pub fn new(known_origins: impl IntoIterator<Item = OriginId>) -> Self {
        let origins = DashMap::new();
        for origin in known_origins {
            origins.insert(origin, Mutex::new(OriginState::new()));
        }
        MultiOriginWatermarkProcessor { origins, global: AtomicU64::new(0) }
    }

    pub fn update_watermark(&self, ts: u64, sequence_number: SequenceNumber, origin: OriginId) -> EngineResult<u64> {
        let entry = self
            .origins
            .get(&origin)
            .ok_or_else(|| EngineError::WatermarkProtocolFailure { origin, reason: "update from an origin not known at plan time".into() })?;
        let mut state = entry.lock();
        let origin_watermark = state
            .update(ts, sequence_number.as_u64())
            .map_err(|_| EngineError::WatermarkProtocolFailure { origin, reason: "pending sequence-number set exceeded its bound".into() })?;
        drop(state);
        drop(entry);

        let global_min = self.origins.iter().map(|entry| entry.value().lock().watermark).min().unwrap_or(0);
        // Monotonic: only ever push the stored global watermark forward.
        let mut current = self.global.load(Ordering::Acquire);
        while global_min > current {
            match self.global.compare_exchange_weak(current, global_min, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        let _ = origin_watermark;
        Ok(self.global.load(Ordering::Acquire))
    }

    pub fn global_watermark(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_watermark_is_min_across_origins() {
        let a = OriginId(0);
        let b = OriginId(1);
        let proc = MultiOriginWatermarkProcessor::new([a, b]);
        proc.update_watermark(100, SequenceNumber(1), a).unwrap();
        assert_eq!(proc.global_watermark(), 0, "b has not contributed yet");
        proc.update_watermark(50, SequenceNumber(1), b).unwrap();
        assert_eq!(proc.global_watermark(), 50);
    }

    #[test]
    fn out_of_order_sequence_numbers_collapse_gaps() {
        let origin = OriginId(0);
        let proc = MultiOriginWatermarkProcessor::new([origin]);
        proc.update_watermark(30, SequenceNumber(3), origin).unwrap();
        assert_eq!(proc.global_watermark(), 0, "sequence 1,2 still missing");
        proc.update_watermark(10, SequenceNumber(1), origin).unwrap();
        assert_eq!(proc.global_watermark(), 10);
        proc.update_watermark(20, SequenceNumber(2), origin).unwrap();
        assert_eq!(proc.global_watermark(), 30, "gap closed, prefix now covers 1..=3");
    }

    #[test]
    fn watermark_never_decreases() {
        let origin = OriginId(0);
        let proc = MultiOriginWatermarkProcessor::new([origin]);
        proc.update_watermark(100, SequenceNumber(1), origin).unwrap();
        assert_eq!(proc.global_watermark(), 100);
        proc.update_watermark(50, SequenceNumber(2), origin).unwrap();
        assert_eq!(proc.global_watermark(), 100, "later ts is lower but watermark must not regress");
    }

    #[test]
    fn update_from_unknown_origin_fails() {
        let proc = MultiOriginWatermarkProcessor::new([OriginId(0)]);
        assert!(proc.update_watermark(1, SequenceNumber(1), OriginId(99)).is_err());
    }
}
