//! `TupleBuffer`: a reference-counted handle to a fixed-size byte region,
//! with its control block (refcount, tuple count, used bytes, origin,
//! sequence/chunk metadata, watermark, creation timestamp, child-buffer
//! indices) grounded on
//! `examples/original_source/nes-memory/TupleBuffer.cpp`.
//!
//! The original keeps a hand-rolled atomic refcount in a control block
//! placed immediately before the payload, recovered from a raw pointer by
//! fixed offset. Rust's `Arc` already provides that refcount and recovery
//! (`Arc::into_raw`/`Arc::from_raw`) without unsafe pointer arithmetic at
//! call sites, so the control block here is the `T` inside an `Arc<T>`;
//! `retain`/`release` are thin, spec-named wrappers over `Clone`/`Drop`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use nes_core::{ChunkNumber, OriginId, SequenceNumber};
use parking_lot::Mutex;

use crate::pool::PoolShared;

enum Recycle {
    Pooled(Weak<PoolShared>),
    Unpooled,
}

/// The control block proper: everything spec.md §3 says sits ahead of the
/// payload. `payload` is the only field requiring interior mutability —
/// the producing operator writes through `as_mut_slice` up to its first
/// emission, after which the buffer is treated as read-only by downstream
/// consumers. That split is a protocol invariant enforced by pipeline
/// wiring, not by the type system, matching the original's unsynchronized
/// payload region (only control-block fields are atomic there too).
struct Inner {
    payload: UnsafeCell<BytesMut>,
    buffer_size: usize,
    num_tuples: AtomicU64,
    used_bytes: AtomicU64,
    origin_id: AtomicU64,
    sequence_number: AtomicU64,
    chunk_number: AtomicU64,
    last_chunk: AtomicBool,
    watermark: AtomicU64,
    creation_ts_ms: AtomicU64,
    children: Mutex<Vec<TupleBuffer>>,
    recycle: Recycle,
}

// SAFETY: `payload` is only mutated by the single producing operator
// before the buffer is shared downstream, and read concurrently only
// after that point — the same invariant the original engine relies on.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        // Recursively releasing children happens for free: `children` is
        // a normal field and gets dropped right after this function
        // returns, which drops each child `TupleBuffer` and so decrements
        // its own refcount.
        if let Recycle::Pooled(pool) = &self.recycle {
            if let Some(pool) = pool.upgrade() {
                let mut reclaimed = std::mem::take(unsafe { &mut *self.payload.get() });
                reclaimed.clear();
                pool.recycle(reclaimed);
            }
        }
    }
}

/// A reference-counted handle to a pooled or unpooled tuple buffer.
#[derive(Clone)]
pub struct TupleBuffer {
    inner: Arc<Inner>,
}

impl TupleBuffer {
    pub(crate) fn new_pooled(payload: BytesMut, pool: Weak<PoolShared>) -> Self {
        Self::new(payload, Recycle::Pooled(pool))
    }

    pub(crate) fn new_unpooled(payload: BytesMut) -> Self {
        Self::new(payload, Recycle::Unpooled)
    }

    fn new(payload: BytesMut, recycle: Recycle) -> Self {
        let buffer_size = payload.capacity();
        TupleBuffer {
            inner: Arc::new(Inner {
                payload: UnsafeCell::new(payload),
                buffer_size,
                num_tuples: AtomicU64::new(0),
                used_bytes: AtomicU64::new(0),
                origin_id: AtomicU64::new(OriginId::INVALID.as_u64()),
                sequence_number: AtomicU64::new(0),
                chunk_number: AtomicU64::new(1),
                last_chunk: AtomicBool::new(true),
                watermark: AtomicU64::new(0),
                creation_ts_ms: AtomicU64::new(0),
                children: Mutex::new(Vec::new()),
                recycle,
            }),
        }
    }

    /// Retains an additional handle to the same buffer. Equivalent to
    /// `Clone::clone`, named to match spec.md §4.A's `retain()` contract.
    pub fn retain(&self) -> TupleBuffer {
        self.clone()
    }

    /// Drops this handle. Equivalent to letting the value go out of scope;
    /// named to match spec.md §4.A's `release()` contract. When this was
    /// the last handle, the pool's recycle callback runs (see `Drop for
    /// Inner`).
    pub fn release(self) {
        drop(self)
    }

    pub fn reference_count(&self) -> u32 {
        Arc::strong_count(&self.inner) as u32
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn num_tuples(&self) -> u64 {
        self.inner.num_tuples.load(Ordering::Acquire)
    }

    pub fn set_num_tuples(&self, n: u64) {
        self.inner.num_tuples.store(n, Ordering::Release);
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.used_bytes.load(Ordering::Acquire)
    }

    pub fn set_used_bytes(&self, used: u64) {
        debug_assert!(used as usize <= self.inner.buffer_size, "used_bytes must not exceed buffer_size");
        self.inner.used_bytes.store(used, Ordering::Release);
    }

    pub fn has_space_left(&self, used: u64, needed: u64) -> bool {
        used + needed <= self.inner.buffer_size as u64
    }

    pub fn origin_id(&self) -> OriginId {
        OriginId(self.inner.origin_id.load(Ordering::Acquire))
    }

    pub fn set_origin_id(&self, id: OriginId) {
        self.inner.origin_id.store(id.as_u64(), Ordering::Release);
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        SequenceNumber(self.inner.sequence_number.load(Ordering::Acquire))
    }

    pub fn set_sequence_number(&self, seq: SequenceNumber) {
        self.inner.sequence_number.store(seq.as_u64(), Ordering::Release);
    }

    pub fn chunk_number(&self) -> ChunkNumber {
        ChunkNumber(self.inner.chunk_number.load(Ordering::Acquire))
    }

    pub fn set_chunk_number(&self, chunk: ChunkNumber) {
        self.inner.chunk_number.store(chunk.as_u64(), Ordering::Release);
    }

    pub fn is_last_chunk(&self) -> bool {
        self.inner.last_chunk.load(Ordering::Acquire)
    }

    pub fn set_last_chunk(&self, last: bool) {
        self.inner.last_chunk.store(last, Ordering::Release);
    }

    pub fn watermark(&self) -> u64 {
        self.inner.watermark.load(Ordering::Acquire)
    }

    pub fn set_watermark(&self, watermark: u64) {
        self.inner.watermark.store(watermark, Ordering::Release);
    }

    pub fn creation_timestamp_ms(&self) -> u64 {
        self.inner.creation_ts_ms.load(Ordering::Acquire)
    }

    pub fn set_creation_timestamp_ms(&self, ts: u64) {
        self.inner.creation_ts_ms.store(ts, Ordering::Release);
    }

    /// Read-only view of the payload. Safe to call from any handle once
    /// the producing operator is done writing.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { &*self.inner.payload.get() }
    }

    /// Mutable view of the payload. Only the producing operator, which
    /// holds the buffer before its first emission, should call this.
    ///
    /// # Safety
    /// The caller must ensure no other handle observes the buffer
    /// concurrently with this write — guaranteed by pipeline wiring (a
    /// freshly scanned buffer has exactly one live handle until emit).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        &mut *self.inner.payload.get()
    }

    /// Attaches `child` as a child buffer, transferring ownership from the
    /// caller (spec.md §4.A: "attaching a child moves ownership from the
    /// caller"). Returns a stable index usable with `load_child_buffer`
    /// for the lifetime of `self`.
    pub fn store_child_buffer(&self, child: TupleBuffer) -> u32 {
        let mut children = self.inner.children.lock();
        let index = children.len() as u32;
        children.push(child);
        index
    }

    /// Loads a retained handle to a previously stored child buffer.
    pub fn load_child_buffer(&self, index: u32) -> Option<TupleBuffer> {
        self.inner.children.lock().get(index as usize).map(TupleBuffer::retain)
    }

    pub fn num_child_buffers(&self) -> u32 {
        self.inner.children.lock().len() as u32
    }

    /// Round-trips this handle through a raw pointer, for FFI-like
    /// boundaries inside a compiled pipeline (spec.md §4.A). Consumes the
    /// handle; pair with `from_raw` to reconstitute it without leaking or
    /// double-releasing.
    pub fn into_raw(self) -> *const () {
        Arc::into_raw(self.inner) as *const ()
    }

    /// # Safety
    /// `ptr` must have come from `TupleBuffer::into_raw` and must not
    /// already have been reconstituted.
    pub unsafe fn from_raw(ptr: *const ()) -> TupleBuffer {
        TupleBuffer { inner: Arc::from_raw(ptr as *const Inner) }
    }
}

impl std::fmt::Debug for TupleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleBuffer")
            .field("origin_id", &self.origin_id())
            .field("sequence_number", &self.sequence_number())
            .field("chunk_number", &self.chunk_number())
            .field("last_chunk", &self.is_last_chunk())
            .field("num_tuples", &self.num_tuples())
            .field("used_bytes", &self.used_bytes())
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(size: usize) -> TupleBuffer {
        let mut payload = BytesMut::with_capacity(size);
        payload.resize(size, 0);
        TupleBuffer::new_unpooled(payload)
    }

    #[test]
    fn retain_release_preserves_count_then_drops() {
        let buf = make(64);
        assert_eq!(buf.reference_count(), 1);
        let r1 = buf.retain();
        let r2 = buf.retain();
        assert_eq!(buf.reference_count(), 3);
        r1.release();
        assert_eq!(buf.reference_count(), 2);
        r2.release();
        assert_eq!(buf.reference_count(), 1);
    }

    #[test]
    fn child_buffers_keep_stable_indices() {
        let parent = make(64);
        let child_a = make(16);
        let child_b = make(16);
        let idx_a = parent.store_child_buffer(child_a);
        let idx_b = parent.store_child_buffer(child_b);
        assert_eq!(idx_a, 0);
        assert_eq!(idx_b, 1);
        assert!(parent.load_child_buffer(idx_a).is_some());
        assert!(parent.load_child_buffer(idx_b).is_some());
        assert!(parent.load_child_buffer(2).is_none());
    }

    #[test]
    fn raw_pointer_round_trip_preserves_metadata() {
        let buf = make(32);
        buf.set_num_tuples(5);
        buf.set_origin_id(OriginId(9));
        let ptr = buf.clone().into_raw();
        let recovered = unsafe { TupleBuffer::from_raw(ptr) };
        assert_eq!(recovered.num_tuples(), 5);
        assert_eq!(recovered.origin_id(), OriginId(9));
    }
}
