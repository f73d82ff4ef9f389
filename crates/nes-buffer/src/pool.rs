//! `BufferPool`: fixed-size pooled segments with a blocking or
//! non-blocking acquisition path, plus oversized one-shot unpooled
//! allocations (spec.md §4.A).
//!
//! The original engine carves pooled segments out of one contiguous
//! backing arena and recovers a segment's control block from a raw
//! pointer by fixed offset. Here each segment is an independently
//! allocated `bytes::BytesMut`, the same concrete storage
//! `spark-buffer::PooledBuffer` uses; the free-list is a lock-free-in-
//! spirit, condvar-backed queue instead of hand-rolled pointer
//! arithmetic, matching spec.md §5's "lock-free free-list; blocking wait
//! on exhaustion via a condition variable" (here a `parking_lot::Mutex` +
//! `Condvar`, since `parking_lot` already appears in this example pack for
//! exactly this kind of hot-path lock).

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use nes_core::{EngineError, EngineResult};
use parking_lot::{Condvar, Mutex};

use crate::control_block::TupleBuffer;

pub(crate) struct PoolShared {
    buffer_size: usize,
    free_list: Mutex<VecDeque<BytesMut>>,
    not_empty: Condvar,
}

impl PoolShared {
    pub(crate) fn recycle(&self, mut buf: BytesMut) {
        buf.resize(self.buffer_size, 0);
        let mut free = self.free_list.lock();
        free.push_back(buf);
        self.not_empty.notify_one();
    }
}

/// A pool of `capacity` fixed-size segments of `buffer_size` bytes each.
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let mut free_list = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            let mut buf = BytesMut::with_capacity(buffer_size);
            buf.resize(buffer_size, 0);
            free_list.push_back(buf);
        }
        BufferPool {
            shared: Arc::new(PoolShared { buffer_size, free_list: Mutex::new(free_list), not_empty: Condvar::new() }),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Number of segments currently available without blocking.
    pub fn available(&self) -> usize {
        self.shared.free_list.lock().len()
    }

    /// Blocks until a pooled segment is available.
    pub fn get_buffer_blocking(&self) -> TupleBuffer {
        let mut free = self.shared.free_list.lock();
        loop {
            if let Some(buf) = free.pop_front() {
                return TupleBuffer::new_pooled(buf, Arc::downgrade(&self.shared));
            }
            self.shared.not_empty.wait(&mut free);
        }
    }

    /// Returns a pooled segment immediately, or `None` if the pool is
    /// exhausted. Never blocks.
    pub fn get_buffer_no_blocking(&self) -> Option<TupleBuffer> {
        let mut free = self.shared.free_list.lock();
        free.pop_front().map(|buf| TupleBuffer::new_pooled(buf, Arc::downgrade(&self.shared)))
    }

    /// Allocates a one-shot segment of `size_bytes`, freed (not recycled)
    /// on release. Used when a request exceeds the pool's fixed unit
    /// size.
    pub fn get_unpooled_buffer(&self, size_bytes: usize) -> EngineResult<TupleBuffer> {
        if size_bytes == 0 {
            return Err(EngineError::AllocationFailure("unpooled buffer size must be > 0".into()));
        }
        let mut buf = BytesMut::with_capacity(size_bytes);
        buf.resize(size_bytes, 0);
        Ok(TupleBuffer::new_unpooled(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn exhaustion_then_recycle_makes_segment_available_again() {
        let pool = BufferPool::new(1, 128);
        assert_eq!(pool.available(), 1);
        let buf = pool.get_buffer_no_blocking().expect("one buffer available");
        assert_eq!(pool.available(), 0);
        assert!(pool.get_buffer_no_blocking().is_none());
        drop(buf);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn unpooled_buffer_is_never_recycled_into_pool() {
        let pool = BufferPool::new(1, 64);
        let unpooled = pool.get_unpooled_buffer(4096).expect("unpooled alloc succeeds");
        assert_eq!(unpooled.buffer_size(), 4096);
        drop(unpooled);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn blocking_get_wakes_once_a_segment_is_released() {
        let pool = Arc::new(BufferPool::new(1, 32));
        let held = pool.get_buffer_no_blocking().unwrap();
        let woke = Arc::new(AtomicBool::new(false));

        let pool2 = pool.clone();
        let woke2 = woke.clone();
        let handle = std::thread::spawn(move || {
            let _buf = pool2.get_buffer_blocking();
            woke2.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!woke.load(Ordering::SeqCst));
        drop(held);
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }
}
