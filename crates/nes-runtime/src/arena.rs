//! `Arena` / `ExecutionContext` (spec.md §4.F), grounded on
//! `examples/original_source/nes-runtime/src/ExecutionContext.cpp`'s
//! `Arena::allocateMemory` three-case bump allocator. Used by pipeline
//! operators (e.g. variable-sized output staging during `Emit`) that need
//! scratch memory beyond the current output buffer's remaining tail.

use std::collections::HashMap;
use std::sync::Arc;

use nes_buffer::{BufferPool, TupleBuffer};
use nes_core::{EngineError, EngineResult, OperatorId};

/// Bump-pointer allocator backed by pooled buffers, with an unpooled
/// fallback for oversized requests (spec.md §4.F):
/// - Request ≤ pool buffer size: served from the current buffer's
///   remaining tail; on overflow, take a fresh pooled buffer.
/// - Request > pool buffer size: served by a one-shot unpooled buffer,
///   tagged as owned so the caller may hand ownership to an emitted
///   buffer (e.g. attach as a child buffer for variable-sized data).
pub struct Arena {
    pool: Arc<BufferPool>,
    fixed_size_buffers: Vec<TupleBuffer>,
    unpooled_buffers: Vec<TupleBuffer>,
    current_offset: usize,
    last_allocation_size: usize,
    last_allocation_owns_buffer: bool,
}

/// One allocation's result: a handle to the backing buffer plus the byte
/// offset within it where the allocation begins, and whether that backing
/// buffer is an unpooled one-shot allocation the caller now owns.
pub struct Allocation {
    pub buffer: TupleBuffer,
    pub offset: usize,
    pub owns_buffer: bool,
}

impl Arena {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Arena {
            pool,
            fixed_size_buffers: Vec::new(),
            unpooled_buffers: Vec::new(),
            current_offset: 0,
            last_allocation_size: 0,
            last_allocation_owns_buffer: false,
        }
    }

    pub fn allocate(&mut self, size_bytes: usize) -> EngineResult<Allocation> {
        self.last_allocation_owns_buffer = false;

        // Case 1: oversized request, one-shot unpooled buffer.
        if self.pool.buffer_size() < size_bytes {
            let buffer = self.pool.get_unpooled_buffer(size_bytes)?;
            self.unpooled_buffers.push(buffer.clone());
            self.last_allocation_size = size_bytes;
            self.last_allocation_owns_buffer = true;
            return Ok(Allocation { buffer, offset: 0, owns_buffer: true });
        }

        if self.fixed_size_buffers.is_empty() {
            let buffer = self.pool.get_buffer_blocking();
            self.last_allocation_size = self.pool.buffer_size();
            self.fixed_size_buffers.push(buffer);
            self.current_offset = 0;
        }

        // Case 2: current buffer's remaining tail can't serve this
        // request, overflow to a fresh pooled buffer.
        if self.last_allocation_size < self.current_offset + size_bytes {
            let buffer = self.pool.get_buffer_blocking();
            self.fixed_size_buffers.push(buffer);
            self.current_offset = 0;
        }

        // Case 3: serve from the current buffer's tail.
        let buffer = self.fixed_size_buffers.last().expect("just ensured non-empty").clone();
        self.last_allocation_size = self.pool.buffer_size();
        let offset = self.current_offset;
        self.current_offset += size_bytes;
        Ok(Allocation { buffer, offset, owns_buffer: false })
    }

    pub fn last_allocation_size(&self) -> usize {
        self.last_allocation_size
    }

    pub fn last_allocation_owns_buffer(&self) -> bool {
        self.last_allocation_owns_buffer
    }
}

/// Per-invocation operator-local scratch state, keyed by operator id
/// within one pipeline invocation (spec.md §4.F: "lives for one pipeline
/// invocation unless explicitly promoted into an operator handler").
#[derive(Default)]
pub struct OperatorStateMap {
    states: HashMap<OperatorId, Box<dyn std::any::Any + Send>>,
}

impl OperatorStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<S: std::any::Any + Send>(&mut self, operator_id: OperatorId, state: S) {
        self.states.insert(operator_id, Box::new(state));
    }

    pub fn get<S: std::any::Any + Send>(&self, operator_id: OperatorId) -> EngineResult<&S> {
        self.states
            .get(&operator_id)
            .and_then(|state| state.downcast_ref::<S>())
            .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no local state registered for operator {operator_id:?}")))
    }

    pub fn get_mut<S: std::any::Any + Send>(&mut self, operator_id: OperatorId) -> EngineResult<&mut S> {
        self.states
            .get_mut(&operator_id)
            .and_then(|state| state.downcast_mut::<S>())
            .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no local state registered for operator {operator_id:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_consecutive_small_allocations_from_one_buffer() {
        let pool = Arc::new(BufferPool::new(2, 1024));
        let mut arena = Arena::new(pool);

        let a = arena.allocate(100).unwrap();
        let b = arena.allocate(200).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 100);
        assert!(!a.owns_buffer && !b.owns_buffer);
    }

    #[test]
    fn overflow_takes_a_fresh_pooled_buffer() {
        let pool = Arc::new(BufferPool::new(2, 128));
        let mut arena = Arena::new(pool);

        let first = arena.allocate(100).unwrap();
        let second = arena.allocate(100).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 0, "overflowed into a fresh buffer, so offset restarts at 0");
    }

    #[test]
    fn oversized_request_is_served_by_an_owned_unpooled_buffer() {
        let pool = Arc::new(BufferPool::new(1, 64));
        let mut arena = Arena::new(pool);
        let allocation = arena.allocate(4096).unwrap();
        assert!(allocation.owns_buffer);
        assert_eq!(allocation.buffer.buffer_size(), 4096);
    }

    #[test]
    fn operator_state_roundtrips_and_rejects_missing() {
        let mut states = OperatorStateMap::new();
        let id = OperatorId(1);
        states.set(id, 42u64);
        assert_eq!(*states.get::<u64>(id).unwrap(), 42);
        assert!(states.get::<u64>(OperatorId(2)).is_err());
    }
}
