//! `PipelineExecutionContext` (spec.md §4.F): the fixed, per-pipeline
//! state a worker thread's invocation of a compiled pipeline function
//! runs against — buffer provider, operator-handler registry, successor
//! list, and the emit hook that hands a finished buffer to the
//! `QueryManager` for downstream scheduling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nes_buffer::{BufferPool, TupleBuffer};
use nes_core::{PipelineId, SequenceNumber, WorkerId};

use crate::handler::HandlerRegistry;

/// Invoked with a buffer this pipeline just finished producing; schedules
/// a follow-up task per successor pipeline, or forwards to a sink. Owned
/// by the `QueryManager`, which is the only component that knows the
/// physical plan's successor wiring and the task queue to push onto.
pub type EmitFn = Arc<dyn Fn(TupleBuffer) + Send + Sync>;

pub struct PipelineExecutionContext {
    pipeline_id: PipelineId,
    worker_id: WorkerId,
    buffer_pool: Arc<BufferPool>,
    handlers: Arc<HandlerRegistry>,
    successors: Vec<PipelineId>,
    emit: EmitFn,
    next_sequence_number: AtomicU64,
}

impl PipelineExecutionContext {
    pub fn new(
        pipeline_id: PipelineId,
        worker_id: WorkerId,
        buffer_pool: Arc<BufferPool>,
        handlers: Arc<HandlerRegistry>,
        successors: Vec<PipelineId>,
        emit: EmitFn,
    ) -> Self {
        PipelineExecutionContext { pipeline_id, worker_id, buffer_pool, handlers, successors, emit, next_sequence_number: AtomicU64::new(0) }
    }

    pub fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn successors(&self) -> &[PipelineId] {
        &self.successors
    }

    /// The handler registry; callers downcast via `get_as::<ConcreteType>`.
    pub fn handler_registry(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Allocates the next strictly increasing sequence number this
    /// pipeline will stamp on a buffer it emits for a given origin.
    pub fn next_sequence_number(&self) -> SequenceNumber {
        SequenceNumber(self.next_sequence_number.fetch_add(1, Ordering::Relaxed))
    }

    /// Records sequence/chunk metadata is already set on `buffer` by the
    /// caller (typically the `Emit` physical operator); invokes the
    /// pipeline's emit function, which schedules the downstream task(s)
    /// or forwards to a sink.
    pub fn emit_buffer(&self, buffer: TupleBuffer) {
        tracing::trace!(pipeline = ?self.pipeline_id, sequence = ?buffer.sequence_number(), "emitting buffer");
        (self.emit)(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn emit_invokes_the_configured_hook() {
        let pool = Arc::new(BufferPool::new(1, 64));
        let handlers = Arc::new(HandlerRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let emit: EmitFn = Arc::new(move |buf| seen2.lock().unwrap().push(buf.sequence_number()));

        let ctx = PipelineExecutionContext::new(PipelineId(0), WorkerId(0), pool.clone(), handlers, vec![PipelineId(1)], emit);
        let buf = pool.get_buffer_blocking();
        buf.set_sequence_number(ctx.next_sequence_number());
        ctx.emit_buffer(buf);

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(ctx.successors(), &[PipelineId(1)]);
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let pool = Arc::new(BufferPool::new(1, 64));
        let handlers = Arc::new(HandlerRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let emit: EmitFn = Arc::new(move |_| {
            counter2.fetch_add(1, Ordering::Relaxed);
        });
        let ctx = PipelineExecutionContext::new(PipelineId(0), WorkerId(0), pool, handlers, vec![], emit);
        let first = ctx.next_sequence_number();
        let second = ctx.next_sequence_number();
        assert!(second.as_u64() > first.as_u64());
    }
}
