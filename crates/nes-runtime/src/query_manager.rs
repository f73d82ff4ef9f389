//! `QueryManager` (spec.md §4.G): a fixed pool of worker threads pulling
//! `(pipeline, inputBuffer)` tasks off a single MPMC queue. A pipeline's
//! `Emit` enqueues a follow-up task per successor; `SinkWrite` terminates
//! without one. FIFO scheduling, no priority; back-pressure is implicit
//! through the buffer pool a producer blocks on.
//!
//! Grounded on the teacher's worker-pool shape (`rde-core`'s async runtime
//! loop, generalized to the synchronous thread-pool model spec.md §5
//! mandates) and on `examples/original_source/nes-runtime/src/QueryManager.cpp`
//! for the termination sequence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use nes_buffer::{BufferPool, TupleBuffer};
use nes_compile::EvaluateRecord;
use nes_core::{EngineResult, PipelineId, WorkerId};

use crate::executor::{run, CompiledPipeline, SinkRegistry};
use crate::handler::HandlerRegistry;
use crate::hooks::StatefulHooks;
use crate::pipeline_context::{EmitFn, PipelineExecutionContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopType {
    /// Drains the queue and runs registered finalizers (flushing
    /// windowing/join state as if the watermark had advanced to +∞)
    /// before acknowledging.
    Graceful,
    /// Cancels tasks and discards in-flight state immediately.
    Hard,
}

enum Message {
    Task { pipeline: PipelineId, buffer: TupleBuffer },
    Stop,
}

/// A flush hook a windowing or join runtime registers so its staging area
/// is emptied on graceful stop (spec.md §4.I: "the staging area is
/// flushed by treating the current watermark as +∞").
pub type Finalizer = Arc<dyn Fn() -> EngineResult<()> + Send + Sync>;

pub struct QueryManager<C> {
    pipelines: Arc<HashMap<PipelineId, CompiledPipeline<C>>>,
    sender: Sender<Message>,
    workers: Vec<JoinHandle<()>>,
    finalizers: Vec<Finalizer>,
    hard_stopped: Arc<AtomicBool>,
}

impl<C: EvaluateRecord + Send + Sync + 'static> QueryManager<C> {
    pub fn new(
        num_workers: usize,
        pipelines: HashMap<PipelineId, CompiledPipeline<C>>,
        buffer_pool: Arc<BufferPool>,
        handlers: Arc<HandlerRegistry>,
        hooks: Arc<StatefulHooks>,
        sinks: Arc<SinkRegistry>,
        finalizers: Vec<Finalizer>,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Message>();
        let pipelines = Arc::new(pipelines);
        let hard_stopped = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(num_workers);

        for worker_index in 0..num_workers {
            let receiver = receiver.clone();
            let pipelines = pipelines.clone();
            let buffer_pool = buffer_pool.clone();
            let handlers = handlers.clone();
            let hooks = hooks.clone();
            let sinks = sinks.clone();
            let sender = sender.clone();
            let hard_stopped = hard_stopped.clone();
            let handle = std::thread::Builder::new()
                .name(format!("nes-worker-{worker_index}"))
                .spawn(move || worker_loop(WorkerId(worker_index as u64), receiver, pipelines, buffer_pool, handlers, hooks, sinks, sender, hard_stopped))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        QueryManager { pipelines, sender, workers, finalizers, hard_stopped }
    }

    /// Enqueues a task. Never blocks on the queue itself (unbounded); a
    /// producer is throttled only by having to obtain the buffer it fills
    /// before calling this (spec.md §5).
    pub fn submit(&self, pipeline: PipelineId, buffer: TupleBuffer) {
        debug_assert!(self.pipelines.contains_key(&pipeline), "submitted task for a pipeline this manager does not know");
        let _ = self.sender.send(Message::Task { pipeline, buffer });
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs the termination sequence (spec.md §4.G). Callers must stop
    /// feeding sources before calling this with `Graceful`; this method
    /// only covers steps 2-5 (flush, drain, join, release).
    ///
    /// `Graceful` runs every registered finalizer, then lets each worker
    /// finish whatever is already queued ahead of its stop marker.
    /// `Hard` flips a shared flag first, so tasks a worker pulls after
    /// that point (already queued or enqueued by an in-flight emit) are
    /// dropped instead of executed.
    pub fn stop(mut self, stop_type: StopType) {
        if stop_type == StopType::Hard {
            self.hard_stopped.store(true, Ordering::SeqCst);
        } else {
            for finalizer in &self.finalizers {
                if let Err(err) = finalizer() {
                    tracing::error!(error = %err, "finalizer failed during graceful stop");
                }
            }
        }
        for _ in 0..self.workers.len() {
            let _ = self.sender.send(Message::Stop);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop<C: EvaluateRecord>(
    worker_id: WorkerId,
    receiver: Receiver<Message>,
    pipelines: Arc<HashMap<PipelineId, CompiledPipeline<C>>>,
    buffer_pool: Arc<BufferPool>,
    handlers: Arc<HandlerRegistry>,
    hooks: Arc<StatefulHooks>,
    sinks: Arc<SinkRegistry>,
    sender: Sender<Message>,
    hard_stopped: Arc<AtomicBool>,
) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Stop => break,
            Message::Task { pipeline: pipeline_id, buffer } => {
                if hard_stopped.load(Ordering::Acquire) {
                    continue;
                }
                let Some(pipeline) = pipelines.get(&pipeline_id) else {
                    tracing::warn!(pipeline = ?pipeline_id, "task for unknown pipeline dropped");
                    continue;
                };
                let successors = pipeline.successors.clone();
                let emit_sender = sender.clone();
                let emit_pipelines = pipelines.clone();
                let emit: EmitFn = Arc::new(move |buf: TupleBuffer| {
                    for successor in &successors {
                        if emit_pipelines.contains_key(successor) {
                            let _ = emit_sender.send(Message::Task { pipeline: *successor, buffer: buf.retain() });
                        }
                    }
                });
                let ctx =
                    PipelineExecutionContext::new(pipeline_id, worker_id, buffer_pool.clone(), handlers.clone(), pipeline.successors.clone(), emit);
                if let Err(err) = run(pipeline, &buffer, &ctx, &hooks, &sinks) {
                    tracing::error!(pipeline = ?pipeline_id, error = %err, "pipeline execution failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_pipeline;
    use nes_compile::Interpreter;
    use nes_core::{DataType, Field, LayoutKind, Record, Schema, Value};
    use nes_plan::{Expr, PhysicalOperator, Pipeline};
    use parking_lot::Mutex;

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64), Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn task_flows_through_scan_map_emit_to_a_sink() {
        let scan_pipeline = Pipeline {
            id: PipelineId(0),
            successors: vec![PipelineId(1)],
            operators: vec![
                PhysicalOperator::Scan,
                PhysicalOperator::Map { output_field: "value".into(), expr: Expr::field("value").mul(Expr::int(2)) },
                PhysicalOperator::Emit,
            ],
            input_schema: schema(),
        };
        let sink_pipeline = Pipeline {
            id: PipelineId(1),
            successors: vec![],
            operators: vec![PhysicalOperator::Scan, PhysicalOperator::SinkWrite { name: "out".into() }],
            input_schema: schema(),
        };

        let backend = Interpreter::new();
        let mut compiled = HashMap::new();
        compiled.insert(PipelineId(0), compile_pipeline(&scan_pipeline, &schema(), &backend).unwrap());
        compiled.insert(PipelineId(1), compile_pipeline(&sink_pipeline, &schema(), &backend).unwrap());

        let pool = Arc::new(BufferPool::new(4, 4096));
        let handlers = Arc::new(HandlerRegistry::new());
        let hooks = Arc::new(StatefulHooks::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sinks = SinkRegistry::new();
        sinks.register("out", Arc::new(move |records: &[Record]| {
            seen2.lock().extend_from_slice(records);
            Ok(())
        }));

        let manager = QueryManager::new(2, compiled, pool.clone(), handlers, hooks, Arc::new(sinks), vec![]);

        let input = pool.get_buffer_blocking();
        crate::codec::emit_records(&[Record::new().with("id", Value::UInt64(1)).with("value", Value::Int64(21))], &schema(), &input, &pool).unwrap();
        manager.submit(PipelineId(0), input);

        // Give the two worker threads a moment to drain the two-hop chain.
        std::thread::sleep(std::time::Duration::from_millis(100));
        manager.stop(StopType::Graceful);

        let out = seen.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("value"), Some(&Value::Int64(42)));
    }
}
