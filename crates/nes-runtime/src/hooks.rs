//! Extension points the executor calls into for stateful operators
//! (aggregation, join) without `nes-runtime` depending on `nes-windowing`
//! or `nes-join` — those crates depend on this one (for
//! `PipelineExecutionContext`/`HandlerRegistry`), so the dependency can't
//! run the other way. A windowing/join runtime registers its handler
//! implementations here by `OperatorHandlerId` at plan-deployment time;
//! the executor looks them up by id and calls through the trait.
//!
//! Mirrors the teacher's `Operator`-trait seam (`rde-core::operator`) in
//! spirit: the executor is generic over *what* a stateful operator does,
//! only fixing *when* it's called.

use std::sync::Arc;

use dashmap::DashMap;
use nes_core::{EngineResult, OperatorHandlerId, OriginId, Record, SequenceNumber, Value, WorkerId};
use nes_plan::{JoinKind, JoinSide, WindowSpec};

/// Registered under an `AggregationBuild` operator's handler id: receives
/// one record at a time, keyed by its group-by values.
pub trait AggregationSink: Send + Sync {
    fn ingest(&self, worker_id: WorkerId, group_key: Vec<Value>, record: &Record, window: WindowSpec, event_time: u64) -> EngineResult<()>;

    /// Called once per pipeline invocation after its records have all been
    /// ingested: advances the handler's view of the global watermark
    /// (spec.md §4.H/§4.I) and stages any thread-local slice whose end
    /// now falls at or before it.
    fn trigger(&self, worker_id: WorkerId, origin: OriginId, sequence_number: SequenceNumber, watermark_ts: u64) -> EngineResult<()>;
}

/// Registered under the paired `AggregationMergeScan`'s handler id: called
/// once per merge-pipeline invocation, returns the finalized records for
/// whatever slice(s) became ready to trigger.
pub trait AggregationSource: Send + Sync {
    fn drain_triggered(&self) -> EngineResult<Vec<Record>>;
}

/// Registered under a `JoinBuild` operator's handler id.
pub trait JoinSink: Send + Sync {
    fn ingest(&self, worker_id: WorkerId, side: JoinSide, key: Value, record: &Record, window: WindowSpec, event_time: u64) -> EngineResult<()>;

    fn trigger(&self, worker_id: WorkerId, origin: OriginId, sequence_number: SequenceNumber, watermark_ts: u64) -> EngineResult<()>;
}

/// Registered under the paired `JoinProbeScan`'s handler id.
pub trait JoinSource: Send + Sync {
    fn drain_triggered(&self, kind: JoinKind) -> EngineResult<Vec<Record>>;
}

#[derive(Default)]
pub struct StatefulHooks {
    aggregation_sinks: DashMap<OperatorHandlerId, Arc<dyn AggregationSink>>,
    aggregation_sources: DashMap<OperatorHandlerId, Arc<dyn AggregationSource>>,
    join_sinks: DashMap<OperatorHandlerId, Arc<dyn JoinSink>>,
    join_sources: DashMap<OperatorHandlerId, Arc<dyn JoinSource>>,
}

impl StatefulHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_aggregation_sink(&self, id: OperatorHandlerId, sink: Arc<dyn AggregationSink>) {
        self.aggregation_sinks.insert(id, sink);
    }

    pub fn register_aggregation_source(&self, id: OperatorHandlerId, source: Arc<dyn AggregationSource>) {
        self.aggregation_sources.insert(id, source);
    }

    pub fn register_join_sink(&self, id: OperatorHandlerId, sink: Arc<dyn JoinSink>) {
        self.join_sinks.insert(id, sink);
    }

    pub fn register_join_source(&self, id: OperatorHandlerId, source: Arc<dyn JoinSource>) {
        self.join_sources.insert(id, source);
    }

    pub fn aggregation_sink(&self, id: OperatorHandlerId) -> Option<Arc<dyn AggregationSink>> {
        self.aggregation_sinks.get(&id).map(|entry| entry.value().clone())
    }

    pub fn aggregation_source(&self, id: OperatorHandlerId) -> Option<Arc<dyn AggregationSource>> {
        self.aggregation_sources.get(&id).map(|entry| entry.value().clone())
    }

    pub fn join_sink(&self, id: OperatorHandlerId) -> Option<Arc<dyn JoinSink>> {
        self.join_sinks.get(&id).map(|entry| entry.value().clone())
    }

    pub fn join_source(&self, id: OperatorHandlerId) -> Option<Arc<dyn JoinSource>> {
        self.join_sources.get(&id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingSink(Mutex<Vec<(Vec<Value>, u64)>>);

    impl AggregationSink for RecordingSink {
        fn ingest(&self, _worker_id: WorkerId, group_key: Vec<Value>, _record: &Record, _window: WindowSpec, event_time: u64) -> EngineResult<()> {
            self.0.lock().push((group_key, event_time));
            Ok(())
        }

        fn trigger(&self, _worker_id: WorkerId, _origin: OriginId, _sequence_number: SequenceNumber, _watermark_ts: u64) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn registers_and_looks_up_a_trait_object_hook() {
        let hooks = StatefulHooks::new();
        let id = OperatorHandlerId(1);
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        hooks.register_aggregation_sink(id, sink.clone());

        let looked_up = hooks.aggregation_sink(id).expect("registered above");
        looked_up.ingest(WorkerId(0), vec![Value::Int64(1)], &Record::new(), WindowSpec::tumbling(10), 42).unwrap();
        assert_eq!(sink.0.lock().len(), 1);
        assert!(hooks.aggregation_sink(OperatorHandlerId(2)).is_none());
    }
}
