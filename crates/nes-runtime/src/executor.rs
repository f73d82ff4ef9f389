//! Compiles a `nes_plan::Pipeline` once (tracing every `Selection`/`Map`
//! expression through the Nautilus-style compiler) and runs the resulting
//! `CompiledPipeline` against however many input buffers arrive over its
//! lifetime (spec.md §4.D/§4.F): "first execution is symbolic, subsequent
//! executions run the lowered form."

use std::collections::HashMap;
use std::sync::Arc;

use nes_buffer::TupleBuffer;
use nes_compile::{Backend, EvaluateRecord, ProxyRegistry};
use nes_core::{EngineError, EngineResult, Field, OperatorHandlerId, PipelineId, Record, Schema, Value};
use nes_plan::{JoinKind, JoinSide, PhysicalOperator, Pipeline, WindowSpec};

use crate::codec;
use crate::compile_bridge::compile_expr;
use crate::hooks::StatefulHooks;
use crate::pipeline_context::PipelineExecutionContext;

enum CompiledOperator<C> {
    Scan { schema: Schema },
    Selection(C),
    Projection(Vec<String>),
    Map { output_field: String, compiled: C },
    Union,
    WatermarkAssigner { event_time_field: String, max_out_of_orderness: u64 },
    AggregationBuild { handler: OperatorHandlerId, group_by: Vec<String>, window: WindowSpec },
    AggregationMergeScan { handler: OperatorHandlerId },
    JoinBuild { handler: OperatorHandlerId, side: JoinSide, key: String, window: WindowSpec },
    JoinProbeScan { handler: OperatorHandlerId, kind: JoinKind },
    SinkWrite { name: String },
    Emit { schema: Schema },
}

/// A pipeline whose `Selection`/`Map` expressions have already been traced
/// and compiled; cheap to run repeatedly against a stream of buffers.
pub struct CompiledPipeline<C> {
    pub id: PipelineId,
    pub successors: Vec<PipelineId>,
    operators: Vec<CompiledOperator<C>>,
}

/// Compiles `pipeline`'s expressions against `backend`, threading the
/// tuple schema through the chain the same way logical schema inference
/// does (`Map` appends its output field, `Projection` narrows).
pub fn compile_pipeline<B: Backend>(pipeline: &Pipeline, input_schema: &Schema, backend: &B) -> EngineResult<CompiledPipeline<B::Compiled>> {
    let mut schema = input_schema.clone();
    let mut operators = Vec::with_capacity(pipeline.operators.len());

    for op in &pipeline.operators {
        let compiled = match op {
            PhysicalOperator::Scan => CompiledOperator::Scan { schema: schema.clone() },
            PhysicalOperator::Selection(expr) => {
                let trace = compile_expr(expr, &schema)?;
                let func = nes_compile::trace_to_ir_conversion_phase(trace)?;
                CompiledOperator::Selection(backend.compile(&func)?)
            }
            PhysicalOperator::Map { output_field, expr } => {
                let stamp = expr.infer_type(&schema)?;
                let trace = compile_expr(expr, &schema)?;
                let func = nes_compile::trace_to_ir_conversion_phase(trace)?;
                let compiled = backend.compile(&func)?;
                schema = schema.with_field(Field::new(output_field.clone(), stamp));
                CompiledOperator::Map { output_field: output_field.clone(), compiled }
            }
            PhysicalOperator::Projection(fields) => {
                let kept = fields
                    .iter()
                    .map(|name| schema.field(name).cloned().ok_or_else(|| EngineError::SchemaInferenceFailure(format!("projection references unknown field `{name}`"))))
                    .collect::<EngineResult<Vec<_>>>()?;
                schema = Schema::new(kept, schema.layout);
                CompiledOperator::Projection(fields.clone())
            }
            PhysicalOperator::Union => CompiledOperator::Union,
            PhysicalOperator::WatermarkAssigner { event_time_field, max_out_of_orderness } => {
                CompiledOperator::WatermarkAssigner { event_time_field: event_time_field.clone(), max_out_of_orderness: *max_out_of_orderness }
            }
            PhysicalOperator::AggregationBuild { handler, group_by, aggregates: _, window } => {
                CompiledOperator::AggregationBuild { handler: *handler, group_by: group_by.clone(), window: *window }
            }
            PhysicalOperator::AggregationMergeScan { handler, group_by: _, aggregates: _ } => CompiledOperator::AggregationMergeScan { handler: *handler },
            PhysicalOperator::JoinBuild { handler, side, key, window } => {
                CompiledOperator::JoinBuild { handler: *handler, side: *side, key: key.clone(), window: *window }
            }
            PhysicalOperator::JoinProbeScan { handler, kind } => CompiledOperator::JoinProbeScan { handler: *handler, kind: *kind },
            PhysicalOperator::SinkWrite { name } => CompiledOperator::SinkWrite { name: name.clone() },
            PhysicalOperator::Emit => CompiledOperator::Emit { schema: schema.clone() },
        };
        operators.push(compiled);
    }

    Ok(CompiledPipeline { id: pipeline.id, successors: pipeline.successors.clone(), operators })
}

pub type SinkFn = Arc<dyn Fn(&[Record]) -> EngineResult<()> + Send + Sync>;

/// Sinks a pipeline's `SinkWrite` operators address by name (spec.md §6);
/// kept separate from `StatefulHooks` since sinks are stateless from the
/// executor's point of view.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, SinkFn>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, sink: SinkFn) {
        self.sinks.insert(name.into(), sink);
    }

    fn write(&self, name: &str, records: &[Record]) -> EngineResult<()> {
        let sink = self.sinks.get(name).ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no sink registered under name `{name}`")))?;
        sink(records)
    }
}

/// Runs one buffer through a compiled pipeline: decodes at `Scan`,
/// transforms the in-flight `Record`s operator by operator, and either
/// hands a fresh buffer to `ctx`'s emit hook at `Emit` or writes to a
/// named sink at `SinkWrite`.
pub fn run<C: EvaluateRecord>(
    pipeline: &CompiledPipeline<C>,
    input: &TupleBuffer,
    ctx: &PipelineExecutionContext,
    hooks: &StatefulHooks,
    sinks: &SinkRegistry,
) -> EngineResult<()> {
    let proxies = ProxyRegistry::new();
    let mut records: Vec<Record> = Vec::new();
    let origin = input.origin_id();
    let mut watermark_ts = input.watermark();
    let mut event_time_field: Option<String> = None;

    for op in &pipeline.operators {
        match op {
            CompiledOperator::Scan { schema } => records = codec::scan_buffer(input, schema)?,
            CompiledOperator::Selection(compiled) => {
                let mut kept = Vec::with_capacity(records.len());
                for record in records {
                    if compiled.evaluate(&record, &proxies)?.as_bool().unwrap_or(false) {
                        kept.push(record);
                    }
                }
                records = kept;
            }
            CompiledOperator::Projection(fields) => {
                records = records
                    .into_iter()
                    .map(|record| {
                        let mut out = Record::new();
                        for name in fields {
                            if let Some(value) = record.get(name) {
                                out.set(name.clone(), value.clone());
                            }
                        }
                        out
                    })
                    .collect();
            }
            CompiledOperator::Map { output_field, compiled } => {
                for record in records.iter_mut() {
                    let value = compiled.evaluate(record, &proxies)?;
                    record.set(output_field.clone(), value);
                }
            }
            CompiledOperator::Union => {}
            CompiledOperator::WatermarkAssigner { event_time_field: field, max_out_of_orderness } => {
                event_time_field = Some(field.clone());
                let max_ts = records.iter().filter_map(|r| r.get(field)).filter_map(Value::as_u64).max();
                if let Some(max_ts) = max_ts {
                    watermark_ts = watermark_ts.max(max_ts.saturating_sub(*max_out_of_orderness));
                }
            }
            CompiledOperator::AggregationBuild { handler, group_by, window } => {
                let sink = hooks
                    .aggregation_sink(*handler)
                    .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no aggregation handler registered for {handler:?}")))?;
                for record in &records {
                    let key = group_by.iter().map(|name| record.get(name).cloned().unwrap_or(Value::Bool(false))).collect();
                    let ts = event_time(&event_time_field, record);
                    sink.ingest(ctx.worker_id(), key, record, *window, ts)?;
                }
                sink.trigger(ctx.worker_id(), origin, input.sequence_number(), watermark_ts)?;
                records.clear();
            }
            CompiledOperator::AggregationMergeScan { handler } => {
                let source = hooks
                    .aggregation_source(*handler)
                    .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no aggregation handler registered for {handler:?}")))?;
                records = source.drain_triggered()?;
            }
            CompiledOperator::JoinBuild { handler, side, key, window } => {
                let sink = hooks.join_sink(*handler).ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no join handler registered for {handler:?}")))?;
                for record in &records {
                    let key_value = record.get(key).cloned().unwrap_or(Value::Bool(false));
                    let ts = event_time(&event_time_field, record);
                    sink.ingest(ctx.worker_id(), *side, key_value, record, *window, ts)?;
                }
                sink.trigger(ctx.worker_id(), origin, input.sequence_number(), watermark_ts)?;
                records.clear();
            }
            CompiledOperator::JoinProbeScan { handler, kind } => {
                let source = hooks.join_source(*handler).ok_or_else(|| EngineError::OperatorExecutionFailure(format!("no join handler registered for {handler:?}")))?;
                records = source.drain_triggered(*kind)?;
            }
            CompiledOperator::SinkWrite { name } => sinks.write(name, &records)?,
            CompiledOperator::Emit { schema } => {
                if records.is_empty() {
                    continue;
                }
                let out = ctx.buffer_pool().get_buffer_blocking();
                out.set_origin_id(origin);
                out.set_sequence_number(ctx.next_sequence_number());
                out.set_watermark(watermark_ts);
                codec::emit_records(&records, schema, &out, ctx.buffer_pool())?;
                ctx.emit_buffer(out);
            }
        }
    }
    Ok(())
}

fn event_time(field: &Option<String>, record: &Record) -> u64 {
    field.as_ref().and_then(|name| record.get(name)).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_buffer::BufferPool;
    use nes_compile::Interpreter;
    use nes_core::{DataType, LayoutKind};
    use nes_plan::Expr;
    use parking_lot::Mutex;

    fn s1_schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64), Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    fn make_context(pool: Arc<BufferPool>, emitted: Arc<Mutex<Vec<TupleBuffer>>>) -> PipelineExecutionContext {
        let handlers = Arc::new(crate::handler::HandlerRegistry::new());
        let emit: crate::pipeline_context::EmitFn = Arc::new(move |buf| emitted.lock().push(buf));
        PipelineExecutionContext::new(PipelineId(0), nes_core::WorkerId(0), pool, handlers, vec![], emit)
    }

    #[test]
    fn selection_and_map_pipeline_filters_and_transforms() {
        let pipeline = Pipeline {
            id: PipelineId(0),
            successors: vec![],
            operators: vec![
                PhysicalOperator::Scan,
                PhysicalOperator::Selection(Expr::field("value").gt(Expr::int(0))),
                PhysicalOperator::Map { output_field: "value".into(), expr: Expr::field("value").mul(Expr::int(2)) },
                PhysicalOperator::Emit,
            ],
            input_schema: s1_schema(),
        };
        let backend = Interpreter::new();
        let compiled = compile_pipeline(&pipeline, &s1_schema(), &backend).unwrap();

        let pool = Arc::new(BufferPool::new(2, 4096));
        let input = pool.get_buffer_blocking();
        let records = vec![
            Record::new().with("id", Value::UInt64(1)).with("value", Value::Int64(5)),
            Record::new().with("id", Value::UInt64(2)).with("value", Value::Int64(-1)),
        ];
        codec::emit_records(&records, &s1_schema(), &input, &pool).unwrap();

        let emitted = Arc::new(Mutex::new(Vec::new()));
        let ctx = make_context(pool.clone(), emitted.clone());
        let hooks = StatefulHooks::new();
        let sinks = SinkRegistry::new();
        run(&compiled, &input, &ctx, &hooks, &sinks).unwrap();

        let out = emitted.lock();
        assert_eq!(out.len(), 1);
        let decoded = codec::scan_buffer(&out[0], &s1_schema()).unwrap();
        assert_eq!(decoded, vec![Record::new().with("id", Value::UInt64(1)).with("value", Value::Int64(10))]);
    }

    #[test]
    fn sink_write_invokes_the_registered_sink() {
        let pipeline = Pipeline {
            id: PipelineId(0),
            successors: vec![],
            operators: vec![PhysicalOperator::Scan, PhysicalOperator::SinkWrite { name: "out".into() }],
            input_schema: s1_schema(),
        };
        let backend = Interpreter::new();
        let compiled = compile_pipeline(&pipeline, &s1_schema(), &backend).unwrap();

        let pool = Arc::new(BufferPool::new(1, 4096));
        let input = pool.get_buffer_blocking();
        let records = vec![Record::new().with("id", Value::UInt64(1)).with("value", Value::Int64(5))];
        codec::emit_records(&records, &s1_schema(), &input, &pool).unwrap();

        let emitted = Arc::new(Mutex::new(Vec::new()));
        let ctx = make_context(pool, emitted);
        let hooks = StatefulHooks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut sinks = SinkRegistry::new();
        sinks.register("out", Arc::new(move |records: &[Record]| {
            seen2.lock().extend_from_slice(records);
            Ok(())
        }));
        run(&compiled, &input, &ctx, &hooks, &sinks).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }
}
