//! Physical lowering (spec.md §4.D): maps each logical operator to one or
//! more physical operators and fuses runs of stateless operators into a
//! single pipeline bounded by a `Scan` and an `Emit`.
//!
//! Grounded on
//! `examples/original_source/nes-core/src/QueryCompiler/Phases/Translations/LowerPhysicalToNautilusOperators.cpp`:
//! lowering is one topological pass, and fusion stops the moment a
//! stateful operator (aggregation, join build/probe) is reached.

use std::collections::HashMap;

use nes_core::{IdGenerator, OperatorHandlerId, OperatorId, PipelineId, Schema};
use serde::{Deserialize, Serialize};

use crate::operators::{AggregateSpec, JoinKind, OperatorKind, WindowSpec};
use crate::plan::LogicalPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinSide {
    Left,
    Right,
}

/// A pipelineable unit. Every variant other than `Scan`/`Emit` mirrors one
/// `OperatorKind`; stateful variants additionally carry the
/// `OperatorHandlerId` their runtime state lives under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhysicalOperator {
    /// Reads tuples out of the pipeline's input `TupleBuffer` into
    /// `Record`s (memory-layout-aware; see `nes-core::layout`).
    Scan,
    Selection(crate::expr::Expr),
    Projection(Vec<String>),
    Map { output_field: String, expr: crate::expr::Expr },
    Union,
    WatermarkAssigner { event_time_field: String, max_out_of_orderness: u64 },
    /// Terminates a pipeline: inserts/updates the thread-local slice store
    /// keyed by the configured window (spec.md §4.I). Downstream merge
    /// tasks are dispatched by the windowing runtime, not by this pipeline.
    AggregationBuild { handler: OperatorHandlerId, group_by: Vec<String>, aggregates: Vec<AggregateSpec>, window: WindowSpec },
    /// Starts the pipeline a `SliceMergeTask` schedules: merges per-worker
    /// partials for one `sliceEnd` and emits final records.
    AggregationMergeScan { handler: OperatorHandlerId, group_by: Vec<String>, aggregates: Vec<AggregateSpec> },
    /// Terminates a pipeline: appends build-side records to the
    /// configured join slice (spec.md §4.J).
    JoinBuild { handler: OperatorHandlerId, side: JoinSide, key: String, window: WindowSpec },
    /// Starts the pipeline a join-trigger task schedules: probes both
    /// sealed sides of a slice and emits matches.
    JoinProbeScan { handler: OperatorHandlerId, kind: JoinKind },
    /// Writes tuples to a `Sink` (spec.md §6); terminates the pipeline
    /// without producing a successor.
    SinkWrite { name: String },
    /// Materializes the pipeline's in-flight records into a fresh
    /// `TupleBuffer` and hands it to the successor pipeline(s).
    Emit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub operators: Vec<PhysicalOperator>,
    pub successors: Vec<PipelineId>,
    /// The schema of whatever produced this pipeline's input (the logical
    /// node the leading `Scan`, or the `AggregationMergeScan`/`JoinProbeScan`,
    /// reads from) — what a deploying caller passes to `compile_pipeline`.
    pub input_schema: Schema,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub pipelines: Vec<Pipeline>,
}

struct Lowering<'a> {
    plan: &'a LogicalPlan,
    ids: &'a IdGenerator,
    handlers: HashMap<OperatorId, OperatorHandlerId>,
    pipelines: Vec<Pipeline>,
    /// Maps the logical node that *produces* a pipeline boundary's input to
    /// the pipeline id consuming it, so sibling branches (join's two
    /// sides, union's two inputs) each get their own upstream pipeline.
    producer_pipeline: HashMap<OperatorId, PipelineId>,
    /// Set right after an `AggregationMergeScan`/`JoinProbeScan` pipeline is
    /// created, so it can be wired as a predecessor of whatever pipeline
    /// the "main" walk next materializes from `current_ops` — the merge/probe
    /// pipeline has no successor of its own until that downstream pipeline
    /// exists.
    pending_downstream_link: Option<PipelineId>,
}

impl<'a> Lowering<'a> {
    fn handler_for(&mut self, node: OperatorId) -> OperatorHandlerId {
        *self.handlers.entry(node).or_insert_with(|| self.ids.next_operator_handler())
    }

    fn new_pipeline_id(&self) -> PipelineId {
        self.ids.next_pipeline()
    }
}

/// Lowers `plan` (already schema/origin-inferred) into a `PhysicalPlan`.
pub fn lower(plan: &LogicalPlan, ids: &IdGenerator) -> PhysicalPlan {
    let mut lowering =
        Lowering { plan, ids, handlers: HashMap::new(), pipelines: Vec::new(), producer_pipeline: HashMap::new(), pending_downstream_link: None };
    let order = plan.topology().topological_order();

    // current_ops accumulates the operators of the pipeline currently
    // being built for the single "main" scan-chain walk; stateful nodes
    // flush it and start a fresh one. current_schema tracks the schema
    // that chain's leading Scan reads, updated every time a fresh Scan is
    // pushed.
    let mut current_ops: Vec<PhysicalOperator> = Vec::new();
    let mut current_has_scan = false;
    let mut current_schema: Option<Schema> = None;

    for id in order {
        let node = lowering.plan.node(id).expect("topological order only yields known nodes");
        let node_schema = || node.output_schema.clone().expect("schema already inferred");
        match &node.kind {
            OperatorKind::Source { .. } => {
                flush(&mut lowering, &mut current_ops, &mut current_has_scan, &current_schema, id);
                current_ops.push(PhysicalOperator::Scan);
                current_has_scan = true;
                current_schema = Some(node_schema());
            }
            OperatorKind::Selection { predicate } => current_ops.push(PhysicalOperator::Selection(predicate.clone())),
            OperatorKind::Projection { fields } => current_ops.push(PhysicalOperator::Projection(fields.clone())),
            OperatorKind::Map { output_field, expr } => {
                current_ops.push(PhysicalOperator::Map { output_field: output_field.clone(), expr: expr.clone() })
            }
            OperatorKind::Union => current_ops.push(PhysicalOperator::Union),
            OperatorKind::WatermarkAssigner { event_time_field, max_out_of_orderness } => current_ops.push(
                PhysicalOperator::WatermarkAssigner { event_time_field: event_time_field.clone(), max_out_of_orderness: *max_out_of_orderness },
            ),
            OperatorKind::Aggregation { group_by, aggregates, window } => {
                let handler = lowering.handler_for(id);
                current_ops.push(PhysicalOperator::AggregationBuild {
                    handler,
                    group_by: group_by.clone(),
                    aggregates: aggregates.clone(),
                    window: *window,
                });
                let build_id = finish_pipeline(&mut lowering, &mut current_ops, &mut current_has_scan, &current_schema, id);
                let merge_id = lowering.new_pipeline_id();
                lowering.pipelines.push(Pipeline {
                    id: merge_id,
                    operators: vec![PhysicalOperator::AggregationMergeScan { handler, group_by: group_by.clone(), aggregates: aggregates.clone() }],
                    successors: Vec::new(),
                    input_schema: node_schema(),
                });
                link(&mut lowering, build_id, merge_id);
                current_ops.push(PhysicalOperator::Scan);
                current_has_scan = true;
                current_schema = Some(node_schema());
                lowering.producer_pipeline.insert(id, merge_id);
                lowering.pending_downstream_link = Some(merge_id);
            }
            OperatorKind::BinaryJoin { kind, left_key, right_key, window } => {
                // Each side of the join is its own upstream pipeline
                // (already flushed when its child chain ended), so here we
                // just register the probe pipeline and wire both sides'
                // build pipelines to it.
                let handler = lowering.handler_for(id);
                let probe_id = lowering.new_pipeline_id();
                lowering.pipelines.push(Pipeline {
                    id: probe_id,
                    operators: vec![PhysicalOperator::JoinProbeScan { handler, kind: *kind }],
                    successors: Vec::new(),
                    input_schema: node_schema(),
                });

                let children = lowering.plan.topology().children_of(id).to_vec();
                let (left_child, right_child) = (children[0], children[1]);
                let left_build = finish_build_side(&mut lowering, left_child, handler, JoinSide::Left, left_key.clone(), *window);
                let right_build = finish_build_side(&mut lowering, right_child, handler, JoinSide::Right, right_key.clone(), *window);
                link(&mut lowering, left_build, probe_id);
                link(&mut lowering, right_build, probe_id);

                current_ops.push(PhysicalOperator::Scan);
                current_has_scan = true;
                current_schema = Some(node_schema());
                lowering.producer_pipeline.insert(id, probe_id);
                lowering.pending_downstream_link = Some(probe_id);
            }
            OperatorKind::Sink { name } => {
                current_ops.push(PhysicalOperator::SinkWrite { name: name.clone() });
                finish_pipeline(&mut lowering, &mut current_ops, &mut current_has_scan, &current_schema, id);
            }
        }
    }

    if !current_ops.is_empty() {
        // Dangling chain with no explicit sink (e.g. a plan under test that
        // stops at the last transform): still materialize it as a pipeline
        // so its output is observable.
        current_ops.push(PhysicalOperator::Emit);
        let pid = lowering.new_pipeline_id();
        let schema = current_schema.clone().expect("a non-empty chain has seen at least one Scan");
        if let Some(from) = lowering.pending_downstream_link.take() {
            link(&mut lowering, from, pid);
        }
        lowering.pipelines.push(Pipeline { id: pid, operators: current_ops, successors: Vec::new(), input_schema: schema });
    }

    PhysicalPlan { pipelines: lowering.pipelines }
}

fn flush(lowering: &mut Lowering, ops: &mut Vec<PhysicalOperator>, has_scan: &mut bool, schema: &Option<Schema>, producing_node: OperatorId) {
    if ops.is_empty() {
        return;
    }
    ops.push(PhysicalOperator::Emit);
    let pid = lowering.new_pipeline_id();
    let schema = schema.clone().expect("a non-empty chain has seen at least one Scan");
    if let Some(from) = lowering.pending_downstream_link.take() {
        link(lowering, from, pid);
    }
    lowering.pipelines.push(Pipeline { id: pid, operators: std::mem::take(ops), successors: Vec::new(), input_schema: schema });
    *has_scan = false;
    lowering.producer_pipeline.insert(producing_node, pid);
}

fn finish_pipeline(
    lowering: &mut Lowering,
    ops: &mut Vec<PhysicalOperator>,
    has_scan: &mut bool,
    schema: &Option<Schema>,
    producing_node: OperatorId,
) -> PipelineId {
    let pid = lowering.new_pipeline_id();
    let schema = schema.clone().expect("a non-empty chain has seen at least one Scan");
    if let Some(from) = lowering.pending_downstream_link.take() {
        link(lowering, from, pid);
    }
    lowering.pipelines.push(Pipeline { id: pid, operators: std::mem::take(ops), successors: Vec::new(), input_schema: schema });
    *has_scan = false;
    lowering.producer_pipeline.insert(producing_node, pid);
    pid
}

fn finish_build_side(lowering: &mut Lowering, child: OperatorId, handler: OperatorHandlerId, side: JoinSide, key: String, window: WindowSpec) -> PipelineId {
    let pid = *lowering.producer_pipeline.get(&child).expect("child pipeline already lowered by topological order");
    if let Some(pipeline) = lowering.pipelines.iter_mut().find(|p| p.id == pid) {
        // Replace the trailing `Emit` with the join-build terminator: the
        // build side never hands a buffer to a sibling pipeline through a
        // normal emit, it appends into the slice directly.
        if matches!(pipeline.operators.last(), Some(PhysicalOperator::Emit)) {
            pipeline.operators.pop();
        }
        pipeline.operators.push(PhysicalOperator::JoinBuild { handler, side, key, window });
    }
    pid
}

fn link(lowering: &mut Lowering, upstream: PipelineId, downstream: PipelineId) {
    if let Some(pipeline) = lowering.pipelines.iter_mut().find(|p| p.id == upstream) {
        pipeline.successors.push(downstream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::plan::LogicalPlan;
    use nes_core::{DataType, Field, LayoutKind, Schema};

    fn s1_schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64), Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn stateless_chain_fuses_into_a_single_pipeline() {
        let ids = IdGenerator::new();
        let mut plan = LogicalPlan::new();
        let source = plan.with_children(&ids, OperatorKind::Source { name: "s".into(), schema: s1_schema() }, &[]).unwrap();
        let filter = plan
            .with_children(&ids, OperatorKind::Selection { predicate: Expr::field("value").gt(Expr::int(0)) }, &[source])
            .unwrap();
        let map = plan
            .with_children(&ids, OperatorKind::Map { output_field: "value".into(), expr: Expr::field("value").mul(Expr::int(2)) }, &[filter])
            .unwrap();
        plan.with_children(&ids, OperatorKind::Sink { name: "out".into() }, &[map]).unwrap();
        plan.infer(&ids).unwrap();

        let physical = lower(&plan, &ids);
        assert_eq!(physical.pipelines.len(), 1);
        let ops = &physical.pipelines[0].operators;
        assert!(matches!(ops.first(), Some(PhysicalOperator::Scan)));
        assert!(matches!(ops.last(), Some(PhysicalOperator::SinkWrite { .. })));
    }

    #[test]
    fn aggregation_splits_into_build_and_merge_pipelines() {
        let ids = IdGenerator::new();
        let mut plan = LogicalPlan::new();
        let source = plan.with_children(&ids, OperatorKind::Source { name: "s".into(), schema: s1_schema() }, &[]).unwrap();
        let agg = plan
            .with_children(
                &ids,
                OperatorKind::Aggregation {
                    group_by: vec![],
                    aggregates: vec![AggregateSpec { input_field: "value".into(), function: crate::operators::AggregateFunction::Sum, output_field: "sum".into() }],
                    window: WindowSpec::tumbling(10),
                },
                &[source],
            )
            .unwrap();
        plan.with_children(&ids, OperatorKind::Sink { name: "out".into() }, &[agg]).unwrap();
        plan.infer(&ids).unwrap();

        let physical = lower(&plan, &ids);
        let has_build = physical.pipelines.iter().any(|p| p.operators.iter().any(|o| matches!(o, PhysicalOperator::AggregationBuild { .. })));
        let has_merge = physical.pipelines.iter().any(|p| p.operators.iter().any(|o| matches!(o, PhysicalOperator::AggregationMergeScan { .. })));
        assert!(has_build);
        assert!(has_merge);
    }
}
