//! `LogicalPlan`: a monadic builder over `PlanNode`s and a `Topology`,
//! plus the schema-inference and origin-inference passes run after
//! construction (spec.md §4.C).

use std::collections::HashMap;

use nes_core::{EngineError, EngineResult, Field, IdGenerator, OperatorId, OriginId, Schema};

use crate::operators::{AggregateFunction, OperatorKind, PlanNode};
use crate::topology::Topology;

#[derive(Debug, Clone, Default)]
pub struct LogicalPlan {
    nodes: HashMap<OperatorId, PlanNode>,
    topology: Topology,
}

impl LogicalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: OperatorId) -> Option<&PlanNode> {
        self.nodes.get(&id)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values()
    }

    /// Adds `kind` as a new node with the given children, returning its id.
    /// This is the plan-construction primitive spec.md §4.C calls
    /// "composed by `withChildren`": the caller builds bottom-up, always
    /// passing already-inserted child ids.
    pub fn with_children(&mut self, ids: &IdGenerator, kind: OperatorKind, children: &[OperatorId]) -> EngineResult<OperatorId> {
        if children.len() != kind.arity() {
            return Err(EngineError::SchemaInferenceFailure(format!(
                "{} expects {} input(s), got {}",
                kind.name(),
                kind.arity(),
                children.len()
            )));
        }
        let id = ids.next_operator();
        self.topology.add_node(id);
        for &child in children {
            self.topology.add_edge(id, child);
        }
        self.nodes.insert(id, PlanNode::new(id, kind));
        Ok(id)
    }

    /// Runs schema inference bottom-up over the whole plan, then origin-id
    /// inference in the same topological order (spec.md §4.C: "Origin-id
    /// inference runs after schema inference").
    pub fn infer(&mut self, ids: &IdGenerator) -> EngineResult<()> {
        let order = self.topology.topological_order();
        for &id in &order {
            self.infer_schema(id)?;
        }
        for &id in &order {
            self.infer_origins(id, ids)?;
        }
        Ok(())
    }

    fn infer_schema(&mut self, id: OperatorId) -> EngineResult<()> {
        let children: Vec<OperatorId> = self.topology.children_of(id).to_vec();
        let input_schemas: Vec<Schema> = children
            .iter()
            .map(|c| {
                self.nodes
                    .get(c)
                    .and_then(|n| n.output_schema.clone())
                    .ok_or_else(|| EngineError::SchemaInferenceFailure(format!("child {c} has no inferred schema yet")))
            })
            .collect::<EngineResult<_>>()?;

        let node = self.nodes.get_mut(&id).expect("node exists");
        if input_schemas.len() != node.kind.arity() {
            return Err(EngineError::SchemaInferenceFailure(format!(
                "{} expects {} input schema(s), got {}",
                node.kind.name(),
                node.kind.arity(),
                input_schemas.len()
            )));
        }
        node.output_schema = Some(infer_output_schema(&node.kind, &input_schemas)?);
        node.input_schemas = input_schemas;
        Ok(())
    }

    fn infer_origins(&mut self, id: OperatorId, ids: &IdGenerator) -> EngineResult<()> {
        let children: Vec<OperatorId> = self.topology.children_of(id).to_vec();
        let input_origin_ids: Vec<Vec<OriginId>> =
            children.iter().map(|c| self.nodes.get(c).map(|n| n.output_origin_ids.clone()).unwrap_or_default()).collect();

        let node = self.nodes.get_mut(&id).expect("node exists");
        node.output_origin_ids = match &node.kind {
            OperatorKind::Source { .. } => vec![ids.next_origin()],
            // Windowing operators consume their inputs and mint a fresh
            // origin id per instance: they establish new sequence
            // semantics on their output (spec.md §4.C).
            OperatorKind::Aggregation { .. } | OperatorKind::BinaryJoin { .. } => vec![ids.next_origin()],
            // Unary stateless operators and Union propagate origins
            // (Union's binary inputs are unioned into one id list).
            _ => input_origin_ids.iter().flatten().copied().collect(),
        };
        node.input_origin_ids = input_origin_ids;
        Ok(())
    }
}

fn infer_output_schema(kind: &OperatorKind, inputs: &[Schema]) -> EngineResult<Schema> {
    match kind {
        OperatorKind::Source { schema, .. } => Ok(schema.clone()),
        OperatorKind::Selection { predicate } => {
            let schema = &inputs[0];
            let ty = predicate.infer_type(schema)?;
            if ty != nes_core::DataType::Bool {
                return Err(EngineError::SchemaInferenceFailure(format!("selection predicate must be bool, found {ty:?}")));
            }
            Ok(schema.clone())
        }
        OperatorKind::Projection { fields } => {
            let schema = &inputs[0];
            let mut out = Schema::empty(schema.layout);
            for name in fields {
                let field = schema
                    .field(name)
                    .ok_or_else(|| EngineError::SchemaInferenceFailure(format!("unknown field `{name}` in projection")))?;
                out = out.with_field(field.clone());
            }
            Ok(out)
        }
        OperatorKind::Map { output_field, expr } => {
            let schema = &inputs[0];
            let ty = expr.infer_type(schema)?;
            if let Some(existing) = schema.field(output_field) {
                if existing.data_type != ty {
                    return Err(EngineError::SchemaInferenceFailure(format!(
                        "map reassigns `{output_field}` from {:?} to {ty:?}",
                        existing.data_type
                    )));
                }
                Ok(schema.clone())
            } else {
                Ok(schema.with_field(Field::new(output_field.clone(), ty)))
            }
        }
        OperatorKind::Union => {
            if inputs[0].fields != inputs[1].fields {
                return Err(EngineError::SchemaInferenceFailure("union requires identical input schemas".into()));
            }
            Ok(inputs[0].clone())
        }
        OperatorKind::BinaryJoin { left_key, right_key, .. } => {
            let (left, right) = (&inputs[0], &inputs[1]);
            if left.field(left_key).is_none() {
                return Err(EngineError::SchemaInferenceFailure(format!("unknown left join key `{left_key}`")));
            }
            if right.field(right_key).is_none() {
                return Err(EngineError::SchemaInferenceFailure(format!("unknown right join key `{right_key}`")));
            }
            let mut out = left.qualified("left");
            out = out.with_fields(right.qualified("right").fields);
            out = out.with_field(Field::new("windowStart", nes_core::DataType::UInt64));
            out = out.with_field(Field::new("windowEnd", nes_core::DataType::UInt64));
            Ok(out)
        }
        OperatorKind::Aggregation { group_by, aggregates, .. } => {
            let schema = &inputs[0];
            let mut out = Schema::empty(schema.layout);
            out = out.with_field(Field::new("windowStart", nes_core::DataType::UInt64));
            out = out.with_field(Field::new("windowEnd", nes_core::DataType::UInt64));
            for key in group_by {
                let field = schema.field(key).ok_or_else(|| EngineError::SchemaInferenceFailure(format!("unknown group-by key `{key}`")))?;
                out = out.with_field(field.clone());
            }
            for agg in aggregates {
                let field_ty = schema
                    .field(&agg.input_field)
                    .map(|f| f.data_type)
                    .ok_or_else(|| EngineError::SchemaInferenceFailure(format!("unknown aggregate input `{}`", agg.input_field)))?;
                let out_ty = aggregate_output_type(agg.function, field_ty);
                out = out.with_field(Field::new(agg.output_field.clone(), out_ty));
            }
            Ok(out)
        }
        OperatorKind::WatermarkAssigner { event_time_field, .. } => {
            let schema = &inputs[0];
            if schema.field(event_time_field).is_none() {
                return Err(EngineError::SchemaInferenceFailure(format!("unknown event-time field `{event_time_field}`")));
            }
            Ok(schema.clone())
        }
        OperatorKind::Sink { .. } => Ok(inputs[0].clone()),
    }
}

fn aggregate_output_type(function: AggregateFunction, input: nes_core::DataType) -> nes_core::DataType {
    match function {
        AggregateFunction::Count => nes_core::DataType::UInt64,
        AggregateFunction::Avg => nes_core::DataType::Float64,
        AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::operators::{AggregateSpec, WindowSpec};
    use nes_core::{DataType, LayoutKind};

    fn s1_schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64), Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn s1_filter_map_infers_expected_schema() {
        let ids = IdGenerator::new();
        let mut plan = LogicalPlan::new();
        let source = plan.with_children(&ids, OperatorKind::Source { name: "s".into(), schema: s1_schema() }, &[]).unwrap();
        let filter = plan
            .with_children(&ids, OperatorKind::Selection { predicate: Expr::field("value").gt(Expr::int(0)) }, &[source])
            .unwrap();
        let map = plan
            .with_children(&ids, OperatorKind::Map { output_field: "value".into(), expr: Expr::field("value").mul(Expr::int(2)) }, &[filter])
            .unwrap();
        let sink = plan.with_children(&ids, OperatorKind::Sink { name: "out".into() }, &[map]).unwrap();

        plan.infer(&ids).unwrap();
        let out = plan.node(sink).unwrap().output_schema.as_ref().unwrap();
        assert_eq!(out.fields.len(), 2);
        assert_eq!(out.field("value").unwrap().data_type, DataType::Int64);
    }

    #[test]
    fn origin_ids_are_fresh_per_source_and_propagate_through_unary_ops() {
        let ids = IdGenerator::new();
        let mut plan = LogicalPlan::new();
        let source = plan.with_children(&ids, OperatorKind::Source { name: "s".into(), schema: s1_schema() }, &[]).unwrap();
        let filter = plan
            .with_children(&ids, OperatorKind::Selection { predicate: Expr::field("value").gt(Expr::int(0)) }, &[source])
            .unwrap();
        plan.infer(&ids).unwrap();
        let source_origin = plan.node(source).unwrap().output_origin_ids.clone();
        let filter_origin = plan.node(filter).unwrap().output_origin_ids.clone();
        assert_eq!(source_origin, filter_origin);
        assert_eq!(source_origin.len(), 1);
    }

    #[test]
    fn windowed_aggregation_mints_a_new_origin_id() {
        let ids = IdGenerator::new();
        let mut plan = LogicalPlan::new();
        let source = plan.with_children(&ids, OperatorKind::Source { name: "s".into(), schema: s1_schema() }, &[]).unwrap();
        let agg = plan
            .with_children(
                &ids,
                OperatorKind::Aggregation {
                    group_by: vec![],
                    aggregates: vec![AggregateSpec { input_field: "value".into(), function: AggregateFunction::Sum, output_field: "sum".into() }],
                    window: WindowSpec::tumbling(10),
                },
                &[source],
            )
            .unwrap();
        plan.infer(&ids).unwrap();
        let source_origin = plan.node(source).unwrap().output_origin_ids[0];
        let agg_origin = plan.node(agg).unwrap().output_origin_ids[0];
        assert_ne!(source_origin, agg_origin);
    }

    #[test]
    fn arity_mismatch_fails_construction() {
        let ids = IdGenerator::new();
        let mut plan = LogicalPlan::new();
        let source = plan.with_children(&ids, OperatorKind::Source { name: "s".into(), schema: s1_schema() }, &[]).unwrap();
        let result = plan.with_children(&ids, OperatorKind::Union, &[source]);
        assert!(result.is_err());
    }
}
