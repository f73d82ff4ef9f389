//! The closed operator set (spec.md §4.C), expressed as tagged variants of
//! a single `OperatorKind` rather than an inheritance chain (§9 redesign
//! note). A `PlanNode` pairs one `OperatorKind` with the schema/origin
//! metadata schema inference and origin inference attach to it.

use nes_core::{OperatorId, OriginId, Schema};
use serde::{Deserialize, Serialize};

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Cartesian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub input_field: String,
    pub function: AggregateFunction,
    pub output_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    /// `size == slide`.
    Tumbling,
    Sliding,
    /// Count-based windows key slices on a per-worker tuple counter rather
    /// than event time; `size`/`slide` are tuple counts instead of
    /// milliseconds. Slice-edge arithmetic is otherwise identical (see
    /// `nes_windowing::SliceAssigner`).
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub kind: WindowKind,
    pub size: u64,
    pub slide: u64,
    /// Deployment time, in the same unit as `size`/`slide`. Lets a window
    /// definition added mid-stream compute slice edges relative to its own
    /// origin rather than epoch zero (spec.md §4.I).
    pub deploy_time: u64,
}

impl WindowSpec {
    pub fn tumbling(size_ms: u64) -> Self {
        WindowSpec { kind: WindowKind::Tumbling, size: size_ms, slide: size_ms, deploy_time: 0 }
    }

    pub fn sliding(size_ms: u64, slide_ms: u64) -> Self {
        WindowSpec { kind: WindowKind::Sliding, size: size_ms, slide: slide_ms, deploy_time: 0 }
    }
}

/// The operator-specific payload. Every variant carries only what that
/// operator needs to infer its output schema and origin ids; physical
/// lowering (`lower.rs`) interprets the same payload again to build
/// physical operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorKind {
    Source { name: String, schema: Schema },
    Selection { predicate: Expr },
    Projection { fields: Vec<String> },
    Map { output_field: String, expr: Expr },
    Union,
    BinaryJoin { kind: JoinKind, left_key: String, right_key: String, window: WindowSpec },
    Aggregation { group_by: Vec<String>, aggregates: Vec<AggregateSpec>, window: WindowSpec },
    WatermarkAssigner { event_time_field: String, max_out_of_orderness: u64 },
    Sink { name: String },
}

impl OperatorKind {
    pub fn arity(&self) -> usize {
        match self {
            OperatorKind::Source { .. } => 0,
            OperatorKind::BinaryJoin { .. } => 2,
            OperatorKind::Union => 2,
            _ => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Source { .. } => "Source",
            OperatorKind::Selection { .. } => "Selection",
            OperatorKind::Projection { .. } => "Projection",
            OperatorKind::Map { .. } => "Map",
            OperatorKind::Union => "Union",
            OperatorKind::BinaryJoin { .. } => "BinaryJoin",
            OperatorKind::Aggregation { .. } => "Aggregation",
            OperatorKind::WatermarkAssigner { .. } => "WatermarkAssigner",
            OperatorKind::Sink { .. } => "Sink",
        }
    }

    /// True for operators that cannot be fused into a scan-to-emit pipeline
    /// with their neighbours because they hold cross-invocation state
    /// (spec.md §4.D tie-break rule).
    pub fn is_stateful(&self) -> bool {
        matches!(self, OperatorKind::Aggregation { .. } | OperatorKind::BinaryJoin { .. })
    }
}

/// A value-typed plan node: an id, its operator payload, and the
/// schema/origin metadata attached by the inference passes. Children are
/// *not* stored here — they live in `Topology`, removing the parent/child
/// reference cycles the original operator tree relies on (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: OperatorId,
    pub kind: OperatorKind,
    pub input_schemas: Vec<Schema>,
    pub output_schema: Option<Schema>,
    pub input_origin_ids: Vec<Vec<OriginId>>,
    pub output_origin_ids: Vec<OriginId>,
}

impl PlanNode {
    pub fn new(id: OperatorId, kind: OperatorKind) -> Self {
        PlanNode { id, kind, input_schemas: Vec::new(), output_schema: None, input_origin_ids: Vec::new(), output_origin_ids: Vec::new() }
    }
}
