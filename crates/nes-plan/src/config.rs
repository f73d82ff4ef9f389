//! YAML query configuration: the external boundary the engine binary
//! reads before building a `LogicalPlan` (spec.md §6: "the core accepts a
//! `PipelineExecutionContext` constructed externally... worker count, pool
//! size... are inputs, not concerns of this spec" — this is the analogous
//! input for plan *shape*). Grounded on `rde_core::PipelineSpec` and its
//! `#[serde(tag = "type")]` operator-spec enums.

use nes_core::{EngineError, EngineResult, Field, IdGenerator, OperatorId, Schema};
use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::operators::{AggregateSpec, JoinKind, OperatorKind, WindowSpec};
use crate::plan::LogicalPlan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub data_type: String,
}

fn parse_data_type(s: &str) -> EngineResult<nes_core::DataType> {
    use nes_core::DataType::*;
    Ok(match s {
        "bool" => Bool,
        "int8" => Int8,
        "int16" => Int16,
        "int32" => Int32,
        "int64" => Int64,
        "uint8" => UInt8,
        "uint16" => UInt16,
        "uint32" => UInt32,
        "uint64" => UInt64,
        "float32" => Float32,
        "float64" => Float64,
        "var_sized" => VarSized,
        other => {
            return Err(EngineError::SchemaInferenceFailure(format!("unknown data_type `{other}` in query document")));
        }
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub layout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperatorConfig {
    #[serde(rename = "selection")]
    Selection { id: String, predicate: Expr },
    #[serde(rename = "projection")]
    Projection { id: String, fields: Vec<String> },
    #[serde(rename = "map")]
    Map { id: String, output_field: String, expr: Expr },
    #[serde(rename = "watermark_assigner")]
    WatermarkAssigner { id: String, event_time_field: String, #[serde(default)] max_out_of_orderness: u64 },
    #[serde(rename = "window_aggregation")]
    WindowAggregation {
        id: String,
        #[serde(default)]
        group_by: Vec<String>,
        aggregates: Vec<AggregateSpec>,
        size_ms: u64,
        #[serde(default)]
        slide_ms: Option<u64>,
    },
}

/// A query as authored externally: one source, a linear chain of
/// operators, one sink. Joins are expressed by naming a second source as
/// `join_with` on a `window_aggregation`-adjacent config in richer
/// deployments; the core of this spec handles the single-chain case,
/// which covers scenarios S1-S4 and, with `join`, S5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDocument {
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
    #[serde(default)]
    pub join: Option<JoinConfig>,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    pub right_source: SourceConfig,
    pub kind: JoinKind,
    pub left_key: String,
    pub right_key: String,
    pub size_ms: u64,
    #[serde(default)]
    pub slide_ms: Option<u64>,
}

pub fn parse_query_document(yaml: &str) -> EngineResult<QueryDocument> {
    serde_yaml::from_str(yaml).map_err(|e| EngineError::SchemaInferenceFailure(format!("invalid query document: {e}")))
}

fn schema_from_config(cfg: &SourceConfig) -> EngineResult<Schema> {
    let layout = match cfg.layout.as_deref() {
        Some("column") => nes_core::LayoutKind::Column,
        _ => nes_core::LayoutKind::Row,
    };
    let mut fields = Vec::with_capacity(cfg.fields.len());
    for f in &cfg.fields {
        fields.push(Field::new(f.name.clone(), parse_data_type(&f.data_type)?));
    }
    Ok(Schema::new(fields, layout))
}

/// Builds a `LogicalPlan` from a parsed document: source → operators
/// (chained linearly) → optional join against a second source → sink.
pub fn build_plan(doc: &QueryDocument, ids: &IdGenerator) -> EngineResult<(LogicalPlan, OperatorId)> {
    let mut plan = LogicalPlan::new();
    let source_schema = schema_from_config(&doc.source)?;
    let mut cursor = plan.with_children(ids, OperatorKind::Source { name: doc.source.id.clone(), schema: source_schema }, &[])?;

    for op in &doc.operators {
        let kind = match op {
            OperatorConfig::Selection { predicate, .. } => OperatorKind::Selection { predicate: predicate.clone() },
            OperatorConfig::Projection { fields, .. } => OperatorKind::Projection { fields: fields.clone() },
            OperatorConfig::Map { output_field, expr, .. } => OperatorKind::Map { output_field: output_field.clone(), expr: expr.clone() },
            OperatorConfig::WatermarkAssigner { event_time_field, max_out_of_orderness, .. } => {
                OperatorKind::WatermarkAssigner { event_time_field: event_time_field.clone(), max_out_of_orderness: *max_out_of_orderness }
            }
            OperatorConfig::WindowAggregation { group_by, aggregates, size_ms, slide_ms, .. } => OperatorKind::Aggregation {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
                window: match slide_ms {
                    Some(slide) => WindowSpec::sliding(*size_ms, *slide),
                    None => WindowSpec::tumbling(*size_ms),
                },
            },
        };
        cursor = plan.with_children(ids, kind, &[cursor])?;
    }

    if let Some(join) = &doc.join {
        let right_schema = schema_from_config(&join.right_source)?;
        let right_source = plan.with_children(ids, OperatorKind::Source { name: join.right_source.id.clone(), schema: right_schema }, &[])?;
        let window = match join.slide_ms {
            Some(slide) => WindowSpec::sliding(join.size_ms, slide),
            None => WindowSpec::tumbling(join.size_ms),
        };
        cursor = plan.with_children(
            ids,
            OperatorKind::BinaryJoin { kind: join.kind, left_key: join.left_key.clone(), right_key: join.right_key.clone(), window },
            &[cursor, right_source],
        )?;
    }

    let sink = plan.with_children(ids, OperatorKind::Sink { name: doc.sink.id.clone() }, &[cursor])?;
    Ok((plan, sink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_s1_filter_map_document() {
        let yaml = r#"
name: s1-filter-map
source:
  id: in
  fields:
    - { name: id, data_type: uint64 }
    - { name: value, data_type: int64 }
operators:
  - type: selection
    id: f
    predicate: { Binary: [{ Field: value }, Gt, { Literal: { Int: 0 } }] }
  - type: map
    id: m
    output_field: value
    expr: { Binary: [{ Field: value }, Mul, { Literal: { Int: 2 } }] }
sink:
  id: out
"#;
        let doc = parse_query_document(yaml).expect("document parses");
        assert_eq!(doc.name, "s1-filter-map");
        let ids = IdGenerator::new();
        let (mut plan, sink) = build_plan(&doc, &ids).expect("plan builds");
        plan.infer(&ids).expect("plan infers");
        assert!(plan.node(sink).unwrap().output_schema.is_some());
    }

    #[test]
    fn unknown_data_type_is_rejected() {
        assert!(parse_data_type("not_a_type").is_err());
    }
}
