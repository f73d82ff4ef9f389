//! # nes-plan
//!
//! The logical query plan (value-typed operator nodes plus a side-table
//! `Topology`), its schema- and origin-id-inference passes, physical
//! lowering with pipeline fusion, and the YAML query document that
//! constructs a plan from external configuration.

pub mod config;
pub mod expr;
pub mod lower;
pub mod operators;
pub mod plan;
pub mod topology;

pub use config::{build_plan, parse_query_document, JoinConfig, OperatorConfig, QueryDocument, SinkConfig, SourceConfig};
pub use expr::{BinOp, Expr, Literal, UnOp};
pub use lower::{lower, JoinSide, PhysicalOperator, PhysicalPlan, Pipeline};
pub use operators::{AggregateFunction, AggregateSpec, JoinKind, OperatorKind, PlanNode, WindowKind, WindowSpec};
pub use plan::LogicalPlan;
pub use topology::Topology;
