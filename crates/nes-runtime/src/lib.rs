//! # nes-runtime
//!
//! The pipeline execution layer: the arena/`ExecutionContext` allocator,
//! the operator-handler registry, the `PipelineExecutionContext` a
//! compiled pipeline runs against, the `Record`↔`TupleBuffer` codec, the
//! compiled-pipeline executor, the multi-origin watermark processor, and
//! the `QueryManager` worker pool (spec.md §4.F/§4.G/§4.H).

pub mod arena;
pub mod codec;
pub mod compile_bridge;
pub mod executor;
pub mod handler;
pub mod hooks;
pub mod pipeline_context;
pub mod query_manager;
pub mod watermark;

pub use arena::{Allocation, Arena, OperatorStateMap};
pub use compile_bridge::compile_expr;
pub use executor::{compile_pipeline, run, CompiledPipeline, SinkFn, SinkRegistry};
pub use handler::{HandlerRegistry, OperatorHandler};
pub use hooks::{AggregationSink, AggregationSource, JoinSink, JoinSource, StatefulHooks};
pub use pipeline_context::{EmitFn, PipelineExecutionContext};
pub use query_manager::{Finalizer, QueryManager, StopType};
pub use watermark::MultiOriginWatermarkProcessor;
