//! # nes-core
//!
//! Shared vocabulary for the NES engine core: the schema/memory-layout
//! model, strongly-typed ids, the error taxonomy, and the in-flight
//! `Record` representation used by both the interpreter and the
//! closure-compiled backend in `nes-compile`.
//!
//! Every other crate in the workspace depends on this one; it depends on
//! nothing else in the workspace.

pub mod error;
pub mod ids;
pub mod layout;
pub mod record;
pub mod schema;

pub use error::{EngineError, EngineResult};
pub use ids::{ChunkNumber, IdGenerator, OperatorHandlerId, OperatorId, OriginId, PipelineId, SequenceNumber, WorkerId};
pub use layout::{ColumnLayout, Layout, RowLayout, VarSizedRef};
pub use record::{Record, Value};
pub use schema::{DataType, Field, LayoutKind, Schema};
