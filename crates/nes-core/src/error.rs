//! Error taxonomy shared by every crate in the engine core.
//!
//! Mirrors the shape of the teacher's `RdeError`: one variant per failure
//! mode named in the error-handling design, plus an `Other` catch-all for
//! wrapping errors from call sites that don't fit the taxonomy.

use crate::ids::OriginId;

/// Stable error taxonomy for the engine core.
///
/// `WindowAssignmentDrop` is counted and logged by the caller, not treated
/// as fatal; every other variant fails the query it occurred in.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Buffer pool exhausted without blocking, or an unpooled allocation
    /// request was refused.
    #[error("cannot allocate buffer: {0}")]
    AllocationFailure(String),

    /// Mismatched operator arities, a type clash in an expression, or a
    /// reference to an unknown field during schema inference.
    #[error("schema inference failed: {0}")]
    SchemaInferenceFailure(String),

    /// Symbolic tracing produced invalid IR, or a backend rejected it.
    #[error("compilation failed: {0}")]
    CompilationFailure(String),

    /// A runtime check was violated inside a compiled pipeline.
    #[error("operator execution failed: {0}")]
    OperatorExecutionFailure(String),

    /// A sequence-number gap for an origin exceeded the recoverable
    /// pending-set size.
    #[error("watermark protocol failure on origin {origin:?}: {reason}")]
    WatermarkProtocolFailure { origin: OriginId, reason: String },

    /// A tuple could not be mapped to any active window definition and was
    /// dropped. Not fatal; counted and logged by the caller.
    #[error("tuple at ts={ts} dropped: no active window definition covers it")]
    WindowAssignmentDrop { ts: u64 },

    /// A graceful stop was aborted before it could drain in-flight state.
    #[error("graceful shutdown interrupted: {0}")]
    ShutdownInterrupted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
