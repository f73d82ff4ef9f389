//! # nes-io
//!
//! Concrete `Source`/`Sink` adapters implementing spec.md §6's external
//! interfaces: a source's `open`/`fillTupleBuffer`/`close` cycle fills
//! pooled `TupleBuffer`s directly (it runs before any pipeline's `Scan`
//! decodes them); a sink's `setup`/`writeData`/`shutdown` cycle consumes
//! the already-decoded `Record`s a `SinkWrite` physical operator hands it
//! (the executor decodes at `Scan` and re-encodes at `Emit` itself, via
//! `nes_runtime::codec` — a sink never sees a raw buffer). That split from
//! the spec's literal "sinks write buffers" wording is a deliberate
//! divergence, recorded in DESIGN.md.

pub mod file_source;
pub mod memory;
pub mod stdout_sink;

use std::sync::Arc;

use nes_buffer::TupleBuffer;
use nes_core::{EngineError, EngineResult, Record};
use nes_runtime::SinkFn;

/// Generalized from the teacher's async `rde_core::Source`, made
/// synchronous per spec.md §6 (the core itself is a synchronous,
/// thread-pool pipeline runtime — see `nes-runtime::query_manager`).
pub trait Source: Send {
    fn open(&mut self) -> EngineResult<()>;

    /// Fills `buffer` with as many tuples as fit, setting
    /// `numberOfTuples`/`originId`/`sequenceNumber`/chunk fields on it.
    /// Returns the number of bytes used, or `0` at end of stream.
    fn fill_tuple_buffer(&mut self, buffer: &TupleBuffer) -> EngineResult<usize>;

    fn close(&mut self) -> EngineResult<()>;
}

/// Generalized from the teacher's async `rde_core::Sink`. Operates on
/// already-decoded records rather than a raw buffer (see module docs).
pub trait Sink: Send + Sync {
    fn setup(&self) -> EngineResult<()>;

    /// Returns `true` on success, mirroring the boolean `writeData`
    /// return spec.md §6 specifies.
    fn write_data(&self, records: &[Record]) -> EngineResult<bool>;

    fn shutdown(&self) -> EngineResult<()>;
}

/// Adapts a `Sink` trait object into the `SinkFn` closure
/// `SinkRegistry::register` expects, so a `nes-io` adapter can be wired
/// straight into `nes_runtime::executor::SinkRegistry`.
pub fn as_sink_fn(sink: Arc<dyn Sink>) -> SinkFn {
    Arc::new(move |records: &[Record]| -> EngineResult<()> {
        if sink.write_data(records)? {
            Ok(())
        } else {
            Err(EngineError::OperatorExecutionFailure("sink reported write failure".into()))
        }
    })
}

pub use file_source::DelimitedFileSource;
pub use memory::{InMemorySink, InMemorySource};
pub use stdout_sink::StdoutSink;
