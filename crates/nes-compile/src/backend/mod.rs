//! IR-lowering backends (spec.md §4.E): only the interpreter is required;
//! at least one native backend must exist. Both share the same `IrFunction`
//! input and `ProxyRegistry` for proxy calls.

pub mod interpreter;
pub mod native;

pub use interpreter::{CompiledInterpreter, Interpreter};
pub use native::{CompiledNative, NativeBackend};

use nes_core::{EngineResult, Record, Value};

use crate::ir::IrFunction;
use crate::proxy::ProxyRegistry;

/// Common lowering interface both backends implement (spec.md §4.E:
/// "Backends implement the same lowering interface").
pub trait Backend {
    type Compiled;

    fn compile(&self, func: &IrFunction) -> EngineResult<Self::Compiled>;
}

/// Evaluates a compiled function's one entry point against a single
/// `Record`, the shape every pipeline operator (`Selection`, `Map`)
/// actually needs.
pub trait EvaluateRecord {
    fn evaluate(&self, record: &Record, proxies: &ProxyRegistry) -> EngineResult<Value>;
}
