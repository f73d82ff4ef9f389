//! # nes-compile
//!
//! The Nautilus-style tracing JIT core (spec.md §4.E): symbolic tracing
//! of operator expressions into a typed SSA IR, then lowering onto one of
//! two backends sharing a common interface — a required tree-walking
//! interpreter, and a closure-compiled "native" backend.
//!
//! Pipeline: `ExecutionTrace` records a `TracedValue` expression →
//! `ssa_creation_phase` verifies the recorded blocks are already in valid
//! block-argument SSA form → `trace_to_ir_conversion_phase` lowers the
//! recording into `IrFunction` → `loop_inference_phase` annotates back
//! edges → a `Backend` compiles the `IrFunction` into something that
//! implements `EvaluateRecord`.

pub mod backend;
pub mod ir;
pub mod loop_inference;
pub mod lowering;
pub mod proxy;
pub mod ssa;
mod trace;

pub use backend::{Backend, CompiledInterpreter, CompiledNative, EvaluateRecord, Interpreter, NativeBackend};
pub use ir::{ArithOp, BasicBlock, BitwiseOp, BlockId, CompareOp, Instruction, IrFunction, IrOp, LogicalOp, MemoryOp, Terminator, ValueId};
pub use loop_inference::loop_inference_phase;
pub use lowering::trace_to_ir_conversion_phase;
pub use proxy::ProxyRegistry;
pub use trace::{ExecutionTrace, TracedValue};
