//! The typed IR `TraceToIRConversionPhase` lowers traces into (spec.md
//! §4.E): constants, arithmetic, compare, logical, cast, bitwise, memory,
//! control, function/proxy-call, and builtin/variable ops.

use std::collections::HashMap;

use nes_core::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Memory ops named by spec.md §4.E. Real buffer reads/writes in this
/// workspace go through `nes_core::layout::Layout` inside `nes-runtime`'s
/// `Scan`/`Emit` physical operators rather than through traced IR — this
/// core only traces loop-free scalar expressions (selection predicates,
/// map assignments), which never touch a buffer address directly. Kept
/// here, and rejected by both backends, so the op-kind catalogue stays
/// representable even though no current trace emits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryOp {
    Load,
    Store,
    Address,
    ConstAddress,
}

/// One typed IR operation. `stamp` (carried alongside in `Instruction`) is
/// the declared result type; numeric semantics follow spec.md §4.E:
/// integer ops wrap, float ops follow IEEE-754, div-by-zero/overflow are
/// checked only by the interpreter under a debug flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrOp {
    ConstInt(i64),
    ConstFloat(f64),
    ConstBool(bool),
    Arith(ArithOp, ValueId, ValueId),
    Compare(CompareOp, ValueId, ValueId),
    Logical(LogicalOp, ValueId, Option<ValueId>),
    Cast(ValueId, DataType),
    Bitwise(BitwiseOp, ValueId, ValueId),
    /// See `MemoryOp` doc comment: unused by any trace this crate builds.
    Memory(MemoryOp, ValueId, Option<ValueId>),
    /// Reads a named input variable (a `Record` field) into the trace.
    Variable(String),
    /// A statically known native function call: the FFI escape hatch. No
    /// marshalling beyond the declared operand/return stamps.
    ProxyCall { function: String, args: Vec<ValueId>, return_type: DataType },
    Builtin(String, Vec<ValueId>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: IrOp,
    pub stamp: DataType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Terminator {
    Return(Option<ValueId>),
    Branch(BlockId, Vec<ValueId>),
    /// `then`/`else` blocks each receive `args` as their block parameters
    /// (the SSA join point spec.md §4.E calls basic-block arguments).
    If { cond: ValueId, then_block: BlockId, else_block: BlockId },
    /// Structured loop terminator named by spec.md §4.E. No trace this
    /// crate builds produces one — see `MemoryOp`'s doc comment for why —
    /// but it is represented so `LoopInferencePhase` and a backend that
    /// wants one have somewhere to attach.
    Loop { header: BlockId, body: BlockId, exit: BlockId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub params: Vec<ValueId>,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IrFunction {
    pub entry: Option<BlockId>,
    pub blocks: HashMap<BlockId, BasicBlock>,
    /// Block ids annotated as loop headers by `LoopInferencePhase` — a
    /// block that is also the target of a branch from a
    /// higher-numbered block (a back edge).
    pub loop_headers: Vec<BlockId>,
}

impl IrFunction {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks.get(&id).expect("well-formed IR references only existing blocks")
    }
}
