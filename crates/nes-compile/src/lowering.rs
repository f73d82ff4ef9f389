//! `TraceToIRConversionPhase` (spec.md §4.E): turns the recorded trace
//! into the typed IR defined in `ir.rs`.

use std::collections::HashMap;

use nes_core::EngineResult;

use crate::ir::{BasicBlock, Instruction, IrFunction, IrOp, Terminator};
use crate::ssa::ssa_creation_phase;
use crate::trace::{ExecutionTrace, RecordedTerminator};

pub fn trace_to_ir_conversion_phase(trace: ExecutionTrace) -> EngineResult<IrFunction> {
    let (entry, recorded) = ssa_creation_phase(trace)?;
    let mut blocks = HashMap::with_capacity(recorded.len());
    for (id, block) in recorded {
        let instructions: Vec<Instruction> =
            block.ops.into_iter().map(|op| Instruction { id: op.id, op: op.op, stamp: op.stamp }).collect();
        let terminator = match block.terminator {
            RecordedTerminator::Return(v) => Terminator::Return(v),
            RecordedTerminator::Branch { target, arg } => Terminator::Branch(target, arg.into_iter().collect()),
            RecordedTerminator::If { cond, then_block, else_block, .. } => Terminator::If { cond, then_block, else_block },
            RecordedTerminator::None => Terminator::Return(None),
        };
        blocks.insert(id, BasicBlock { id, params: block.params, instructions, terminator });
    }
    Ok(IrFunction { entry: Some(entry), blocks, loop_headers: Vec::new() })
}

/// Re-exported name mirroring spec.md's op-kind catalogue, used by
/// backends pattern-matching on the IR (kept here so both backends import
/// a single re-export path).
pub type Op = IrOp;
