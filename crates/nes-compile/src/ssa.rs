//! `SSACreationPhase` (spec.md §4.E): the trace builder in `trace.rs`
//! already records directly in basic-block-argument form (each merge
//! block declares its incoming value as a block parameter, matching a
//! phi), so this phase's job is to verify that invariant holds rather
//! than mutate the trace into it — a flat recording pass and a join-point
//! discovery pass would otherwise duplicate the same bookkeeping.

use std::collections::HashMap;

use nes_core::{EngineError, EngineResult};

use crate::ir::BlockId;
use crate::trace::{ExecutionTrace, RecordedBlock, RecordedTerminator};

pub(crate) fn verify_ssa_form(entry: BlockId, blocks: &HashMap<BlockId, RecordedBlock>) -> EngineResult<()> {
    if !blocks.contains_key(&entry) {
        return Err(EngineError::CompilationFailure(format!("trace entry block {entry:?} missing from recorded blocks")));
    }
    for block in blocks.values() {
        match &block.terminator {
            RecordedTerminator::Branch { target, arg } => {
                let target_block = blocks
                    .get(target)
                    .ok_or_else(|| EngineError::CompilationFailure(format!("branch to undefined block {target:?}")))?;
                let expected = target_block.params.len();
                let got = arg.is_some() as usize;
                if expected != got {
                    return Err(EngineError::CompilationFailure(format!(
                        "block {:?} expects {expected} argument(s), branch supplies {got}",
                        target
                    )));
                }
            }
            RecordedTerminator::If { then_block, else_block, merge_block, .. } => {
                for b in [then_block, else_block, merge_block] {
                    if !blocks.contains_key(b) {
                        return Err(EngineError::CompilationFailure(format!("if-terminator references undefined block {b:?}")));
                    }
                }
            }
            RecordedTerminator::Return(_) | RecordedTerminator::None => {}
        }
    }
    Ok(())
}

pub(crate) fn ssa_creation_phase(trace: ExecutionTrace) -> EngineResult<(BlockId, HashMap<BlockId, RecordedBlock>)> {
    let (entry, blocks) = trace.into_parts();
    verify_ssa_form(entry, &blocks)?;
    Ok((entry, blocks))
}
