//! `LoopInferencePhase` (spec.md §4.E): annotates loop headers so a
//! backend that emits structured loops (rather than re-walking a
//! recursive CFG per invocation) knows where to place them. A loop header
//! is any block that is also the target of a branch from a
//! higher-numbered block — a back edge.

use crate::ir::IrFunction;

pub fn loop_inference_phase(func: &mut IrFunction) {
    let mut headers = Vec::new();
    for block in func.blocks.values() {
        let targets: Vec<_> = match &block.terminator {
            crate::ir::Terminator::Branch(target, _) => vec![*target],
            crate::ir::Terminator::If { then_block, else_block, .. } => vec![*then_block, *else_block],
            crate::ir::Terminator::Loop { header, body, exit } => vec![*header, *body, *exit],
            crate::ir::Terminator::Return(_) => vec![],
        };
        for target in targets {
            if target.0 <= block.id.0 && !headers.contains(&target) {
                headers.push(target);
            }
        }
    }
    headers.sort_by_key(|b| b.0);
    func.loop_headers = headers;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ExecutionTrace;
    use crate::lowering::trace_to_ir_conversion_phase;

    #[test]
    fn loop_free_trace_has_no_loop_headers() {
        let trace = ExecutionTrace::new();
        let a = trace.const_int(1);
        let b = trace.const_int(2);
        let sum = a + b;
        trace.finish(&sum);
        let mut func = trace_to_ir_conversion_phase(trace).unwrap();
        loop_inference_phase(&mut func);
        assert!(func.loop_headers.is_empty());
    }
}
