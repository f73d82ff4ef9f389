//! The "native" backend: lowers the IR into a chain of boxed Rust
//! closures, one call-indirect dispatch per evaluation instead of
//! re-walking the IR tree (spec.md §4.E requires at least one native
//! backend). No MLIR/LLVM dependency is available in this workspace's
//! stack, so closure compilation is the idiomatic in-process substitute
//! for a JIT — a deliberate substitution, not a fabricated crate
//! dependency (see DESIGN.md).
//!
//! Scope: this backend only compiles loop-free traces (every trace this
//! crate's tracer can build), so it never has to emit a `Terminator::Loop`
//! and rejects `IrOp::Memory`/`Terminator::Loop` the same way the
//! interpreter does.

use std::collections::HashMap;
use std::sync::Arc;

use nes_core::{DataType, EngineError, EngineResult, Record, Value};

use crate::ir::{ArithOp, BitwiseOp, BlockId, CompareOp, IrFunction, IrOp, LogicalOp, Terminator, ValueId};
use crate::proxy::ProxyRegistry;

use super::{Backend, EvaluateRecord};

type Env = HashMap<ValueId, Value>;
type Thunk = Arc<dyn Fn(&Env, &Record, &ProxyRegistry) -> EngineResult<Value> + Send + Sync>;

#[derive(Clone, Copy, Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

/// The compiled artifact: one closure per block, dispatched by the
/// "program counter" block id rather than interpreted per-call.
#[derive(Clone)]
pub struct CompiledNative {
    entry: BlockId,
    blocks: HashMap<BlockId, CompiledBlock>,
}

#[derive(Clone)]
struct CompiledBlock {
    params: Vec<ValueId>,
    steps: Vec<(ValueId, Thunk)>,
    terminator: CompiledTerminator,
}

#[derive(Clone)]
enum CompiledTerminator {
    Return(Option<ValueId>),
    Branch(BlockId, Option<ValueId>),
    If { cond: ValueId, then_block: BlockId, else_block: BlockId },
}

impl Backend for NativeBackend {
    type Compiled = CompiledNative;

    fn compile(&self, func: &IrFunction) -> EngineResult<Self::Compiled> {
        let entry = func.entry.ok_or_else(|| EngineError::CompilationFailure("IR function has no entry block".into()))?;
        let mut blocks = HashMap::with_capacity(func.blocks.len());
        for (id, block) in &func.blocks {
            let mut steps = Vec::with_capacity(block.instructions.len());
            for instr in &block.instructions {
                steps.push((instr.id, compile_op(&instr.op)?));
            }
            let terminator = match &block.terminator {
                Terminator::Return(v) => CompiledTerminator::Return(*v),
                Terminator::Branch(target, args) => CompiledTerminator::Branch(*target, args.first().copied()),
                Terminator::If { cond, then_block, else_block } => CompiledTerminator::If { cond: *cond, then_block: *then_block, else_block: *else_block },
                Terminator::Loop { .. } => {
                    return Err(EngineError::CompilationFailure("native backend cannot lower a loop terminator".into()));
                }
            };
            blocks.insert(*id, CompiledBlock { params: block.params.clone(), steps, terminator });
        }
        Ok(CompiledNative { entry, blocks })
    }
}

impl EvaluateRecord for CompiledNative {
    fn evaluate(&self, record: &Record, proxies: &ProxyRegistry) -> EngineResult<Value> {
        let mut env: Env = HashMap::new();
        let mut block_id = self.entry;
        loop {
            let block = self.blocks.get(&block_id).ok_or_else(|| EngineError::CompilationFailure(format!("unknown block {block_id:?}")))?;
            for (id, thunk) in &block.steps {
                let value = thunk(&env, record, proxies)?;
                env.insert(*id, value);
            }
            match &block.terminator {
                CompiledTerminator::Return(Some(id)) => return env.get(id).cloned().ok_or_else(|| undefined(*id)),
                CompiledTerminator::Return(None) => return Ok(Value::Bool(false)),
                CompiledTerminator::Branch(target, arg) => {
                    let target_block = self.blocks.get(target).ok_or_else(|| EngineError::CompilationFailure(format!("unknown block {target:?}")))?;
                    let mut next_env = Env::new();
                    if let (Some(param), Some(arg)) = (target_block.params.first(), arg) {
                        next_env.insert(*param, env.get(arg).cloned().ok_or_else(|| undefined(*arg))?);
                    }
                    env = next_env;
                    block_id = *target;
                }
                CompiledTerminator::If { cond, then_block, else_block } => {
                    let cond_val = env.get(cond).cloned().ok_or_else(|| undefined(*cond))?;
                    let taken = cond_val.as_bool().ok_or_else(|| EngineError::OperatorExecutionFailure("if condition is not bool".into()))?;
                    block_id = if taken { *then_block } else { *else_block };
                }
            }
        }
    }
}

fn undefined(id: ValueId) -> EngineError {
    EngineError::CompilationFailure(format!("reference to undefined SSA value {id:?}"))
}

fn compile_op(op: &IrOp) -> EngineResult<Thunk> {
    match op.clone() {
        IrOp::ConstInt(v) => Ok(Arc::new(move |_, _, _| Ok(Value::Int64(v)))),
        IrOp::ConstFloat(v) => Ok(Arc::new(move |_, _, _| Ok(Value::Float64(v)))),
        IrOp::ConstBool(v) => Ok(Arc::new(move |_, _, _| Ok(Value::Bool(v)))),
        IrOp::Variable(name) => Ok(Arc::new(move |_, record, _| {
            record.get(&name).cloned().ok_or_else(|| EngineError::OperatorExecutionFailure(format!("missing field `{name}` at runtime")))
        })),
        IrOp::Arith(arith, lhs, rhs) => Ok(Arc::new(move |env, _, _| eval_arith(arith, &lookup(env, lhs)?, &lookup(env, rhs)?))),
        IrOp::Compare(cmp, lhs, rhs) => Ok(Arc::new(move |env, _, _| eval_compare(cmp, &lookup(env, lhs)?, &lookup(env, rhs)?))),
        IrOp::Logical(LogicalOp::Not, a, _) => Ok(Arc::new(move |env, _, _| Ok(Value::Bool(!as_bool(&lookup(env, a)?)?)))),
        IrOp::Logical(LogicalOp::Negate, a, _) => Ok(Arc::new(move |env, _, _| negate(&lookup(env, a)?))),
        IrOp::Logical(LogicalOp::And, a, Some(b)) => Ok(Arc::new(move |env, _, _| Ok(Value::Bool(as_bool(&lookup(env, a)?)? && as_bool(&lookup(env, b)?)?)))),
        IrOp::Logical(LogicalOp::Or, a, Some(b)) => Ok(Arc::new(move |env, _, _| Ok(Value::Bool(as_bool(&lookup(env, a)?)? || as_bool(&lookup(env, b)?)?)))),
        IrOp::Logical(_, _, None) => Err(EngineError::CompilationFailure("and/or require two operands".into())),
        IrOp::Cast(a, to) => Ok(Arc::new(move |env, _, _| cast_value(&lookup(env, a)?, to))),
        IrOp::Bitwise(bop, a, b) => Ok(Arc::new(move |env, _, _| eval_bitwise(bop, &lookup(env, a)?, &lookup(env, b)?))),
        IrOp::Memory(..) => Err(EngineError::CompilationFailure("native backend has no producer for memory ops".into())),
        IrOp::ProxyCall { function, args, .. } => Ok(Arc::new(move |env, _, proxies| {
            let values: Vec<Value> = args.iter().map(|a| lookup(env, *a)).collect::<EngineResult<_>>()?;
            proxies.call(&function, &values)
        })),
        IrOp::Builtin(name, _) => Err(EngineError::CompilationFailure(format!("unknown builtin `{name}`"))),
    }
}

fn lookup(env: &Env, id: ValueId) -> EngineResult<Value> {
    env.get(&id).cloned().ok_or_else(|| undefined(id))
}

fn as_bool(v: &Value) -> EngineResult<bool> {
    v.as_bool().ok_or_else(|| EngineError::OperatorExecutionFailure("expected bool value".into()))
}

fn negate(v: &Value) -> EngineResult<Value> {
    if matches!(v.data_type(), DataType::Float32 | DataType::Float64) {
        Ok(Value::Float64(-v.as_f64().unwrap_or(0.0)))
    } else {
        Ok(Value::Int64(-v.as_i64().unwrap_or(0)))
    }
}

fn cast_value(v: &Value, to: DataType) -> EngineResult<Value> {
    match to {
        DataType::Float32 | DataType::Float64 => Ok(Value::Float64(v.as_f64().unwrap_or(0.0))),
        DataType::Bool => Ok(Value::Bool(v.as_bool().unwrap_or(false))),
        _ => Ok(Value::Int64(v.as_i64().unwrap_or(0))),
    }
}

fn eval_bitwise(op: BitwiseOp, l: &Value, r: &Value) -> EngineResult<Value> {
    let (li, ri) = (l.as_i64().unwrap_or(0), r.as_i64().unwrap_or(0));
    Ok(Value::Int64(match op {
        BitwiseOp::And => li & ri,
        BitwiseOp::Or => li | ri,
        BitwiseOp::Xor => li ^ ri,
        BitwiseOp::Shl => li.wrapping_shl(ri as u32),
        BitwiseOp::Shr => li.wrapping_shr(ri as u32),
    }))
}

fn eval_compare(op: CompareOp, l: &Value, r: &Value) -> EngineResult<Value> {
    let (lf, rf) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
    Ok(Value::Bool(match op {
        CompareOp::Eq => lf == rf,
        CompareOp::Ne => lf != rf,
        CompareOp::Lt => lf < rf,
        CompareOp::Le => lf <= rf,
        CompareOp::Gt => lf > rf,
        CompareOp::Ge => lf >= rf,
    }))
}

fn eval_arith(op: ArithOp, l: &Value, r: &Value) -> EngineResult<Value> {
    let is_float = matches!(l.data_type(), DataType::Float32 | DataType::Float64) || matches!(r.data_type(), DataType::Float32 | DataType::Float64);
    if is_float {
        let (lf, rf) = (l.as_f64().unwrap_or(0.0), r.as_f64().unwrap_or(0.0));
        return Ok(Value::Float64(match op {
            ArithOp::Add => lf + rf,
            ArithOp::Sub => lf - rf,
            ArithOp::Mul => lf * rf,
            ArithOp::Div => lf / rf,
            ArithOp::Mod => lf % rf,
        }));
    }
    let (li, ri) = (l.as_i64().unwrap_or(0), r.as_i64().unwrap_or(0));
    Ok(Value::Int64(match op {
        ArithOp::Add => li.wrapping_add(ri),
        ArithOp::Sub => li.wrapping_sub(ri),
        ArithOp::Mul => li.wrapping_mul(ri),
        ArithOp::Div => {
            if ri == 0 {
                0
            } else {
                li.wrapping_div(ri)
            }
        }
        ArithOp::Mod => {
            if ri == 0 {
                0
            } else {
                li.wrapping_rem(ri)
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::trace_to_ir_conversion_phase;
    use crate::trace::ExecutionTrace;

    #[test]
    fn native_backend_matches_interpreter_on_s1_map() {
        let trace = ExecutionTrace::new();
        let value = trace.variable("value", DataType::Int64);
        let two = trace.const_int(2);
        let doubled = value * two;
        trace.finish(&doubled);
        let func = trace_to_ir_conversion_phase(trace).unwrap();

        let compiled = NativeBackend::new().compile(&func).unwrap();
        let record = Record::new().with("value", Value::Int64(5));
        assert_eq!(compiled.evaluate(&record, &ProxyRegistry::new()).unwrap(), Value::Int64(10));
    }

    #[test]
    fn native_backend_handles_if_else() {
        let trace = ExecutionTrace::new();
        let value = trace.variable("value", DataType::Int64);
        let zero = trace.const_int(0);
        let cond = value.compare(CompareOp::Gt, zero);
        let result = trace.trace_if(&cond, |t| t.const_int(1), |t| t.const_int(0));
        trace.finish(&result);
        let func = trace_to_ir_conversion_phase(trace).unwrap();
        let compiled = NativeBackend::new().compile(&func).unwrap();

        let record = Record::new().with("value", Value::Int64(-1));
        assert_eq!(compiled.evaluate(&record, &ProxyRegistry::new()).unwrap(), Value::Int64(0));
    }
}
