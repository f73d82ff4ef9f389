//! The interpreter backend: a tree/block-walking evaluator over the typed
//! IR. Required by spec.md §4.E ("Only the interpreter is required").

use std::collections::HashMap;

use nes_core::{DataType, EngineError, EngineResult, Record, Value};

use crate::ir::{ArithOp, BitwiseOp, BlockId, CompareOp, IrFunction, IrOp, LogicalOp, Terminator, ValueId};
use crate::proxy::ProxyRegistry;

use super::{Backend, EvaluateRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter {
    /// When set, division-by-zero and integer-overflow become checked
    /// runtime errors rather than wrapping/UB-in-the-compiled-path
    /// (spec.md §4.E: "checked by the interpreter under a debug flag
    /// only").
    pub debug_checks: bool,
}

impl Interpreter {
    pub fn new() -> Self {
        Self { debug_checks: false }
    }

    pub fn with_debug_checks() -> Self {
        Self { debug_checks: true }
    }
}

/// The interpreter's "compiled" form: the IR plus the debug-checks flag it
/// was compiled with. Walking it re-interprets the block graph on every
/// call, unlike `NativeBackend`'s boxed closures.
#[derive(Clone)]
pub struct CompiledInterpreter {
    func: IrFunction,
    debug_checks: bool,
}

impl Backend for Interpreter {
    type Compiled = CompiledInterpreter;

    fn compile(&self, func: &IrFunction) -> EngineResult<Self::Compiled> {
        Ok(CompiledInterpreter { func: func.clone(), debug_checks: self.debug_checks })
    }
}

impl EvaluateRecord for CompiledInterpreter {
    fn evaluate(&self, record: &Record, proxies: &ProxyRegistry) -> EngineResult<Value> {
        let entry = self.func.entry.ok_or_else(|| EngineError::CompilationFailure("IR function has no entry block".into()))?;
        run_interpreter(&self.func, entry, &HashMap::new(), record, proxies, self.debug_checks)
    }
}

impl EvaluateRecord for IrFunction {
    fn evaluate(&self, record: &Record, proxies: &ProxyRegistry) -> EngineResult<Value> {
        let entry = self.entry.ok_or_else(|| EngineError::CompilationFailure("IR function has no entry block".into()))?;
        run_interpreter(self, entry, &HashMap::new(), record, proxies, false)
    }
}

fn run_interpreter(
    func: &IrFunction,
    mut block_id: BlockId,
    incoming_args: &HashMap<ValueId, Value>,
    record: &Record,
    proxies: &ProxyRegistry,
    debug_checks: bool,
) -> EngineResult<Value> {
    let mut env: HashMap<ValueId, Value> = incoming_args.clone();
    loop {
        let block = func.block(block_id);
        for instr in &block.instructions {
            let value = eval_op(&instr.op, &env, record, proxies, debug_checks)?;
            env.insert(instr.id, value);
        }
        match &block.terminator {
            Terminator::Return(Some(id)) => return env.get(id).cloned().ok_or_else(|| undefined(*id)),
            Terminator::Return(None) => return Ok(Value::Bool(false)),
            Terminator::Branch(target, args) => {
                let target_block = func.block(*target);
                let mut next_args = HashMap::new();
                for (param, arg) in target_block.params.iter().zip(args.iter()) {
                    next_args.insert(*param, env.get(arg).cloned().ok_or_else(|| undefined(*arg))?);
                }
                env = next_args;
                block_id = *target;
            }
            Terminator::If { cond, then_block, else_block } => {
                let cond_val = env.get(cond).cloned().ok_or_else(|| undefined(*cond))?;
                let taken = cond_val.as_bool().ok_or_else(|| EngineError::OperatorExecutionFailure("if condition is not bool".into()))?;
                block_id = if taken { *then_block } else { *else_block };
            }
            Terminator::Loop { .. } => {
                return Err(EngineError::CompilationFailure("loop terminator has no producer in this core; interpreter cannot execute it".into()));
            }
        }
    }
}

fn undefined(id: ValueId) -> EngineError {
    EngineError::CompilationFailure(format!("reference to undefined SSA value {id:?}"))
}

fn eval_op(op: &IrOp, env: &HashMap<ValueId, Value>, record: &Record, proxies: &ProxyRegistry, debug_checks: bool) -> EngineResult<Value> {
    let get = |id: &ValueId| env.get(id).cloned().ok_or_else(|| undefined(*id));
    match op {
        IrOp::ConstInt(v) => Ok(Value::Int64(*v)),
        IrOp::ConstFloat(v) => Ok(Value::Float64(*v)),
        IrOp::ConstBool(v) => Ok(Value::Bool(*v)),
        IrOp::Variable(name) => record
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("missing field `{name}` at runtime"))),
        IrOp::Arith(op, lhs, rhs) => eval_arith(*op, &get(lhs)?, &get(rhs)?, debug_checks),
        IrOp::Compare(op, lhs, rhs) => eval_compare(*op, &get(lhs)?, &get(rhs)?),
        IrOp::Logical(LogicalOp::Not, a, _) => Ok(Value::Bool(!as_bool(&get(a)?)?)),
        IrOp::Logical(LogicalOp::Negate, a, _) => negate(&get(a)?),
        IrOp::Logical(LogicalOp::And, a, b) => {
            Ok(Value::Bool(as_bool(&get(a)?)? && as_bool(&get(b.as_ref().ok_or_else(|| missing_operand("and"))?)?)?))
        }
        IrOp::Logical(LogicalOp::Or, a, b) => {
            Ok(Value::Bool(as_bool(&get(a)?)? || as_bool(&get(b.as_ref().ok_or_else(|| missing_operand("or"))?)?)?))
        }
        IrOp::Cast(a, to) => cast_value(&get(a)?, *to),
        IrOp::Bitwise(op, a, b) => eval_bitwise(*op, &get(a)?, &get(b)?),
        IrOp::Memory(..) => Err(EngineError::CompilationFailure("memory ops have no producer in this core".into())),
        IrOp::ProxyCall { function, args, .. } => {
            let values: Vec<Value> = args.iter().map(&get).collect::<EngineResult<_>>()?;
            proxies.call(function, &values)
        }
        IrOp::Builtin(name, _) => Err(EngineError::CompilationFailure(format!("unknown builtin `{name}`"))),
    }
}

fn missing_operand(op: &str) -> EngineError {
    EngineError::CompilationFailure(format!("`{op}` requires two operands"))
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

fn eval_arith(op: ArithOp, l: &Value, r: &Value, debug_checks: bool) -> EngineResult<Value> {
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
    if debug_checks && matches!(op, ArithOp::Div | ArithOp::Mod) && ri == 0 {
        return Err(EngineError::OperatorExecutionFailure("division by zero".into()));
    }
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
    fn interprets_s1_filter_predicate() {
        let trace = ExecutionTrace::new();
        let value = trace.variable("value", DataType::Int64);
        let zero = trace.const_int(0);
        let predicate = value.compare(CompareOp::Gt, zero);
        trace.finish(&predicate);
        let func = trace_to_ir_conversion_phase(trace).unwrap();

        let record = Record::new().with("value", Value::Int64(5));
        let out = func.evaluate(&record, &ProxyRegistry::new()).unwrap();
        assert_eq!(out, Value::Bool(true));
    }

    #[test]
    fn interprets_if_else_merge() {
        let trace = ExecutionTrace::new();
        let value = trace.variable("value", DataType::Int64);
        let zero = trace.const_int(0);
        let cond = value.compare(CompareOp::Gt, zero);
        let result = trace.trace_if(&cond, |t| t.const_int(1), |t| t.const_int(-1));
        trace.finish(&result);
        let func = trace_to_ir_conversion_phase(trace).unwrap();

        let positive = Record::new().with("value", Value::Int64(5));
        assert_eq!(func.evaluate(&positive, &ProxyRegistry::new()).unwrap(), Value::Int64(1));
        let negative = Record::new().with("value", Value::Int64(-5));
        assert_eq!(func.evaluate(&negative, &ProxyRegistry::new()).unwrap(), Value::Int64(-1));
    }
}
