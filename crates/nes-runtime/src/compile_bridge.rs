//! Bridges a `nes_plan::Expr` (the plan-level scalar expression language)
//! into a `nes_compile::ExecutionTrace`, so `Selection`/`Map` physical
//! operators are actually evaluated through the Nautilus-style tracing
//! compiler (spec.md §4.D/§4.E) rather than `Expr::eval`'s reference
//! interpreter — that reference evaluator exists in `nes-plan` purely for
//! schema-inference-adjacent unit tests, not for pipeline execution.
//!
//! Tracing happens once per physical operator at pipeline-compile time;
//! the resulting `IrFunction` is hosted by a `Backend` and evaluated once
//! per `Record` thereafter, matching "first execution is symbolic,
//! subsequent executions run the lowered form" (spec.md §4.E).

use nes_compile::{CompareOp, ExecutionTrace, TracedValue};
use nes_core::{EngineResult, Schema};
use nes_plan::{BinOp, Expr, Literal, UnOp};

/// Records `expr`'s evaluation into a fresh `ExecutionTrace`, type-checked
/// against `schema` up front (reusing `Expr::infer_type`'s already-proven
/// type rules rather than re-deriving stamps while tracing).
pub fn compile_expr(expr: &Expr, schema: &Schema) -> EngineResult<ExecutionTrace> {
    expr.infer_type(schema)?;
    let trace = ExecutionTrace::new();
    let result = record(expr, schema, &trace)?;
    trace.finish(&result);
    Ok(trace)
}

fn record(expr: &Expr, schema: &Schema, trace: &ExecutionTrace) -> EngineResult<TracedValue> {
    match expr {
        Expr::Field(name) => {
            let stamp = expr.infer_type(schema)?;
            Ok(trace.variable(name.clone(), stamp))
        }
        Expr::Literal(Literal::Bool(b)) => Ok(trace.const_bool(*b)),
        Expr::Literal(Literal::Int(v)) => Ok(trace.const_int(*v)),
        Expr::Literal(Literal::Float(v)) => Ok(trace.const_float(*v)),
        Expr::Unary(UnOp::Not, inner) => Ok(!record(inner, schema, trace)?),
        Expr::Unary(UnOp::Neg, inner) => Ok(-record(inner, schema, trace)?),
        Expr::Binary(lhs, op, rhs) => {
            let l = record(lhs, schema, trace)?;
            let r = record(rhs, schema, trace)?;
            Ok(match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
                BinOp::Mod => l % r,
                BinOp::Eq => l.compare(CompareOp::Eq, r),
                BinOp::Ne => l.compare(CompareOp::Ne, r),
                BinOp::Lt => l.compare(CompareOp::Lt, r),
                BinOp::Le => l.compare(CompareOp::Le, r),
                BinOp::Gt => l.compare(CompareOp::Gt, r),
                BinOp::Ge => l.compare(CompareOp::Ge, r),
                BinOp::And => l.and(r),
                BinOp::Or => l.or(r),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_compile::{Backend, EvaluateRecord, Interpreter, ProxyRegistry};
    use nes_core::{DataType, Field, LayoutKind, Record, Value};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn compiled_selection_matches_reference_eval() {
        let expr = Expr::field("value").gt(Expr::int(0));
        let trace = compile_expr(&expr, &schema()).unwrap();
        let func = nes_compile::trace_to_ir_conversion_phase(trace).unwrap();
        let compiled = Interpreter::new().compile(&func).unwrap();

        let record = Record::new().with("value", Value::Int64(5));
        assert_eq!(compiled.evaluate(&record, &ProxyRegistry::new()).unwrap(), expr.eval(&record).unwrap());

        let record = Record::new().with("value", Value::Int64(-1));
        assert_eq!(compiled.evaluate(&record, &ProxyRegistry::new()).unwrap(), expr.eval(&record).unwrap());
    }

    #[test]
    fn compiled_map_matches_reference_eval() {
        let expr = Expr::field("value").mul(Expr::int(2));
        let trace = compile_expr(&expr, &schema()).unwrap();
        let func = nes_compile::trace_to_ir_conversion_phase(trace).unwrap();
        let compiled = Interpreter::new().compile(&func).unwrap();

        let record = Record::new().with("value", Value::Int64(21));
        assert_eq!(compiled.evaluate(&record, &ProxyRegistry::new()).unwrap(), Value::Int64(42));
    }
}
