//! Scalar expressions used inside `Selection`/`Map`/`Aggregation` payloads.
//! A small closed set, type-checked against an input schema during schema
//! inference (spec.md §4.C).

use nes_core::{DataType, EngineError, EngineResult, Record, Schema, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Field(String),
    Literal(Literal),
    Unary(UnOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Field(name.into())
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v))
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        Expr::Binary(Box::new(self), BinOp::Gt, Box::new(rhs))
    }

    pub fn mul(self, rhs: Expr) -> Expr {
        Expr::Binary(Box::new(self), BinOp::Mul, Box::new(rhs))
    }

    /// Type-checks the expression against `schema`, returning its result
    /// type. Unknown fields and operand type clashes surface as
    /// `SchemaInferenceFailure`, matching spec.md §4.C's synchronous error
    /// surfacing for plan construction.
    pub fn infer_type(&self, schema: &Schema) -> EngineResult<DataType> {
        match self {
            Expr::Field(name) => schema
                .field(name)
                .map(|f| f.data_type)
                .ok_or_else(|| EngineError::SchemaInferenceFailure(format!("unknown field `{name}`"))),
            Expr::Literal(Literal::Bool(_)) => Ok(DataType::Bool),
            Expr::Literal(Literal::Int(_)) => Ok(DataType::Int64),
            Expr::Literal(Literal::Float(_)) => Ok(DataType::Float64),
            Expr::Unary(UnOp::Not, inner) => {
                let t = inner.infer_type(schema)?;
                if t == DataType::Bool {
                    Ok(DataType::Bool)
                } else {
                    Err(EngineError::SchemaInferenceFailure(format!("`not` requires bool, found {t:?}")))
                }
            }
            Expr::Unary(UnOp::Neg, inner) => {
                let t = inner.infer_type(schema)?;
                if is_numeric(t) {
                    Ok(t)
                } else {
                    Err(EngineError::SchemaInferenceFailure(format!("unary `-` requires a numeric type, found {t:?}")))
                }
            }
            Expr::Binary(lhs, op, rhs) => {
                let lt = lhs.infer_type(schema)?;
                let rt = rhs.infer_type(schema)?;
                match op {
                    BinOp::And | BinOp::Or => {
                        if lt == DataType::Bool && rt == DataType::Bool {
                            Ok(DataType::Bool)
                        } else {
                            Err(EngineError::SchemaInferenceFailure(format!(
                                "logical op requires bool operands, found {lt:?} and {rt:?}"
                            )))
                        }
                    }
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        if types_comparable(lt, rt) {
                            Ok(DataType::Bool)
                        } else {
                            Err(EngineError::SchemaInferenceFailure(format!(
                                "cannot compare {lt:?} with {rt:?}"
                            )))
                        }
                    }
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                        if is_numeric(lt) && is_numeric(rt) {
                            Ok(wider(lt, rt))
                        } else {
                            Err(EngineError::SchemaInferenceFailure(format!(
                                "arithmetic requires numeric operands, found {lt:?} and {rt:?}"
                            )))
                        }
                    }
                }
            }
        }
    }

    /// Evaluates the expression against a concrete `Record` (used by the
    /// interpreter backend and by unit tests independent of codegen).
    pub fn eval(&self, record: &Record) -> EngineResult<Value> {
        match self {
            Expr::Field(name) => record
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("missing field `{name}` at runtime"))),
            Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
            Expr::Literal(Literal::Int(v)) => Ok(Value::Int64(*v)),
            Expr::Literal(Literal::Float(v)) => Ok(Value::Float64(*v)),
            Expr::Unary(UnOp::Not, inner) => {
                let v = inner.eval(record)?;
                Ok(Value::Bool(!v.as_bool().ok_or_else(bool_type_err)?))
            }
            Expr::Unary(UnOp::Neg, inner) => {
                let v = inner.eval(record)?;
                numeric_neg(&v)
            }
            Expr::Binary(lhs, op, rhs) => {
                let l = lhs.eval(record)?;
                let r = rhs.eval(record)?;
                eval_binary(*op, &l, &r)
            }
        }
    }
}

fn bool_type_err() -> EngineError {
    EngineError::OperatorExecutionFailure("expected bool value".into())
}

fn is_numeric(t: DataType) -> bool {
    matches!(
        t,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn is_float(t: DataType) -> bool {
    matches!(t, DataType::Float32 | DataType::Float64)
}

fn wider(a: DataType, b: DataType) -> DataType {
    if is_float(a) || is_float(b) {
        DataType::Float64
    } else {
        DataType::Int64
    }
}

fn types_comparable(a: DataType, b: DataType) -> bool {
    (is_numeric(a) && is_numeric(b)) || a == b
}

fn numeric_neg(v: &Value) -> EngineResult<Value> {
    match v.as_f64() {
        Some(f) if matches!(v.data_type(), DataType::Float32 | DataType::Float64) => Ok(Value::Float64(-f)),
        Some(_) => v
            .as_i64()
            .map(|i| Value::Int64(-i))
            .ok_or_else(|| EngineError::OperatorExecutionFailure("unary `-` on non-numeric value".into())),
        None => Err(EngineError::OperatorExecutionFailure("unary `-` on non-numeric value".into())),
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> EngineResult<Value> {
    match op {
        BinOp::And => Ok(Value::Bool(
            l.as_bool().ok_or_else(bool_type_err)? && r.as_bool().ok_or_else(bool_type_err)?,
        )),
        BinOp::Or => Ok(Value::Bool(l.as_bool().ok_or_else(bool_type_err)? || r.as_bool().ok_or_else(bool_type_err)?)),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let (lf, rf) = (numeric_of(l)?, numeric_of(r)?);
            let result = match op {
                BinOp::Eq => lf == rf,
                BinOp::Ne => lf != rf,
                BinOp::Lt => lf < rf,
                BinOp::Le => lf <= rf,
                BinOp::Gt => lf > rf,
                BinOp::Ge => lf >= rf,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            if is_float(l.data_type()) || is_float(r.data_type()) {
                let (lf, rf) = (numeric_of(l)?, numeric_of(r)?);
                Ok(Value::Float64(match op {
                    BinOp::Add => lf + rf,
                    BinOp::Sub => lf - rf,
                    BinOp::Mul => lf * rf,
                    BinOp::Div => lf / rf,
                    BinOp::Mod => lf % rf,
                    _ => unreachable!(),
                }))
            } else {
                let (li, ri) = (int_of(l)?, int_of(r)?);
                // Integer ops wrap, matching the compiled path's two's
                // complement semantics (spec.md §4.E).
                Ok(Value::Int64(match op {
                    BinOp::Add => li.wrapping_add(ri),
                    BinOp::Sub => li.wrapping_sub(ri),
                    BinOp::Mul => li.wrapping_mul(ri),
                    BinOp::Div => li.checked_div(ri).ok_or_else(div_zero)?,
                    BinOp::Mod => li.checked_rem(ri).ok_or_else(div_zero)?,
                    _ => unreachable!(),
                }))
            }
        }
    }
}

fn div_zero() -> EngineError {
    EngineError::OperatorExecutionFailure("division by zero".into())
}

fn numeric_of(v: &Value) -> EngineResult<f64> {
    v.as_f64().ok_or_else(|| EngineError::OperatorExecutionFailure(format!("expected numeric value, found {v:?}")))
}

fn int_of(v: &Value) -> EngineResult<i64> {
    v.as_i64().ok_or_else(|| EngineError::OperatorExecutionFailure(format!("expected integer value, found {v:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::{Field, LayoutKind};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn infers_comparison_as_bool() {
        let e = Expr::field("value").gt(Expr::int(0));
        assert_eq!(e.infer_type(&schema()).unwrap(), DataType::Bool);
    }

    #[test]
    fn unknown_field_fails_inference() {
        let e = Expr::field("missing").gt(Expr::int(0));
        assert!(e.infer_type(&schema()).is_err());
    }

    #[test]
    fn eval_applies_s1_scenario_expressions() {
        let record = Record::new().with("value", Value::Int64(5));
        let filter = Expr::field("value").gt(Expr::int(0));
        assert_eq!(filter.eval(&record).unwrap(), Value::Bool(true));
        let map = Expr::field("value").mul(Expr::int(2));
        assert_eq!(map.eval(&record).unwrap(), Value::Int64(10));
    }
}
