//! Per-key partial aggregates held inside a slice. One `Accumulator` per
//! configured `AggregateSpec`, in spec order; `merge` combines two
//! workers' partials for the same group key during the slice-merge phase
//! (spec.md §4.I, step 3).

use nes_core::{DataType, Value};
use nes_plan::AggregateFunction;

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum { data_type: DataType, total: f64 },
    Count { count: u64 },
    Min { data_type: DataType, min: f64 },
    Max { data_type: DataType, max: f64 },
    Avg { data_type: DataType, total: f64, count: u64 },
}

impl Accumulator {
    pub fn new(function: AggregateFunction, data_type: DataType) -> Self {
        match function {
            AggregateFunction::Sum => Accumulator::Sum { data_type, total: 0.0 },
            AggregateFunction::Count => Accumulator::Count { count: 0 },
            AggregateFunction::Min => Accumulator::Min { data_type, min: f64::INFINITY },
            AggregateFunction::Max => Accumulator::Max { data_type, max: f64::NEG_INFINITY },
            AggregateFunction::Avg => Accumulator::Avg { data_type, total: 0.0, count: 0 },
        }
    }

    pub fn update(&mut self, value: &Value) {
        let numeric = value.as_f64();
        match self {
            Accumulator::Sum { total, .. } => *total += numeric.unwrap_or(0.0),
            Accumulator::Count { count } => *count += 1,
            Accumulator::Min { min, .. } => {
                if let Some(v) = numeric {
                    *min = min.min(v);
                }
            }
            Accumulator::Max { max, .. } => {
                if let Some(v) = numeric {
                    *max = max.max(v);
                }
            }
            Accumulator::Avg { total, count, .. } => {
                *total += numeric.unwrap_or(0.0);
                *count += 1;
            }
        }
    }

    /// Combines `other` into `self`. Both must have come from the same
    /// `AggregateSpec`; mismatched variants are a build-time bug, not a
    /// runtime condition (panics rather than silently producing a wrong
    /// merged value).
    pub fn merge(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Sum { total: a, .. }, Accumulator::Sum { total: b, .. }) => *a += b,
            (Accumulator::Count { count: a }, Accumulator::Count { count: b }) => *a += b,
            (Accumulator::Min { min: a, .. }, Accumulator::Min { min: b, .. }) => *a = a.min(*b),
            (Accumulator::Max { max: a, .. }, Accumulator::Max { max: b, .. }) => *a = a.max(*b),
            (Accumulator::Avg { total: a, count: ac, .. }, Accumulator::Avg { total: b, count: bc, .. }) => {
                *a += b;
                *ac += bc;
            }
            _ => panic!("merged accumulators for different aggregate functions"),
        }
    }

    pub fn finalize(&self) -> Value {
        match self {
            Accumulator::Sum { data_type, total } => cast_to(*data_type, *total),
            Accumulator::Count { count } => Value::UInt64(*count),
            Accumulator::Min { data_type, min } => cast_to(*data_type, if min.is_finite() { *min } else { 0.0 }),
            Accumulator::Max { data_type, max } => cast_to(*data_type, if max.is_finite() { *max } else { 0.0 }),
            Accumulator::Avg { total, count, .. } => Value::Float64(if *count == 0 { 0.0 } else { total / *count as f64 }),
        }
    }
}

fn cast_to(data_type: DataType, value: f64) -> Value {
    match data_type {
        DataType::Int8 => Value::Int8(value as i8),
        DataType::Int16 => Value::Int16(value as i16),
        DataType::Int32 => Value::Int32(value as i32),
        DataType::Int64 => Value::Int64(value as i64),
        DataType::UInt8 => Value::UInt8(value as u8),
        DataType::UInt16 => Value::UInt16(value as u16),
        DataType::UInt32 => Value::UInt32(value as u32),
        DataType::UInt64 => Value::UInt64(value as u64),
        DataType::Float32 => Value::Float32(value as f32),
        _ => Value::Float64(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_accumulates_and_merges() {
        let mut a = Accumulator::new(AggregateFunction::Sum, DataType::Int64);
        a.update(&Value::Int64(3));
        a.update(&Value::Int64(4));
        let mut b = Accumulator::new(AggregateFunction::Sum, DataType::Int64);
        b.update(&Value::Int64(10));
        a.merge(&b);
        assert_eq!(a.finalize(), Value::Int64(17));
    }

    #[test]
    fn avg_divides_total_by_count_after_merge() {
        let mut a = Accumulator::new(AggregateFunction::Avg, DataType::Int64);
        a.update(&Value::Int64(2));
        a.update(&Value::Int64(4));
        let mut b = Accumulator::new(AggregateFunction::Avg, DataType::Int64);
        b.update(&Value::Int64(6));
        a.merge(&b);
        assert_eq!(a.finalize(), Value::Float64(4.0));
    }

    #[test]
    fn count_ignores_the_updated_value() {
        let mut a = Accumulator::new(AggregateFunction::Count, DataType::Int64);
        a.update(&Value::Int64(100));
        a.update(&Value::Int64(-5));
        assert_eq!(a.finalize(), Value::UInt64(2));
    }
}
