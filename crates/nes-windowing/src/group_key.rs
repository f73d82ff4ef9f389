//! `Value` only derives `PartialEq` (its `Float32`/`Float64` variants have
//! no total order), so group-by tuples need a wrapper with a `Hash`/`Eq`
//! impl to live as `HashMap` keys. Floats are compared/hashed bitwise,
//! which is fine for grouping (we never need float ordering here, only
//! "is this the same key as that one").

use std::hash::{Hash, Hasher};

use nes_core::Value;

#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| values_equal(a, b))
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            hash_value(value, state);
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float32(x), Value::Float32(y)) => x.to_bits() == y.to_bits(),
        (Value::Float64(x), Value::Float64(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Bool(v) => v.hash(state),
        Value::Int8(v) => v.hash(state),
        Value::Int16(v) => v.hash(state),
        Value::Int32(v) => v.hash(state),
        Value::Int64(v) => v.hash(state),
        Value::UInt8(v) => v.hash(state),
        Value::UInt16(v) => v.hash(state),
        Value::UInt32(v) => v.hash(state),
        Value::UInt64(v) => v.hash(state),
        Value::Float32(v) => v.to_bits().hash(state),
        Value::Float64(v) => v.to_bits().hash(state),
        Value::FixedChar(bytes) | Value::VarSized(bytes) => bytes.hash(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_hash_equal_via_a_hashmap() {
        use std::collections::HashMap;
        let mut map: HashMap<GroupKey, u64> = HashMap::new();
        map.insert(GroupKey(vec![Value::Int64(1), Value::Bool(true)]), 42);
        assert_eq!(map.get(&GroupKey(vec![Value::Int64(1), Value::Bool(true)])), Some(&42));
        assert_eq!(map.get(&GroupKey(vec![Value::Int64(2), Value::Bool(true)])), None);
    }
}
