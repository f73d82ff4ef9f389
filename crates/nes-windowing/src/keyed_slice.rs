//! `KeyedSlice` (grounded on `KeyedSlice.hpp`): the unit of thread-local
//! pre-aggregation state. Keyed on `sliceEnd`, it holds a hash map from
//! group key to one `Accumulator` per configured aggregate.

use std::collections::HashMap;

use nes_core::{DataType, Value};
use nes_plan::AggregateSpec;

use crate::accumulator::Accumulator;
use crate::group_key::GroupKey;

#[derive(Clone)]
pub struct KeyedSlice {
    start: u64,
    end: u64,
    state: HashMap<GroupKey, Vec<Accumulator>>,
}

impl KeyedSlice {
    pub fn new(start: u64, end: u64) -> Self {
        KeyedSlice { start, end, state: HashMap::new() }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Upserts one record's contribution for `group_key`. `aggregates`
    /// provides the function + input field to pull from `values` and the
    /// data type to seed a fresh accumulator with on first sight of a key.
    pub fn insert(&mut self, group_key: Vec<Value>, values: &HashMap<String, Value>, aggregates: &[AggregateSpec]) {
        let accumulators = self.state.entry(GroupKey(group_key)).or_insert_with(|| {
            aggregates
                .iter()
                .map(|spec| {
                    let data_type = values.get(&spec.input_field).map(Value::data_type).unwrap_or(DataType::Float64);
                    Accumulator::new(spec.function, data_type)
                })
                .collect()
        });
        for (accumulator, spec) in accumulators.iter_mut().zip(aggregates) {
            if let Some(value) = values.get(&spec.input_field) {
                accumulator.update(value);
            }
        }
    }

    /// Merges `other`'s partials into `self`, key by key. Used both to
    /// combine per-worker contributions at trigger time and to fold a
    /// staged contribution into the slice staging area's running merge.
    pub fn merge_from(&mut self, other: KeyedSlice) {
        for (key, accumulators) in other.state {
            match self.state.get_mut(&key) {
                Some(existing) => {
                    for (a, b) in existing.iter_mut().zip(&accumulators) {
                        a.merge(b);
                    }
                }
                None => {
                    self.state.insert(key, accumulators);
                }
            }
        }
    }

    pub fn into_entries(self) -> Vec<(Vec<Value>, Vec<Accumulator>)> {
        self.state.into_iter().map(|(key, accumulators)| (key.0, accumulators)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_plan::AggregateFunction;

    fn spec() -> Vec<AggregateSpec> {
        vec![AggregateSpec { input_field: "value".into(), function: AggregateFunction::Sum, output_field: "sum".into() }]
    }

    #[test]
    fn insert_upserts_by_group_key() {
        let mut slice = KeyedSlice::new(0, 10);
        let mut values = HashMap::new();
        values.insert("value".to_string(), Value::Int64(3));
        slice.insert(vec![Value::Int64(1)], &values, &spec());
        values.insert("value".to_string(), Value::Int64(4));
        slice.insert(vec![Value::Int64(1)], &values, &spec());
        values.insert("value".to_string(), Value::Int64(100));
        slice.insert(vec![Value::Int64(2)], &values, &spec());

        let entries = slice.into_entries();
        assert_eq!(entries.len(), 2);
        let group1 = entries.iter().find(|(k, _)| k == &vec![Value::Int64(1)]).unwrap();
        assert_eq!(group1.1[0].finalize(), Value::Int64(7));
    }

    #[test]
    fn merge_from_combines_matching_keys_and_keeps_unmatched() {
        let mut a = KeyedSlice::new(0, 10);
        let mut values = HashMap::new();
        values.insert("value".to_string(), Value::Int64(3));
        a.insert(vec![Value::Int64(1)], &values, &spec());

        let mut b = KeyedSlice::new(0, 10);
        values.insert("value".to_string(), Value::Int64(5));
        b.insert(vec![Value::Int64(1)], &values, &spec());
        values.insert("value".to_string(), Value::Int64(9));
        b.insert(vec![Value::Int64(2)], &values, &spec());

        a.merge_from(b);
        let entries = a.into_entries();
        assert_eq!(entries.len(), 2);
        let group1 = entries.iter().find(|(k, _)| k == &vec![Value::Int64(1)]).unwrap();
        assert_eq!(group1.1[0].finalize(), Value::Int64(8));
    }
}
