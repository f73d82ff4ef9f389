//! `JoinSlice`: the per-`[start, end)` build-side state for a stream join,
//! grounded on `NLJSlice.hpp`/`HashJoinSlice.hpp`'s shared shape — both
//! hold one append-only collection per side, keyed for the hash join and
//! unkeyed (a single bucket) for the nested-loop join. Modeling both as
//! `HashMap<GroupKey, Vec<Record>>` buckets lets probe share one
//! bucket-iteration path: cartesian iterates every bucket pair, equi-join
//! iterates only pairs whose bucket key matches.

use std::collections::HashMap;

use nes_core::Record;
use nes_plan::JoinSide;
use nes_windowing::group_key::GroupKey;

#[derive(Clone)]
pub struct JoinSlice {
    start: u64,
    end: u64,
    pub(crate) left: HashMap<GroupKey, Vec<Record>>,
    pub(crate) right: HashMap<GroupKey, Vec<Record>>,
}

impl JoinSlice {
    pub fn new(start: u64, end: u64) -> Self {
        JoinSlice { start, end, left: HashMap::new(), right: HashMap::new() }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    pub fn insert(&mut self, side: JoinSide, key: GroupKey, record: Record) {
        let bucket = match side {
            JoinSide::Left => &mut self.left,
            JoinSide::Right => &mut self.right,
        };
        bucket.entry(key).or_default().push(record);
    }

    /// Folds another worker's partial state for the same `[start, end)`
    /// into this one, bucket by bucket.
    pub fn merge_from(&mut self, other: JoinSlice) {
        merge_side(&mut self.left, other.left);
        merge_side(&mut self.right, other.right);
    }
}

fn merge_side(into: &mut HashMap<GroupKey, Vec<Record>>, from: HashMap<GroupKey, Vec<Record>>) {
    for (key, records) in from {
        into.entry(key).or_default().extend(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::Value;

    #[test]
    fn merge_combines_matching_buckets_and_keeps_unmatched_ones() {
        let mut a = JoinSlice::new(0, 10);
        a.insert(JoinSide::Left, GroupKey(vec![Value::Int64(1)]), Record::new().with("v", Value::Int64(1)));
        let mut b = JoinSlice::new(0, 10);
        b.insert(JoinSide::Left, GroupKey(vec![Value::Int64(1)]), Record::new().with("v", Value::Int64(2)));
        b.insert(JoinSide::Right, GroupKey(vec![Value::Int64(1)]), Record::new().with("v", Value::Int64(3)));

        a.merge_from(b);
        assert_eq!(a.left.get(&GroupKey(vec![Value::Int64(1)])).unwrap().len(), 2);
        assert_eq!(a.right.get(&GroupKey(vec![Value::Int64(1)])).unwrap().len(), 1);
    }
}
