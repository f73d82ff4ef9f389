//! Schema: an ordered list of named fields over a closed set of physical
//! types, selecting a row- or column-contiguous memory layout (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of physical types a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Fixed-width character array of `N` bytes, stored inline.
    FixedChar(usize),
    /// Variable-sized payload: a 4-byte length prefix plus bytes, either
    /// inline (small) or referenced by a child-buffer index.
    VarSized,
}

impl DataType {
    /// Size in bytes of the *inline* representation of a value of this
    /// type. For `VarSized` this is the size of the `(length, child index)`
    /// pair stored in the parent tuple, not the payload itself.
    pub fn physical_size(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
            DataType::FixedChar(n) => *n,
            // 4-byte length prefix + 4-byte child-buffer index (or inline
            // offset when short enough to fit inline — see `layout.rs`).
            DataType::VarSized => 8,
        }
    }

    pub fn is_variable_sized(&self) -> bool {
        matches!(self, DataType::VarSized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type }
    }
}

/// Row-contiguous or column-contiguous memory layout selector. The actual
/// offset computation lives in `layout.rs`; this just tags which strategy
/// a schema prefers, e.g. row layout for narrow high-throughput streams,
/// column layout for wide analytical scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutKind {
    Row,
    Column,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
    pub layout: LayoutKind,
}

impl Schema {
    pub fn new(fields: Vec<Field>, layout: LayoutKind) -> Self {
        Self { fields, layout }
    }

    pub fn empty(layout: LayoutKind) -> Self {
        Self { fields: Vec::new(), layout }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Returns a new schema with `field` appended; used by operators that
    /// introduce implicit output columns (window start/end, qualified key
    /// columns) during schema inference.
    pub fn with_field(&self, field: Field) -> Schema {
        let mut fields = self.fields.clone();
        fields.push(field);
        Schema { fields, layout: self.layout }
    }

    pub fn with_fields(&self, extra: impl IntoIterator<Item = Field>) -> Schema {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Schema { fields, layout: self.layout }
    }

    /// Prefixes every field name with `qualifier::`, used when a binary
    /// operator (join) needs to disambiguate colliding field names from
    /// its two inputs.
    pub fn qualified(&self, qualifier: &str) -> Schema {
        let fields = self
            .fields
            .iter()
            .map(|f| Field::new(format!("{qualifier}::{}", f.name), f.data_type))
            .collect();
        Schema { fields, layout: self.layout }
    }

    pub fn field_offsets_by_name(&self) -> HashMap<&str, usize> {
        self.fields.iter().enumerate().map(|(i, f)| (f.name.as_str(), i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_field_does_not_mutate_original() {
        let base = Schema::new(vec![Field::new("id", DataType::UInt64)], LayoutKind::Row);
        let extended = base.with_field(Field::new("value", DataType::Int64));
        assert_eq!(base.fields.len(), 1);
        assert_eq!(extended.fields.len(), 2);
        assert_eq!(extended.fields[1].name, "value");
    }

    #[test]
    fn qualified_prefixes_every_field() {
        let base = Schema::new(
            vec![Field::new("id", DataType::UInt64), Field::new("x", DataType::Int64)],
            LayoutKind::Row,
        );
        let q = base.qualified("left");
        assert_eq!(q.fields[0].name, "left::id");
        assert_eq!(q.fields[1].name, "left::x");
    }
}
