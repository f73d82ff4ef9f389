//! Row- and column-contiguous memory layouts over a `Schema` (spec.md
//! §4.B). A layout maps `(field, tupleIndex) -> byteOffset` and reports how
//! many tuples fit in a buffer of a given size.

use crate::schema::Schema;

/// A precomputed mapping from `(field, tupleIndex)` to a byte offset
/// within a tuple buffer's payload region.
#[derive(Debug, Clone)]
pub enum Layout {
    /// Tuple `i` starts at `base + i * tuple_size`; field offsets are
    /// prefix sums of physical field sizes.
    Row(RowLayout),
    /// Field `k`'s column starts at `column_bases[k]`; tuple `i` of field
    /// `k` is at `column_bases[k] + i * field_sizes[k]`.
    Column(ColumnLayout),
}

#[derive(Debug, Clone)]
pub struct RowLayout {
    pub tuple_size: usize,
    /// Byte offset of each field within one tuple, in schema order.
    pub field_offsets: Vec<usize>,
    pub field_sizes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ColumnLayout {
    /// Byte offset of the start of each field's column within the buffer.
    pub column_bases: Vec<usize>,
    pub field_sizes: Vec<usize>,
}

/// Fixed header reserved at the start of a buffer's payload region before
/// tuple data begins. Distinct from the `BufferControlBlock`, which lives
/// *before* the payload (see `nes-buffer`); this is layout-internal
/// bookkeeping space some layouts may reserve (currently unused, kept at
/// zero, but modeled explicitly so capacity math has one place to change).
pub const LAYOUT_HEADER_BYTES: usize = 0;

impl Layout {
    pub fn for_schema(schema: &Schema) -> Layout {
        let field_sizes: Vec<usize> = schema.fields.iter().map(|f| f.data_type.physical_size()).collect();
        match schema.layout {
            crate::schema::LayoutKind::Row => {
                let mut field_offsets = Vec::with_capacity(field_sizes.len());
                let mut offset = 0usize;
                for size in &field_sizes {
                    field_offsets.push(offset);
                    offset += size;
                }
                Layout::Row(RowLayout { tuple_size: offset, field_offsets, field_sizes })
            }
            crate::schema::LayoutKind::Column => {
                // Column bases are filled in once the buffer's capacity is
                // known (capacity depends on tuple_size which for column
                // layout is the sum of field sizes, same as row layout's
                // per-tuple stride).
                Layout::Column(ColumnLayout { column_bases: Vec::new(), field_sizes })
            }
        }
    }

    /// Number of tuples that fit in a payload region of `buffer_size`
    /// bytes: `floor((buffer_size - header) / tuple_size)`.
    pub fn capacity(&self, buffer_size: usize) -> usize {
        let tuple_size: usize = match self {
            Layout::Row(r) => r.tuple_size,
            Layout::Column(c) => c.field_sizes.iter().sum(),
        };
        if tuple_size == 0 {
            return 0;
        }
        buffer_size.saturating_sub(LAYOUT_HEADER_BYTES) / tuple_size
    }

    /// Materializes column bases for a column layout given the buffer's
    /// tuple capacity. No-op for row layouts.
    pub fn resolved_for_capacity(&self, capacity: usize) -> Layout {
        match self {
            Layout::Row(r) => Layout::Row(r.clone()),
            Layout::Column(c) => {
                let mut bases = Vec::with_capacity(c.field_sizes.len());
                let mut offset = 0usize;
                for size in &c.field_sizes {
                    bases.push(offset);
                    offset += size * capacity;
                }
                Layout::Column(ColumnLayout { column_bases: bases, field_sizes: c.field_sizes.clone() })
            }
        }
    }

    /// Byte offset of field `field_index` for tuple `tuple_index`.
    pub fn offset_of(&self, field_index: usize, tuple_index: usize) -> usize {
        match self {
            Layout::Row(r) => tuple_index * r.tuple_size + r.field_offsets[field_index],
            Layout::Column(c) => c.column_bases[field_index] + tuple_index * c.field_sizes[field_index],
        }
    }

    pub fn field_size(&self, field_index: usize) -> usize {
        match self {
            Layout::Row(r) => r.field_sizes[field_index],
            Layout::Column(c) => c.field_sizes[field_index],
        }
    }
}

/// Reference to a variable-sized field's payload: either inline within the
/// parent buffer or in a child buffer reached by index (spec.md §3/§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSizedRef {
    Inline { offset: usize, length: u32 },
    Child { child_index: u32, length: u32 },
}

/// Threshold below which variable-sized data is stored inline rather than
/// spilled into a child buffer.
pub const INLINE_VAR_SIZED_THRESHOLD: usize = 128;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field, LayoutKind, Schema};

    #[test]
    fn row_layout_offsets_are_prefix_sums() {
        let schema = Schema::new(
            vec![Field::new("id", DataType::UInt64), Field::new("flag", DataType::Bool), Field::new("v", DataType::Int32)],
            LayoutKind::Row,
        );
        let layout = Layout::for_schema(&schema);
        match &layout {
            Layout::Row(r) => {
                assert_eq!(r.field_offsets, vec![0, 8, 9]);
                assert_eq!(r.tuple_size, 13);
            }
            _ => panic!("expected row layout"),
        }
        assert_eq!(layout.offset_of(2, 3), 3 * 13 + 9);
    }

    #[test]
    fn column_layout_bases_scale_with_capacity() {
        let schema = Schema::new(
            vec![Field::new("id", DataType::UInt64), Field::new("v", DataType::Int32)],
            LayoutKind::Column,
        );
        let layout = Layout::for_schema(&schema);
        let capacity = layout.capacity(4096);
        let resolved = layout.resolved_for_capacity(capacity);
        assert_eq!(resolved.offset_of(0, 0), 0);
        assert_eq!(resolved.offset_of(1, 0), 8 * capacity);
        assert_eq!(resolved.offset_of(1, 5), 8 * capacity + 5 * 4);
    }

    #[test]
    fn capacity_floors_division() {
        let schema = Schema::new(vec![Field::new("v", DataType::Int64)], LayoutKind::Row);
        let layout = Layout::for_schema(&schema);
        assert_eq!(layout.capacity(100), 12);
    }
}
