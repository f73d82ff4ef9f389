//! Decodes a `TupleBuffer`'s payload into `Record`s (the `Scan` physical
//! operator) and encodes `Record`s back into a buffer's payload (`Emit`),
//! using the schema's `Layout` for offset math (spec.md §4.B/§4.F).
//!
//! Variable-sized fields always spill to a child buffer here (the
//! `VarSizedRef::Child` path); the inline-below-threshold fast path
//! `layout.rs` models is not implemented by this codec — it is genuinely
//! new plumbing this workspace's ambient stack needed, not a named spec
//! invariant, so the single uniform path is preferred over partial
//! duplication of both paths (see DESIGN.md).

use nes_buffer::{BufferPool, TupleBuffer};
use nes_core::{DataType, EngineError, EngineResult, Layout, Record, Schema, Value};

pub fn scan_buffer(buffer: &TupleBuffer, schema: &Schema) -> EngineResult<Vec<Record>> {
    let layout = Layout::for_schema(schema).resolved_for_capacity(layout_capacity(schema, buffer));
    let slice = buffer.as_slice();
    let num_tuples = buffer.num_tuples() as usize;
    let mut records = Vec::with_capacity(num_tuples);
    for tuple_index in 0..num_tuples {
        let mut record = Record::new();
        for (field_index, field) in schema.fields.iter().enumerate() {
            let offset = layout.offset_of(field_index, tuple_index);
            let size = layout.field_size(field_index);
            let value = decode_field(field.data_type, &slice[offset..offset + size], buffer)?;
            record.set(field.name.clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

pub fn emit_records(records: &[Record], schema: &Schema, buffer: &TupleBuffer, pool: &BufferPool) -> EngineResult<()> {
    let capacity = layout_capacity(schema, buffer);
    if records.len() > capacity {
        return Err(EngineError::AllocationFailure(format!(
            "{} records do not fit in a buffer with capacity {capacity}",
            records.len()
        )));
    }
    let layout = Layout::for_schema(schema).resolved_for_capacity(capacity);
    // SAFETY: this buffer has exactly one live handle (the producing
    // pipeline) until it is emitted downstream, matching the invariant
    // `TupleBuffer::as_mut_slice` documents.
    let slice = unsafe { buffer.as_mut_slice() };

    for (tuple_index, record) in records.iter().enumerate() {
        for (field_index, field) in schema.fields.iter().enumerate() {
            let value = record
                .get(&field.name)
                .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("emitted record missing field `{}`", field.name)))?;
            let offset = layout.offset_of(field_index, tuple_index);
            let size = layout.field_size(field_index);
            encode_field(value, &mut slice[offset..offset + size], buffer, pool)?;
        }
    }

    buffer.set_num_tuples(records.len() as u64);
    let tuple_size: usize = schema.fields.iter().map(|f| f.data_type.physical_size()).sum();
    buffer.set_used_bytes((records.len() * tuple_size) as u64);
    Ok(())
}

fn layout_capacity(schema: &Schema, buffer: &TupleBuffer) -> usize {
    Layout::for_schema(schema).capacity(buffer.buffer_size())
}

fn decode_field(data_type: DataType, bytes: &[u8], buffer: &TupleBuffer) -> EngineResult<Value> {
    Ok(match data_type {
        DataType::Bool => Value::Bool(bytes[0] != 0),
        DataType::Int8 => Value::Int8(bytes[0] as i8),
        DataType::UInt8 => Value::UInt8(bytes[0]),
        DataType::Int16 => Value::Int16(i16::from_le_bytes(bytes.try_into().unwrap())),
        DataType::UInt16 => Value::UInt16(u16::from_le_bytes(bytes.try_into().unwrap())),
        DataType::Int32 => Value::Int32(i32::from_le_bytes(bytes.try_into().unwrap())),
        DataType::UInt32 => Value::UInt32(u32::from_le_bytes(bytes.try_into().unwrap())),
        DataType::Float32 => Value::Float32(f32::from_le_bytes(bytes.try_into().unwrap())),
        DataType::Int64 => Value::Int64(i64::from_le_bytes(bytes.try_into().unwrap())),
        DataType::UInt64 => Value::UInt64(u64::from_le_bytes(bytes.try_into().unwrap())),
        DataType::Float64 => Value::Float64(f64::from_le_bytes(bytes.try_into().unwrap())),
        DataType::FixedChar(_) => Value::FixedChar(bytes.to_vec()),
        DataType::VarSized => {
            let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            let child_index = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
            let child = buffer
                .load_child_buffer(child_index)
                .ok_or_else(|| EngineError::OperatorExecutionFailure(format!("missing child buffer {child_index} for variable-sized field")))?;
            Value::VarSized(child.as_slice()[..length].to_vec())
        }
    })
}

fn encode_field(value: &Value, bytes: &mut [u8], buffer: &TupleBuffer, pool: &BufferPool) -> EngineResult<()> {
    match value {
        Value::Bool(b) => bytes[0] = *b as u8,
        Value::Int8(v) => bytes[0] = *v as u8,
        Value::UInt8(v) => bytes[0] = *v,
        Value::Int16(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::UInt16(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::Int32(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::UInt32(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::Float32(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::UInt64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::Float64(v) => bytes.copy_from_slice(&v.to_le_bytes()),
        Value::FixedChar(data) => {
            let n = bytes.len().min(data.len());
            bytes[..n].copy_from_slice(&data[..n]);
            for b in &mut bytes[n..] {
                *b = 0;
            }
        }
        Value::VarSized(data) => {
            let child = pool.get_unpooled_buffer(data.len().max(1))?;
            // SAFETY: `child` was just allocated and has not yet been
            // shared with anything else.
            unsafe { child.as_mut_slice()[..data.len()].copy_from_slice(data) };
            child.set_used_bytes(data.len() as u64);
            let index = buffer.store_child_buffer(child);
            bytes[0..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
            bytes[4..8].copy_from_slice(&index.to_le_bytes());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_buffer::BufferPool;
    use nes_core::{Field, LayoutKind};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64), Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn round_trips_fixed_width_fields() {
        let pool = BufferPool::new(1, 4096);
        let buffer = pool.get_buffer_blocking();
        let records = vec![
            Record::new().with("id", Value::UInt64(1)).with("value", Value::Int64(-5)),
            Record::new().with("id", Value::UInt64(2)).with("value", Value::Int64(10)),
        ];
        emit_records(&records, &schema(), &buffer, &pool).unwrap();
        let decoded = scan_buffer(&buffer, &schema()).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn variable_sized_field_round_trips_through_a_child_buffer() {
        let schema = Schema::new(vec![Field::new("payload", DataType::VarSized)], LayoutKind::Row);
        let pool = BufferPool::new(1, 4096);
        let buffer = pool.get_buffer_blocking();
        let records = vec![Record::new().with("payload", Value::VarSized(b"hello world".to_vec()))];
        emit_records(&records, &schema, &buffer, &pool).unwrap();
        let decoded = scan_buffer(&buffer, &schema).unwrap();
        assert_eq!(decoded, records);
        assert_eq!(buffer.num_child_buffers(), 1);
    }

    #[test]
    fn rejects_more_records_than_capacity() {
        let pool = BufferPool::new(1, 32);
        let buffer = pool.get_buffer_blocking();
        let records: Vec<Record> = (0..100).map(|i| Record::new().with("id", Value::UInt64(i)).with("value", Value::Int64(0))).collect();
        assert!(emit_records(&records, &schema(), &buffer, &pool).is_err());
    }
}
