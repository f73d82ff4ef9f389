//! In-memory `Source`/`Sink` adapters for tests and for wiring together
//! short end-to-end scenarios without touching the filesystem — the same
//! role the teacher's in-process test doubles play, generalized to this
//! workspace's `Record`/`TupleBuffer` types.

use std::collections::VecDeque;
use std::sync::Arc;

use nes_buffer::{BufferPool, TupleBuffer};
use nes_core::{ChunkNumber, EngineResult, OriginId, Record, Schema, SequenceNumber};
use parking_lot::Mutex;

use crate::{Sink, Source};

/// Serves a fixed, pre-populated queue of records, one `fillTupleBuffer`
/// worth at a time, then reports EOF.
pub struct InMemorySource {
    records: Mutex<VecDeque<Record>>,
    schema: Schema,
    pool: Arc<BufferPool>,
    origin_id: OriginId,
    next_sequence: Mutex<u64>,
}

impl InMemorySource {
    pub fn new(records: Vec<Record>, schema: Schema, pool: Arc<BufferPool>, origin_id: OriginId) -> Self {
        InMemorySource { records: Mutex::new(records.into()), schema, pool, origin_id, next_sequence: Mutex::new(0) }
    }
}

impl Source for InMemorySource {
    fn open(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn fill_tuple_buffer(&mut self, buffer: &TupleBuffer) -> EngineResult<usize> {
        let capacity = nes_core::Layout::for_schema(&self.schema).capacity(buffer.buffer_size());
        let mut batch = Vec::with_capacity(capacity);
        {
            let mut records = self.records.lock();
            for _ in 0..capacity {
                match records.pop_front() {
                    Some(record) => batch.push(record),
                    None => break,
                }
            }
        }
        if batch.is_empty() {
            return Ok(0);
        }

        buffer.set_origin_id(self.origin_id);
        let mut next_sequence = self.next_sequence.lock();
        buffer.set_sequence_number(SequenceNumber(*next_sequence));
        *next_sequence += 1;
        buffer.set_chunk_number(ChunkNumber(1));
        buffer.set_last_chunk(true);

        nes_runtime::codec::emit_records(&batch, &self.schema, buffer, &self.pool)?;
        Ok(buffer.used_bytes() as usize)
    }

    fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Collects every record it is handed, for assertions in tests.
#[derive(Default)]
pub struct InMemorySink {
    collected: Mutex<Vec<Record>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<Record> {
        self.collected.lock().clone()
    }
}

impl Sink for InMemorySink {
    fn setup(&self) -> EngineResult<()> {
        Ok(())
    }

    fn write_data(&self, records: &[Record]) -> EngineResult<bool> {
        self.collected.lock().extend_from_slice(records);
        Ok(true)
    }

    fn shutdown(&self) -> EngineResult<()> {
        Ok(())
    }
}

fn _assert_send_sync<T: Send + Sync>() {}
fn _check() {
    _assert_send_sync::<InMemorySink>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::{DataType, Field, LayoutKind, Value};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64)], LayoutKind::Row)
    }

    #[test]
    fn drains_its_queue_then_reports_eof() {
        let pool = Arc::new(BufferPool::new(2, 4096));
        let records = vec![Record::new().with("id", nes_core::Value::UInt64(1)), Record::new().with("id", Value::UInt64(2))];
        let mut source = InMemorySource::new(records, schema(), pool.clone(), OriginId(1));
        source.open().unwrap();

        let buffer = pool.get_buffer_blocking();
        assert!(source.fill_tuple_buffer(&buffer).unwrap() > 0);

        let buffer2 = pool.get_buffer_blocking();
        assert_eq!(source.fill_tuple_buffer(&buffer2).unwrap(), 0);
    }

    #[test]
    fn sink_collects_every_record_handed_to_it() {
        let sink = InMemorySink::new();
        sink.write_data(&[Record::new().with("id", Value::UInt64(1))]).unwrap();
        sink.write_data(&[Record::new().with("id", Value::UInt64(2))]).unwrap();
        assert_eq!(sink.collected().len(), 2);
    }
}
