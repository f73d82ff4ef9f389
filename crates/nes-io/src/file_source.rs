//! `DelimitedFileSource`: reads a delimited text file row by row and fills
//! pooled buffers from it. Generalized from `rde-io`'s `CsvSource`
//! (`try_new`/open-a-path/loop-until-EOF shape) to the synchronous
//! `open`/`fillTupleBuffer`/`close` contract and to `nes_core::Value`
//! instead of Arrow arrays — this workspace has no Arrow dependency, so
//! parsing goes through the `csv` crate's untyped `StringRecord` and a
//! schema-driven per-field parse instead of `arrow::csv::Reader`.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use nes_buffer::{BufferPool, TupleBuffer};
use nes_core::{DataType, EngineError, EngineResult, Field, Layout, OriginId, Record, Schema, SequenceNumber, Value};
use tracing::{info, warn};

use crate::Source;

pub struct DelimitedFileSource {
    path: PathBuf,
    schema: Schema,
    pool: Arc<BufferPool>,
    origin_id: OriginId,
    has_header: bool,
    delimiter: u8,
    reader: Option<csv::Reader<File>>,
    next_sequence: u64,
}

impl DelimitedFileSource {
    pub fn new(path: impl Into<PathBuf>, schema: Schema, pool: Arc<BufferPool>, origin_id: OriginId) -> Self {
        DelimitedFileSource { path: path.into(), schema, pool, origin_id, has_header: false, delimiter: b',', reader: None, next_sequence: 0 }
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn parse_field(data_type: DataType, raw: &str) -> EngineResult<Value> {
        let parse_err = |e: Box<dyn std::error::Error>| EngineError::SchemaInferenceFailure(format!("cannot parse `{raw}` as {data_type:?}: {e}"));
        Ok(match data_type {
            DataType::Bool => Value::Bool(raw == "1" || raw.eq_ignore_ascii_case("true")),
            DataType::Int8 => Value::Int8(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::Int16 => Value::Int16(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::Int32 => Value::Int32(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::Int64 => Value::Int64(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::UInt8 => Value::UInt8(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::UInt16 => Value::UInt16(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::UInt32 => Value::UInt32(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::UInt64 => Value::UInt64(raw.parse().map_err(|e: std::num::ParseIntError| parse_err(e.into()))?),
            DataType::Float32 => Value::Float32(raw.parse().map_err(|e: std::num::ParseFloatError| parse_err(e.into()))?),
            DataType::Float64 => Value::Float64(raw.parse().map_err(|e: std::num::ParseFloatError| parse_err(e.into()))?),
            DataType::FixedChar(width) => {
                let mut bytes = raw.as_bytes().to_vec();
                bytes.resize(width, 0);
                Value::FixedChar(bytes)
            }
            DataType::VarSized => Value::VarSized(raw.as_bytes().to_vec()),
        })
    }

    fn parse_row(&self, row: &csv::StringRecord) -> EngineResult<Record> {
        let mut record = Record::new();
        for (field, raw) in self.schema.fields.iter().zip(row.iter()) {
            record.set(field.name.clone(), Self::parse_field(field.data_type, raw)?);
        }
        Ok(record)
    }
}

impl Source for DelimitedFileSource {
    fn open(&mut self) -> EngineResult<()> {
        let file = File::open(&self.path).map_err(|e| EngineError::OperatorExecutionFailure(format!("open {}: {e}", self.path.display())))?;
        self.reader = Some(csv::ReaderBuilder::new().has_headers(self.has_header).delimiter(self.delimiter).from_reader(file));
        info!(path = %self.path.display(), "opened delimited file source");
        Ok(())
    }

    fn fill_tuple_buffer(&mut self, buffer: &TupleBuffer) -> EngineResult<usize> {
        let reader = self.reader.as_mut().ok_or_else(|| EngineError::OperatorExecutionFailure("source not open".into()))?;
        let capacity = Layout::for_schema(&self.schema).capacity(buffer.buffer_size());

        let mut records = Vec::with_capacity(capacity);
        while records.len() < capacity {
            let mut row = csv::StringRecord::new();
            match reader.read_record(&mut row) {
                Ok(true) => match self.parse_row(&row) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!(%err, "dropping unparsable row"),
                },
                Ok(false) => break,
                Err(err) => return Err(EngineError::OperatorExecutionFailure(format!("csv read error: {err}"))),
            }
        }

        if records.is_empty() {
            return Ok(0);
        }

        buffer.set_origin_id(self.origin_id);
        buffer.set_sequence_number(SequenceNumber(self.next_sequence));
        self.next_sequence += 1;
        buffer.set_chunk_number(nes_core::ChunkNumber(1));
        buffer.set_last_chunk(true);

        nes_runtime::codec::emit_records(&records, &self.schema, buffer, &self.pool)?;
        Ok(buffer.used_bytes() as usize)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::LayoutKind;
    use std::io::Write;

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::UInt64), Field::new("value", DataType::Int64)], LayoutKind::Row)
    }

    #[test]
    fn reads_rows_into_buffers_until_eof() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("nes-io-test-{:?}.csv", std::thread::current().id()));
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "1,10").unwrap();
            writeln!(f, "2,20").unwrap();
        }

        let pool = Arc::new(BufferPool::new(1, 4096));
        let mut source = DelimitedFileSource::new(&path, schema(), pool.clone(), OriginId(7));
        source.open().unwrap();

        let buffer = pool.get_buffer_blocking();
        let used = source.fill_tuple_buffer(&buffer).unwrap();
        assert!(used > 0);
        assert_eq!(buffer.origin_id(), OriginId(7));

        let decoded = nes_runtime::codec::scan_buffer(&buffer, &schema()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].get("id"), Some(&Value::UInt64(1)));

        let buffer2 = pool.get_buffer_blocking();
        assert_eq!(source.fill_tuple_buffer(&buffer2).unwrap(), 0, "second call hits EOF");

        source.close().unwrap();
        std::fs::remove_file(&path).ok();
    }
}
