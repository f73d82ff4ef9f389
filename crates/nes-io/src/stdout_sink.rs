//! `StdoutSink`: prints each record's fields, one record per line.
//! Grounded on `rde-io`'s `StdoutSink`, minus the Arrow-array-specific
//! downcasting — `Record::iter` already yields typed `Value`s, so printing
//! is a direct `Display` pass rather than a per-column-type dispatch.

use nes_core::{EngineResult, Record};

use crate::Sink;

pub struct StdoutSink {
    name: String,
}

impl StdoutSink {
    pub fn new(name: impl Into<String>) -> Self {
        StdoutSink { name: name.into() }
    }
}

impl Sink for StdoutSink {
    fn setup(&self) -> EngineResult<()> {
        Ok(())
    }

    fn write_data(&self, records: &[Record]) -> EngineResult<bool> {
        for record in records {
            let fields: Vec<String> = record.iter().map(|(name, value)| format!("{name}={value}")).collect();
            println!("[{}] {}", self.name, fields.join(" "));
        }
        Ok(true)
    }

    fn shutdown(&self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_core::Value;

    #[test]
    fn write_data_reports_success() {
        let sink = StdoutSink::new("out");
        sink.setup().unwrap();
        let ok = sink.write_data(&[Record::new().with("id", Value::UInt64(1))]).unwrap();
        assert!(ok);
        sink.shutdown().unwrap();
    }
}
