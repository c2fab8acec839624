//! CSV encoder
//!
//! One row per sample, one column per metric path, preceded by a
//! `timestamp` column. When the schema changes between chunks a fresh
//! header row is emitted, so a single output stream stays parseable
//! across producer restarts.

use std::io::Write;

use chrono::SecondsFormat;

use crate::decode::Sample;
use crate::output::OutputResult;

/// Streaming CSV writer over samples
pub struct CsvEncoder<W: Write> {
    writer: csv::Writer<W>,
    /// Paths of the header currently in effect
    header: Option<Vec<String>>,
    rows: u64,
}

impl<W: Write> CsvEncoder<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
            header: None,
            rows: 0,
        }
    }

    /// Write one sample, emitting a header row first when needed
    pub fn write_sample(&mut self, sample: &Sample) -> OutputResult<()> {
        let changed = match &self.header {
            None => true,
            Some(current) => {
                current.len() != sample.len()
                    || !sample
                        .metrics()
                        .zip(current.iter())
                        .all(|((path, _), known)| path == known)
            }
        };

        if changed {
            let paths: Vec<String> = sample.metrics().map(|(p, _)| p.to_string()).collect();
            self.writer.write_record(
                std::iter::once("timestamp").chain(paths.iter().map(String::as_str)),
            )?;
            self.header = Some(paths);
        }

        let timestamp = sample
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let record = std::iter::once(timestamp)
            .chain(sample.metrics().map(|(_, value)| value.to_string()));
        self.writer.write_record(record)?;
        self.rows += 1;

        Ok(())
    }

    /// Rows written so far, headers excluded
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush buffered output
    pub fn finish(mut self) -> OutputResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testutil::{chunk_payload, signed, varints, DocBuilder};
    use crate::decode::Chunk;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn chunk(reference: DocBuilder, metrics: u32, deltas: u32, stream: &[u8]) -> Arc<Chunk> {
        let payload = chunk_payload(&reference.build(), metrics, deltas, stream);
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        Arc::new(Chunk::decode(&payload, ts).unwrap())
    }

    fn encode(samples: &[Sample]) -> String {
        let mut buf = Vec::new();
        {
            let mut encoder = CsvEncoder::new(&mut buf);
            for sample in samples {
                encoder.write_sample(sample).unwrap();
            }
            encoder.finish().unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_header_and_rows() {
        let chunk = chunk(
            DocBuilder::new().int32("a", 1).double("b", 0.5),
            2,
            1,
            &varints(&[signed(1), 0, 0]),
        );
        let out = encode(&[Sample::new(chunk.clone(), 0), Sample::new(chunk.clone(), 1)]);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,a,b");
        assert!(lines[1].ends_with(",1,0.5"));
        assert!(lines[2].ends_with(",2,0.5"));
    }

    #[test]
    fn test_header_reemitted_on_schema_change() {
        let first = chunk(DocBuilder::new().int32("a", 1), 1, 0, &[]);
        let second = chunk(DocBuilder::new().int32("z", 9), 1, 0, &[]);
        let out = encode(&[Sample::new(first, 0), Sample::new(second, 0)]);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "timestamp,a");
        assert_eq!(lines[2], "timestamp,z");
    }

    #[test]
    fn test_timestamps_are_utc_rfc3339() {
        let chunk = chunk(DocBuilder::new().int32("a", 1), 1, 0, &[]);
        let out = encode(&[Sample::new(chunk, 0)]);

        let row = out.lines().nth(1).unwrap();
        assert!(row.starts_with("2023-11-14T22:13:20.000Z"));
    }
}
