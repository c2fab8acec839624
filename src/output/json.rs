//! JSON encoder
//!
//! Samples become JSON lines: one object per sample with a `timestamp`
//! field and a `metrics` object in flattener order. Metric objects are
//! assembled by hand rather than through a map type so duplicate paths
//! survive exactly as decoded.

use std::io::Write;

use chrono::SecondsFormat;

use crate::decode::bson::{Document, Value};
use crate::decode::Sample;
use crate::output::OutputResult;

/// Streaming JSON-lines writer over samples
pub struct JsonLinesEncoder<W: Write> {
    writer: W,
    rows: u64,
}

impl<W: Write> JsonLinesEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, rows: 0 }
    }

    /// Write one sample as a single JSON line
    pub fn write_sample(&mut self, sample: &Sample) -> OutputResult<()> {
        let timestamp = sample
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut line = String::from("{\"timestamp\":");
        line.push_str(&serde_json::to_string(&timestamp)?);
        line.push_str(",\"metrics\":{");
        for (i, (path, value)) in sample.metrics().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&serde_json::to_string(path)?);
            line.push(':');
            line.push_str(&serde_json::to_string(&value)?);
        }
        line.push_str("}}");

        writeln!(self.writer, "{}", line)?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush buffered output
    pub fn finish(mut self) -> OutputResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Project a BSON document onto a JSON value, keeping element order.
///
/// Used for metadata dumps; later duplicates of a key win, which is
/// acceptable for metadata payloads (the producer does not duplicate keys
/// there).
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in doc.iter() {
        map.insert(key.to_string(), value_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;

    match value {
        Value::Double(v) => json!(v),
        Value::String(v) => json!(v),
        Value::Document(doc) => document_to_json(doc),
        Value::Array(doc) => {
            serde_json::Value::Array(doc.iter().map(|(_, v)| value_to_json(v)).collect())
        }
        Value::Binary { subtype, data } => json!({
            "$binary": hex(data),
            "$subtype": subtype,
        }),
        Value::ObjectId(oid) => json!({ "$oid": hex(oid) }),
        Value::Bool(v) => json!(v),
        Value::DateTime(millis) => json!({ "$date": millis }),
        Value::Null => serde_json::Value::Null,
        Value::Regex { pattern, options } => json!({
            "$regex": pattern,
            "$options": options,
        }),
        Value::Int32(v) => json!(v),
        Value::Int64(v) => json!(v),
        Value::Timestamp { seconds, increment } => json!({
            "$timestamp": { "t": seconds, "i": increment }
        }),
        Value::Decimal128(bytes) => json!({ "$decimal128": hex(bytes) }),
        Value::MinKey => json!({ "$minKey": 1 }),
        Value::MaxKey => json!({ "$maxKey": 1 }),
        Value::JavaScript(code) => json!({ "$code": code }),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
