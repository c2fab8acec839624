//! Metric flattener
//!
//! Projects a BSON reference document onto an ordered list of numeric
//! metrics via depth-first traversal. The emit order and count must match
//! what the producer saw bit-for-bit: one missing or extra metric
//! desynchronizes the delta stream for the rest of the file.
//!
//! All values are carried as u64 bit patterns. Deltas are applied with
//! wrapping integer arithmetic and the original type is restored only at
//! read-out, so a Double's IEEE 754 bits survive untouched.

use crate::decode::bson::{Document, Value};

/// Origin type of a flattened metric, used to restore values at read-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// 64-bit IEEE 754, stored as its bit pattern
    Double,
    /// 32-bit signed integer, sign-extended
    Int32,
    /// 64-bit signed integer
    Int64,
    /// Boolean stored as 0/1
    Bool,
    /// Milliseconds since the Unix epoch
    DateMillis,
    /// Seconds component of an internal timestamp
    TimestampSeconds,
    /// Increment component of an internal timestamp
    TimestampIncrement,
}

/// One numeric leaf of the reference document
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Dotted path. Keys containing `.` or `/` are inserted verbatim, so
    /// the path is not reliably splittable; identity is list position.
    pub path: String,
    /// Origin type for restoration
    pub kind: MetricType,
    /// Encoded initial value (sample 0)
    pub value: u64,
}

/// Flatten a document into its ordered metric list.
///
/// Documents and arrays recurse (array indices become decimal path
/// segments); a Timestamp expands to two metrics, seconds first, then the
/// increment under a `.inc` suffix. Non-numeric types are skipped.
pub fn flatten(doc: &Document) -> Vec<Metric> {
    let mut metrics = Vec::new();
    walk(doc, "", &mut metrics);
    metrics
}

fn walk(doc: &Document, prefix: &str, out: &mut Vec<Metric>) {
    for (key, value) in doc.iter() {
        let path = join(prefix, key);
        visit(value, path, out);
    }
}

fn visit(value: &Value, path: String, out: &mut Vec<Metric>) {
    match value {
        Value::Double(d) => out.push(Metric {
            path,
            kind: MetricType::Double,
            value: d.to_bits(),
        }),
        Value::Int32(i) => out.push(Metric {
            path,
            kind: MetricType::Int32,
            value: *i as i64 as u64,
        }),
        Value::Int64(i) => out.push(Metric {
            path,
            kind: MetricType::Int64,
            value: *i as u64,
        }),
        Value::Bool(b) => out.push(Metric {
            path,
            kind: MetricType::Bool,
            value: *b as u64,
        }),
        Value::DateTime(ms) => out.push(Metric {
            path,
            kind: MetricType::DateMillis,
            value: *ms as u64,
        }),
        Value::Timestamp { seconds, increment } => {
            let inc_path = format!("{}.inc", path);
            out.push(Metric {
                path,
                kind: MetricType::TimestampSeconds,
                value: u64::from(*seconds),
            });
            out.push(Metric {
                path: inc_path,
                kind: MetricType::TimestampIncrement,
                value: u64::from(*increment),
            });
        }
        Value::Document(inner) | Value::Array(inner) => walk(inner, &path, out),
        // Strings, binary, ObjectId, regex and friends carry no metrics
        _ => {}
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}
