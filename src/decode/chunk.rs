//! Chunk decoder
//!
//! A metric chunk is the binary payload of a type=1 framing document.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ uncompressed_size: u32 LE               │
//! ├─────────────────────────────────────────┤
//! │ zlib stream, inflating to:              │
//! │   reference document (BSON)             │
//! │   metrics_count: u32 LE                 │
//! │   deltas_count: u32 LE                  │
//! │   delta stream (varint + zero RLE)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The delta stream stores one column of `deltas_count` deltas per metric,
//! metric-major. A zero delta is followed by a varint run length of
//! ADDITIONAL zeros, and the remaining balance of a run carries over into
//! the next metric's column. Values accumulate with wrapping 64-bit
//! addition so Double bit patterns may overflow freely.

use std::io::{Cursor, Read};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use flate2::read::ZlibDecoder;
use serde::Serialize;

use crate::decode::bson::Document;
use crate::decode::error::{DecodeError, DecodeResult};
use crate::decode::flatten::{flatten, Metric, MetricType};
use crate::decode::varint::read_varint;

/// A consumer-facing metric value with its original type restored
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Double(f64),
    Int32(i32),
    Int64(i64),
    /// Milliseconds since the Unix epoch
    DateMillis(i64),
    Bool(bool),
    TimestampSeconds(u32),
    TimestampIncrement(u32),
}

impl MetricValue {
    fn restore(kind: MetricType, raw: u64) -> MetricValue {
        match kind {
            // The unsigned view is reinterpreted directly; going through a
            // signed integer is not guaranteed bit-preserving everywhere.
            MetricType::Double => MetricValue::Double(f64::from_bits(raw)),
            MetricType::Int32 => MetricValue::Int32(raw as u32 as i32),
            MetricType::Int64 => MetricValue::Int64(raw as i64),
            MetricType::DateMillis => MetricValue::DateMillis(raw as i64),
            MetricType::Bool => MetricValue::Bool(raw != 0),
            MetricType::TimestampSeconds => MetricValue::TimestampSeconds(raw as u32),
            MetricType::TimestampIncrement => MetricValue::TimestampIncrement(raw as u32),
        }
    }

    /// Lossy numeric view, for tabular output
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Double(v) => v,
            MetricValue::Int32(v) => v as f64,
            MetricValue::Int64(v) => v as f64,
            MetricValue::DateMillis(v) => v as f64,
            MetricValue::Bool(v) => v as u8 as f64,
            MetricValue::TimestampSeconds(v) => v as f64,
            MetricValue::TimestampIncrement(v) => v as f64,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MetricValue::Double(v) => write!(f, "{}", v),
            MetricValue::Int32(v) => write!(f, "{}", v),
            MetricValue::Int64(v) => write!(f, "{}", v),
            MetricValue::DateMillis(v) => write!(f, "{}", v),
            MetricValue::Bool(v) => write!(f, "{}", v as u8),
            MetricValue::TimestampSeconds(v) => write!(f, "{}", v),
            MetricValue::TimestampIncrement(v) => write!(f, "{}", v),
        }
    }
}

/// A decoded metric chunk: schema, initial values and the full value matrix
#[derive(Debug)]
pub struct Chunk {
    timestamp: DateTime<Utc>,
    metrics: Vec<Metric>,
    /// Row-major [metric][sample], metrics.len() * samples entries
    values: Vec<u64>,
    samples: usize,
    /// Index of the top-level `start` metric, if the schema has one
    start_index: Option<usize>,
}

impl Chunk {
    /// Decode a chunk payload.
    ///
    /// `timestamp` is inherited from the framing document and used as a
    /// fallback timebase when the schema carries no `start` metric.
    pub fn decode(payload: &[u8], timestamp: DateTime<Utc>) -> DecodeResult<Chunk> {
        let inflated = inflate(payload)?;
        let header = split_header(&inflated)?;

        let metrics = flatten(&header.reference);
        if metrics.len() != header.metrics_count {
            return Err(DecodeError::SchemaMismatch {
                expected: header.metrics_count,
                actual: metrics.len(),
            });
        }

        let samples = header.deltas_count + 1;
        let mut values = vec![0u64; metrics.len() * samples];
        for (m, metric) in metrics.iter().enumerate() {
            values[m * samples] = metric.value;
        }

        let mut cursor = Cursor::new(header.delta_stream);
        // One zero-run balance for the whole chunk; a run started near the
        // end of one metric's column spills into the next metric's column.
        let mut nzeros: u64 = 0;

        for m in 0..metrics.len() {
            let row = m * samples;
            for s in 1..samples {
                let delta = if nzeros > 0 {
                    nzeros -= 1;
                    0
                } else {
                    let raw = read_varint(&mut cursor)?;
                    if raw == 0 {
                        nzeros = read_varint(&mut cursor)?;
                    }
                    raw
                };
                values[row + s] = values[row + s - 1].wrapping_add(delta);
            }
        }

        // An outstanding zero-run balance accounts for unconsumed bytes;
        // only a dead cursor with no balance left is an encoding error.
        let consumed = cursor.position() as usize;
        if consumed < header.delta_stream.len() && nzeros == 0 {
            return Err(DecodeError::TrailingBytes(
                header.delta_stream.len() - consumed,
            ));
        }

        let start_index = metrics
            .iter()
            .position(|m| m.path == "start" && m.kind == MetricType::DateMillis);

        tracing::debug!(
            metrics = metrics.len(),
            samples,
            "decoded chunk at {}",
            timestamp
        );

        Ok(Chunk {
            timestamp,
            metrics,
            values,
            samples,
            start_index,
        })
    }

    /// Framing-document timestamp of this chunk
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Number of metrics (columns of the schema)
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Number of samples, reference included
    pub fn sample_count(&self) -> usize {
        self.samples
    }

    /// Metric descriptors in flattener order
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Metric paths in flattener order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.path.as_str())
    }

    fn raw(&self, metric: usize, sample: usize) -> u64 {
        self.values[metric * self.samples + sample]
    }

    /// Value at (metric, sample) with its original type restored
    pub fn value(&self, metric: usize, sample: usize) -> MetricValue {
        MetricValue::restore(self.metrics[metric].kind, self.raw(metric, sample))
    }

    /// Timestamp of one sample: the `start` column when the schema has
    /// one, otherwise the chunk timestamp offset by the sample index.
    pub fn sample_timestamp(&self, sample: usize) -> DateTime<Utc> {
        let fallback = || self.timestamp + Duration::seconds(sample as i64);
        match self.start_index {
            Some(idx) => {
                let millis = self.raw(idx, sample) as i64;
                Utc.timestamp_millis_opt(millis).single().unwrap_or_else(fallback)
            }
            None => fallback(),
        }
    }

}

/// A single observation: one column of the chunk matrix.
///
/// Samples are materialized on demand and share the chunk's schema and
/// matrix; cloning one is cheap.
#[derive(Debug, Clone)]
pub struct Sample {
    chunk: Arc<Chunk>,
    index: usize,
    /// Metric indices exposed to the consumer; None means all. Filtered
    /// metrics still occupied their columns during decode.
    visible: Option<Arc<Vec<usize>>>,
}

impl Sample {
    /// Materialize one sample of a chunk. The chunk is shared, not copied.
    pub fn new(chunk: Arc<Chunk>, index: usize) -> Sample {
        debug_assert!(index < chunk.sample_count());
        Sample {
            chunk,
            index,
            visible: None,
        }
    }

    /// Restrict the sample to a pre-computed set of metric indices
    pub(crate) fn with_visible(mut self, visible: Arc<Vec<usize>>) -> Sample {
        self.visible = Some(visible);
        self
    }

    /// Timestamp of this observation, always UTC
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.chunk.sample_timestamp(self.index)
    }

    /// Sample index within its chunk
    pub fn index(&self) -> usize {
        self.index
    }

    /// The owning chunk
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Number of metrics exposed by this sample
    pub fn len(&self) -> usize {
        match &self.visible {
            Some(v) => v.len(),
            None => self.chunk.metric_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate (path, value) pairs in flattener order
    pub fn metrics(&self) -> SampleMetrics<'_> {
        SampleMetrics {
            sample: self,
            cursor: 0,
        }
    }

    /// First value at `path`, linear scan. Paths are not unique; positional
    /// access through [`Chunk::value`] is the unambiguous form.
    pub fn get(&self, path: &str) -> Option<MetricValue> {
        self.metrics()
            .find(|(p, _)| *p == path)
            .map(|(_, value)| value)
    }

    fn metric_index(&self, cursor: usize) -> Option<usize> {
        match &self.visible {
            Some(v) => v.get(cursor).copied(),
            None if cursor < self.chunk.metric_count() => Some(cursor),
            None => None,
        }
    }
}

/// Iterator over a sample's (path, value) pairs
pub struct SampleMetrics<'a> {
    sample: &'a Sample,
    cursor: usize,
}

impl<'a> Iterator for SampleMetrics<'a> {
    type Item = (&'a str, MetricValue);

    fn next(&mut self) -> Option<Self::Item> {
        let m = self.sample.metric_index(self.cursor)?;
        self.cursor += 1;
        let metric = &self.sample.chunk.metrics()[m];
        Some((
            metric.path.as_str(),
            self.sample.chunk.value(m, self.sample.index),
        ))
    }
}

struct ChunkHeader<'a> {
    reference: Document,
    metrics_count: usize,
    deltas_count: usize,
    delta_stream: &'a [u8],
}

/// Strip the size prefix and inflate the zlib remainder
fn inflate(payload: &[u8]) -> DecodeResult<Vec<u8>> {
    if payload.len() < 4 {
        return Err(DecodeError::Truncated);
    }
    let declared = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;

    let mut inflated = Vec::with_capacity(declared);
    let mut decoder = ZlibDecoder::new(&payload[4..]);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| DecodeError::Decompression(e.to_string()))?;

    if inflated.len() != declared {
        return Err(DecodeError::FrameSizeMismatch {
            expected: declared,
            actual: inflated.len(),
        });
    }

    Ok(inflated)
}

/// Carve the reference document and counts off the inflated buffer
fn split_header(inflated: &[u8]) -> DecodeResult<ChunkHeader<'_>> {
    if inflated.len() < 4 {
        return Err(DecodeError::Truncated);
    }
    let doc_size = u32::from_le_bytes([inflated[0], inflated[1], inflated[2], inflated[3]]) as usize;
    if doc_size < 5 || doc_size + 8 > inflated.len() {
        return Err(DecodeError::Truncated);
    }

    let reference = Document::parse(&inflated[..doc_size])?;

    let metrics_count = u32::from_le_bytes([
        inflated[doc_size],
        inflated[doc_size + 1],
        inflated[doc_size + 2],
        inflated[doc_size + 3],
    ]) as usize;
    let deltas_count = u32::from_le_bytes([
        inflated[doc_size + 4],
        inflated[doc_size + 5],
        inflated[doc_size + 6],
        inflated[doc_size + 7],
    ]) as usize;

    Ok(ChunkHeader {
        reference,
        metrics_count,
        deltas_count,
        delta_stream: &inflated[doc_size + 8..],
    })
}

/// Header-only peek: (metrics_count, deltas_count) without delta decoding.
///
/// Inflation still happens; only the flatten and delta passes are skipped.
pub(crate) fn chunk_counts(payload: &[u8]) -> DecodeResult<(usize, usize)> {
    let inflated = inflate(payload)?;
    let header = split_header(&inflated)?;
    Ok((header.metrics_count, header.deltas_count))
}
