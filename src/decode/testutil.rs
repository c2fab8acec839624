//! Fixture builders for decoder tests.
//!
//! A minimal BSON encoder plus chunk assembly helpers. Producing FTDC is
//! not part of the crate's surface; this exists so tests can construct
//! byte-exact inputs without a BSON dependency.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::decode::varint::write_varint;

/// Builds a BSON document byte-by-byte, in insertion order.
///
/// Duplicate keys are written as given, which is the whole point.
#[derive(Default)]
pub struct DocBuilder {
    body: Vec<u8>,
}

impl DocBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn element(mut self, type_byte: u8, key: &str) -> Self {
        self.body.push(type_byte);
        self.body.extend_from_slice(key.as_bytes());
        self.body.push(0x00);
        self
    }

    pub fn double(self, key: &str, value: f64) -> Self {
        let mut b = self.element(0x01, key);
        b.body.extend_from_slice(&value.to_bits().to_le_bytes());
        b
    }

    pub fn string(self, key: &str, value: &str) -> Self {
        let mut b = self.element(0x02, key);
        let len = (value.len() + 1) as i32;
        b.body.extend_from_slice(&len.to_le_bytes());
        b.body.extend_from_slice(value.as_bytes());
        b.body.push(0x00);
        b
    }

    pub fn document(self, key: &str, inner: DocBuilder) -> Self {
        let mut b = self.element(0x03, key);
        b.body.extend_from_slice(&inner.build());
        b
    }

    pub fn array(self, key: &str, inner: DocBuilder) -> Self {
        let mut b = self.element(0x04, key);
        b.body.extend_from_slice(&inner.build());
        b
    }

    pub fn binary(self, key: &str, subtype: u8, data: &[u8]) -> Self {
        let mut b = self.element(0x05, key);
        b.body.extend_from_slice(&(data.len() as i32).to_le_bytes());
        b.body.push(subtype);
        b.body.extend_from_slice(data);
        b
    }

    pub fn object_id(self, key: &str, oid: [u8; 12]) -> Self {
        let mut b = self.element(0x07, key);
        b.body.extend_from_slice(&oid);
        b
    }

    pub fn bool(self, key: &str, value: bool) -> Self {
        let mut b = self.element(0x08, key);
        b.body.push(value as u8);
        b
    }

    pub fn date(self, key: &str, millis: i64) -> Self {
        let mut b = self.element(0x09, key);
        b.body.extend_from_slice(&millis.to_le_bytes());
        b
    }

    pub fn null(self, key: &str) -> Self {
        self.element(0x0A, key)
    }

    pub fn int32(self, key: &str, value: i32) -> Self {
        let mut b = self.element(0x10, key);
        b.body.extend_from_slice(&value.to_le_bytes());
        b
    }

    /// Wire order: increment first, then seconds
    pub fn timestamp(self, key: &str, seconds: u32, increment: u32) -> Self {
        let mut b = self.element(0x11, key);
        b.body.extend_from_slice(&increment.to_le_bytes());
        b.body.extend_from_slice(&seconds.to_le_bytes());
        b
    }

    pub fn int64(self, key: &str, value: i64) -> Self {
        let mut b = self.element(0x12, key);
        b.body.extend_from_slice(&value.to_le_bytes());
        b
    }

    pub fn build(&self) -> Vec<u8> {
        let size = (self.body.len() + 5) as i32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&self.body);
        out.push(0x00);
        out
    }
}

/// Encode a sequence of raw u64 varints
pub fn varints(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in values {
        write_varint(v, &mut out);
    }
    out
}

/// Two's-complement view of a signed delta for varint encoding
pub fn signed(value: i64) -> u64 {
    value as u64
}

/// Assemble a compressed chunk payload: reference document, the two u32
/// counts, the delta stream, zlib-compressed behind the 4-byte size prefix.
pub fn chunk_payload(
    reference: &[u8],
    metrics_count: u32,
    deltas_count: u32,
    delta_stream: &[u8],
) -> Vec<u8> {
    let mut uncompressed = Vec::new();
    uncompressed.extend_from_slice(reference);
    uncompressed.extend_from_slice(&metrics_count.to_le_bytes());
    uncompressed.extend_from_slice(&deltas_count.to_le_bytes());
    uncompressed.extend_from_slice(delta_stream);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&uncompressed).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut out = Vec::with_capacity(4 + compressed.len());
    out.extend_from_slice(&(uncompressed.len() as u32).to_le_bytes());
    out.extend_from_slice(&compressed);
    out
}

/// A type=1 framing document wrapping a chunk payload
pub fn chunk_document(timestamp_ms: i64, payload: &[u8]) -> Vec<u8> {
    DocBuilder::new()
        .date("_id", timestamp_ms)
        .int32("type", 1)
        .binary("data", 0, payload)
        .build()
}

/// A type=0 framing document carrying a metadata payload
pub fn metadata_document(timestamp_ms: i64, doc: DocBuilder) -> Vec<u8> {
    DocBuilder::new()
        .date("_id", timestamp_ms)
        .int32("type", 0)
        .document("doc", doc)
        .build()
}
