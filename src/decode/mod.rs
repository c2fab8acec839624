//! Core decode pipeline
//!
//! Leaves first: varint codec, order-preserving BSON reader, metric
//! flattener, then the chunk decoder that ties them together. The file
//! reader in [`crate::reader`] drives this pipeline one chunk at a time.

pub mod bson;
pub mod chunk;
pub mod error;
pub mod flatten;
pub mod varint;

#[cfg(test)]
pub(crate) mod testutil;

pub use bson::{Document, Value};
pub use chunk::{Chunk, MetricValue, Sample, SampleMetrics};
pub use error::{DecodeError, DecodeResult};
pub use flatten::{flatten, Metric, MetricType};
pub use varint::{read_varint, write_varint};
