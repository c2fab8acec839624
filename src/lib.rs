//! # ftdc
//!
//! A decoder for MongoDB's Full Time Diagnostic Data Capture (FTDC)
//! files: the binary, delta-compressed time-series logs a live server
//! writes into its `diagnostic.data` directory.
//!
//! ## Features
//!
//! - **Faithful decoding**: order- and duplicate-preserving BSON parsing,
//!   so the flattened schema matches the producer bit-for-bit
//! - **Streaming**: at most one decoded chunk in memory; samples are
//!   materialized lazily from the chunk matrix
//! - **Filtering**: UTC time ranges compared against sample timestamps,
//!   plus metric path predicates
//! - **Interim aware**: a live producer's partially written tail document
//!   ends iteration instead of failing it
//!
//! ## Modules
//!
//! - [`decode`]: varint, BSON, flattener and chunk decoding pipeline
//! - [`reader`]: file reader yielding a lazy sample stream
//! - [`output`]: CSV and JSON encoders over the sample stream
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ftdc::{FtdcReader, ReaderOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut reader = FtdcReader::open("metrics.2025-11-13T17-15-32Z-00000")?;
//!
//!     for sample in reader.iter_samples(ReaderOptions::new()) {
//!         let sample = sample?;
//!         if let Some(conns) = sample.get("serverStatus.connections.current") {
//!             println!("{} {}", sample.timestamp(), conns);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod decode;
pub mod output;
pub mod reader;

// Re-export top-level types for convenience
pub use decode::{
    Chunk, DecodeError, DecodeResult, Document, Metric, MetricType, MetricValue, Sample, Value,
};

pub use reader::{
    CancelToken, ChunkIter, DocumentKind, FileStats, FramingDocument, FtdcReader, ReaderOptions,
    SampleIter, SchemaChangePolicy,
};

pub use output::{CsvEncoder, JsonLinesEncoder, OutputError, OutputResult};
