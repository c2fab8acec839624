//! Output encoders
//!
//! Consumers of the sample stream. These sit outside the decode core and
//! only use its public surface.

pub mod csv;
pub mod json;

use thiserror::Error;

use crate::decode::DecodeError;

/// Errors that can occur while encoding output
#[derive(Error, Debug)]
pub enum OutputError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Decoding failed while draining the sample stream
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Result type alias for output operations
pub type OutputResult<T> = Result<T, OutputError>;

pub use self::csv::CsvEncoder;
pub use self::json::{document_to_json, JsonLinesEncoder};
