//! Decoder error types
//!
//! Defines all errors that can occur while decoding an FTDC file.

use thiserror::Error;

/// Errors that can occur in the decode pipeline
#[derive(Error, Debug)]
pub enum DecodeError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Byte source ended in the middle of a structure
    #[error("truncated input: byte source ended mid-structure")]
    Truncated,

    /// Byte source ended at a document boundary mid-file.
    ///
    /// Raised for interim files still being written by a live producer.
    /// Non-fatal at the reader boundary: samples decoded so far are valid.
    #[error("file ends with a partially written document")]
    TruncatedInterim,

    /// BSON length or structural invariant violated
    #[error("malformed BSON: {0}")]
    MalformedBson(String),

    /// The `type` field of a framing document is not 0, 1 or 2
    #[error("unknown document type: {0}")]
    UnknownDocumentType(i32),

    /// Declared uncompressed size does not match the inflated size
    #[error("frame size mismatch: declared {expected}, inflated {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    /// zlib inflate reported an error
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Varint exceeded the 10-byte maximum encoding of a 64-bit value
    #[error("varint too long: exceeds 10 bytes")]
    VarintOverflow,

    /// Flattened reference document length differs from the chunk header
    #[error("schema mismatch: header says {expected} metrics, flattened {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// Delta stream had bytes left after all expected deltas were decoded
    #[error("delta stream has {0} trailing bytes")]
    TrailingBytes(usize),

    /// Externally requested stop
    #[error("decoding cancelled")]
    Cancelled,
}

/// Result type alias for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::SchemaMismatch {
            expected: 10,
            actual: 9,
        };
        assert_eq!(
            err.to_string(),
            "schema mismatch: header says 10 metrics, flattened 9"
        );

        let err = DecodeError::UnknownDocumentType(7);
        assert_eq!(err.to_string(), "unknown document type: 7");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DecodeError = io_err.into();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
