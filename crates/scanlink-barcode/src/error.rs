//! Error types for the barcode codec.

use thiserror::Error;

/// Errors that can occur when validating or transforming barcode payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BarcodeError {
    /// The barcode does not satisfy the rules of its claimed format.
    #[error("invalid {format} barcode: {reason}")]
    InvalidBarcode {
        /// Wire name of the claimed format.
        format: String,
        /// What rule was violated.
        reason: String,
    },

    /// Compression failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Decompression failed (truncated or corrupt input).
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Record (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for codec operations.
pub type BarcodeResult<T> = Result<T, BarcodeError>;
