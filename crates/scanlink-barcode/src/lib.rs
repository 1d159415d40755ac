//! Barcode payload codec for the ScanLink companion protocol.
//!
//! This crate provides the data-integrity layer the transmission queue and
//! the wire protocol depend on:
//!
//! - **Validation**: format-specific rules for the supported symbologies,
//!   including the EAN/UPC mod-10 check digit.
//! - **Format detection**: classify a raw decoded string into the most
//!   specific format that accepts it.
//! - **Compression**: reversible zlib compression of payload bytes, with a
//!   hex-armored form suitable for embedding in JSON messages.
//! - **Scan records**: the `{type:"barcode", data, format, timestamp}`
//!   payload unit and batch (de)serialization.
//!
//! # Example
//!
//! ```rust,ignore
//! use scanlink_barcode::{detect_format, validate, BarcodeFormat};
//!
//! assert!(validate("9780201896831", BarcodeFormat::Ean13));
//! assert_eq!(detect_format("ABC-123"), BarcodeFormat::Code39);
//! ```

mod compress;
mod error;
mod format;
mod record;
mod validate;

pub use compress::*;
pub use error::*;
pub use format::*;
pub use record::*;
pub use validate::*;
