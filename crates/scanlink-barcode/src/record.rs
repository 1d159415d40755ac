//! Scan records and batch serialization.

use serde::{Deserialize, Serialize};

use crate::{BarcodeError, BarcodeFormat, BarcodeResult};

fn barcode_kind() -> String {
    "barcode".to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single decoded scan as it travels on the wire.
///
/// Serializes to `{type:"barcode", data, format, timestamp}`, the shape
/// the desktop receiver consumes for both single and batched items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Payload discriminator; always `"barcode"`.
    #[serde(rename = "type", default = "barcode_kind")]
    pub kind: String,
    /// Decoded barcode content (hex-armored zlib when `compressed`).
    pub data: String,
    /// Symbology of the scan.
    pub format: BarcodeFormat,
    /// Capture time, epoch seconds.
    pub timestamp: f64,
    /// True when `data` carries compressed bytes.
    #[serde(default, skip_serializing_if = "is_false")]
    pub compressed: bool,
}

impl ScanRecord {
    /// Create an uncompressed record.
    pub fn new(data: impl Into<String>, format: BarcodeFormat, timestamp: f64) -> Self {
        ScanRecord {
            kind: barcode_kind(),
            data: data.into(),
            format,
            timestamp,
            compressed: false,
        }
    }
}

/// Serialize a batch of scan records to JSON bytes.
pub fn serialize_records(records: &[ScanRecord]) -> BarcodeResult<Vec<u8>> {
    serde_json::to_vec(records).map_err(|e| BarcodeError::Serialization(e.to_string()))
}

/// Deserialize a batch of scan records from JSON bytes.
pub fn deserialize_records(bytes: &[u8]) -> BarcodeResult<Vec<ScanRecord>> {
    serde_json::from_slice(bytes).map_err(|e| BarcodeError::Serialization(e.to_string()))
}
