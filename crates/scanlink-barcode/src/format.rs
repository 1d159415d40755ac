//! Barcode format identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Barcode symbologies understood by the codec.
///
/// The serde representation matches the wire names used in message
/// payloads (`CODE128`, `EAN13`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarcodeFormat {
    /// Code 128: printable ASCII, 2 to 80 characters.
    #[serde(rename = "CODE128")]
    Code128,
    /// Code 39: uppercase letters, digits, and `-. $/+%`.
    #[serde(rename = "CODE39")]
    Code39,
    /// EAN-13: 13 digits with a mod-10 check digit.
    #[serde(rename = "EAN13")]
    Ean13,
    /// EAN-8: 8 digits with a mod-10 check digit.
    #[serde(rename = "EAN8")]
    Ean8,
    /// UPC-E: 8 digits with a mod-10 check digit.
    #[serde(rename = "UPCE")]
    UpcE,
    /// QR code: arbitrary content up to the symbol capacity.
    #[serde(rename = "QR")]
    Qr,
    /// Anything the scanner could not classify.
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl BarcodeFormat {
    /// The name used in wire payloads and persisted records.
    pub fn wire_name(&self) -> &'static str {
        match self {
            BarcodeFormat::Code128 => "CODE128",
            BarcodeFormat::Code39 => "CODE39",
            BarcodeFormat::Ean13 => "EAN13",
            BarcodeFormat::Ean8 => "EAN8",
            BarcodeFormat::UpcE => "UPCE",
            BarcodeFormat::Qr => "QR",
            BarcodeFormat::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BarcodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for BarcodeFormat {
    type Err = ();

    /// Parse a wire name. Case-insensitive; unrecognized names map to
    /// [`BarcodeFormat::Unknown`] rather than failing, since peers may
    /// report formats this build does not know.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_ascii_uppercase().as_str() {
            "CODE128" => BarcodeFormat::Code128,
            "CODE39" => BarcodeFormat::Code39,
            "EAN13" => BarcodeFormat::Ean13,
            "EAN8" => BarcodeFormat::Ean8,
            "UPCE" => BarcodeFormat::UpcE,
            "QR" => BarcodeFormat::Qr,
            _ => BarcodeFormat::Unknown,
        };
        Ok(format)
    }
}
