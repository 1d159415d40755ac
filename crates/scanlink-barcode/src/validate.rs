//! Barcode validation and format detection.

use crate::{BarcodeError, BarcodeFormat, BarcodeResult};

/// Maximum QR payload size in bytes (version 40, binary mode).
pub const MAX_QR_LEN: usize = 4296;

/// Code 128 length bounds.
pub const CODE128_MIN_LEN: usize = 2;
pub const CODE128_MAX_LEN: usize = 80;

/// Content longer than this is assumed to come from a QR symbol when no
/// linear format matches.
const QR_LENGTH_HINT: usize = 20;

/// Check whether `barcode` satisfies the rules of `format`.
pub fn validate(barcode: &str, format: BarcodeFormat) -> bool {
    match format {
        BarcodeFormat::Code128 => {
            (CODE128_MIN_LEN..=CODE128_MAX_LEN).contains(&barcode.len())
                && barcode.bytes().all(is_printable_ascii)
        }
        BarcodeFormat::Code39 => !barcode.is_empty() && barcode.bytes().all(is_code39_char),
        BarcodeFormat::Ean13 => digits_with_valid_check(barcode, 13),
        BarcodeFormat::Ean8 | BarcodeFormat::UpcE => digits_with_valid_check(barcode, 8),
        BarcodeFormat::Qr => !barcode.is_empty() && barcode.len() <= MAX_QR_LEN,
        BarcodeFormat::Unknown => !barcode.is_empty(),
    }
}

/// Like [`validate`], but explains what rule was violated.
pub fn check(barcode: &str, format: BarcodeFormat) -> BarcodeResult<()> {
    if validate(barcode, format) {
        return Ok(());
    }
    let reason = match format {
        BarcodeFormat::Code128 => format!(
            "expected {CODE128_MIN_LEN}-{CODE128_MAX_LEN} printable ASCII characters, got {} bytes",
            barcode.len()
        ),
        BarcodeFormat::Code39 => "contains characters outside [A-Z0-9-. $/+%]".to_string(),
        BarcodeFormat::Ean13 => digit_failure_reason(barcode, 13),
        BarcodeFormat::Ean8 | BarcodeFormat::UpcE => digit_failure_reason(barcode, 8),
        BarcodeFormat::Qr => format!("expected 1-{MAX_QR_LEN} bytes, got {}", barcode.len()),
        BarcodeFormat::Unknown => "empty barcode".to_string(),
    };
    Err(BarcodeError::InvalidBarcode {
        format: format.wire_name().to_string(),
        reason,
    })
}

fn digit_failure_reason(barcode: &str, len: usize) -> String {
    if barcode.len() != len {
        format!("expected {len} digits, got {} characters", barcode.len())
    } else if !barcode.bytes().all(|b| b.is_ascii_digit()) {
        "contains non-digit characters".to_string()
    } else {
        "check digit mismatch".to_string()
    }
}

fn is_printable_ascii(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

fn is_code39_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b' ' | b'$' | b'/' | b'+' | b'%')
}

fn digits_with_valid_check(barcode: &str, len: usize) -> bool {
    barcode.len() == len
        && barcode.bytes().all(|b| b.is_ascii_digit())
        && has_valid_check_digit(barcode)
}

/// EAN/UPC mod-10 check.
///
/// The last digit is the check digit. Starting from the rightmost
/// remaining digit, weights alternate 3, 1 moving left; the expected
/// check digit is `(10 - (sum mod 10)) mod 10`.
pub fn has_valid_check_digit(digits: &str) -> bool {
    if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let bytes = digits.as_bytes();
    let check = u32::from(bytes[bytes.len() - 1] - b'0');
    let mut sum = 0u32;
    for (i, &b) in bytes[..bytes.len() - 1].iter().rev().enumerate() {
        let digit = u32::from(b - b'0');
        let weight = if i % 2 == 0 { 3 } else { 1 };
        sum += digit * weight;
    }
    (10 - (sum % 10)) % 10 == check
}

/// Classify a raw decoded string into the most specific format.
///
/// Priority: EAN-13, EAN-8, UPC-E (check-digit validity), then the
/// CODE39 character class, then CODE128 as a printable-ASCII catch-all,
/// then QR for long content, then Unknown.
pub fn detect_format(barcode: &str) -> BarcodeFormat {
    if validate(barcode, BarcodeFormat::Ean13) {
        return BarcodeFormat::Ean13;
    }
    if validate(barcode, BarcodeFormat::Ean8) {
        return BarcodeFormat::Ean8;
    }
    if validate(barcode, BarcodeFormat::UpcE) {
        return BarcodeFormat::UpcE;
    }
    if validate(barcode, BarcodeFormat::Code39) {
        return BarcodeFormat::Code39;
    }
    if validate(barcode, BarcodeFormat::Code128) {
        return BarcodeFormat::Code128;
    }
    if barcode.len() > QR_LENGTH_HINT && barcode.len() <= MAX_QR_LEN {
        return BarcodeFormat::Qr;
    }
    BarcodeFormat::Unknown
}
