//! Payload compression.
//!
//! Payloads are compressed with zlib. Because the wire format is JSON,
//! compressed bytes travel hex-armored; [`pack_content`] and
//! [`unpack_content`] handle the combined transform.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::warn;

use crate::{BarcodeError, BarcodeResult};

/// Compress bytes with zlib at the default level.
pub fn compress(bytes: &[u8]) -> BarcodeResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| BarcodeError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| BarcodeError::Compression(e.to_string()))
}

/// Decompress zlib bytes.
///
/// Truncated or corrupt input is an error; callers that prefer the
/// legacy pass-through behavior use [`unpack_content`].
pub fn decompress(bytes: &[u8]) -> BarcodeResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BarcodeError::Decompression(e.to_string()))?;
    Ok(out)
}

/// Prepare payload content for a JSON message.
///
/// Returns the content string and whether it is compressed. When
/// `compress_payload` is set, the content is zlib-compressed and
/// hex-armored.
pub fn pack_content(data: &str, compress_payload: bool) -> BarcodeResult<(String, bool)> {
    if !compress_payload {
        return Ok((data.to_string(), false));
    }
    let packed = compress(data.as_bytes())?;
    Ok((hex::encode(packed), true))
}

/// Reverse of [`pack_content`].
///
/// Content marked compressed that fails to decode is returned unchanged
/// with a warning, so a corrupt payload never aborts a receive path.
pub fn unpack_content(data: &str, compressed: bool) -> String {
    if !compressed {
        return data.to_string();
    }
    let bytes = match hex::decode(data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "compressed payload is not valid hex, passing through");
            return data.to_string();
        }
    };
    match decompress(&bytes).map(String::from_utf8) {
        Ok(Ok(plain)) => plain,
        Ok(Err(e)) => {
            warn!(error = %e, "decompressed payload is not UTF-8, passing through");
            data.to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to decompress payload, passing through");
            data.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_round_trip() {
        let input = b"0123456789".repeat(100);
        let packed = compress(&input).expect("compress");
        assert!(packed.len() < input.len());
        let unpacked = decompress(&packed).expect("decompress");
        assert_eq!(unpacked, input);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let err = decompress(b"definitely not zlib").expect_err("corrupt input");
        assert!(matches!(err, BarcodeError::Decompression(_)));
    }

    #[test]
    fn test_pack_content_plain() {
        let (content, compressed) = pack_content("9780201896831", false).expect("pack");
        assert_eq!(content, "9780201896831");
        assert!(!compressed);
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let (content, compressed) = pack_content("9780201896831", true).expect("pack");
        assert!(compressed);
        assert_ne!(content, "9780201896831");
        assert_eq!(unpack_content(&content, true), "9780201896831");
    }

    #[test]
    fn test_unpack_corrupt_passes_through() {
        assert_eq!(unpack_content("not hex!", true), "not hex!");
        // Valid hex, but not zlib
        assert_eq!(unpack_content("deadbeef", true), "deadbeef");
    }
}
