//! Extraction of JSON objects from a raw byte stream.
//!
//! The transport delivers arbitrary chunks with no framing of its own;
//! message boundaries are the braces of complete top-level JSON objects.
//! The codec scans for balanced braces, tracking strings and escapes so
//! embedded braces cannot desynchronize the scan, and discards any
//! garbage between objects.

use bytes::{Buf, BytesMut};

use crate::constants::{MAX_MESSAGE_SIZE, MAX_STREAM_BUFFER};

/// A codec for extracting JSON message frames from a byte stream.
#[derive(Debug, Default)]
pub struct StreamCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl StreamCodec {
    /// Create a new stream codec.
    pub fn new() -> Self {
        StreamCodec {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.discard_leading_garbage();
        if self.buffer.len() > MAX_STREAM_BUFFER {
            // No object boundary within bounds; the stream is hopeless.
            self.buffer.clear();
        }
    }

    /// Try to extract the next complete JSON object.
    ///
    /// Returns `Some(frame)` if a complete object is available, or `None`
    /// if more data is needed.
    pub fn next_object(&mut self) -> Option<Vec<u8>> {
        self.discard_leading_garbage();

        let mut depth: usize = 0;
        let mut in_string = false;
        let mut escaped = false;
        for i in 0..self.buffer.len() {
            let b = self.buffer[i];
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let frame = self.buffer.split_to(i + 1).to_vec();
                        return Some(frame);
                    }
                }
                _ => {}
            }
        }

        // An unterminated object past the message bound never completes.
        if self.buffer.len() > MAX_MESSAGE_SIZE {
            self.buffer.clear();
        }
        None
    }

    fn discard_leading_garbage(&mut self) {
        while !self.buffer.is_empty() && self.buffer[0] != b'{' {
            self.buffer.advance(1);
        }
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
