//! Protocol constants and default tuning values.

use std::time::Duration;

/// Protocol revision advertised in the handshake capabilities.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default time a pending request may wait for an acknowledgment.
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between pending-request timeout sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Largest single wire message accepted.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;

/// Largest accumulated stream buffer before buffered bytes are dropped.
pub const MAX_STREAM_BUFFER: usize = 64 * 1024;

/// Capabilities advertised by default in the handshake.
pub const DEFAULT_CAPABILITIES: &[&str] = &["barcode", "batch", "compression"];
