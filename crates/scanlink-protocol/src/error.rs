//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the wire protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame could not be decoded into a message.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// The peer rejected the message.
    #[error("peer rejected message: {0}")]
    Nack(String),

    /// No acknowledgment arrived within the message timeout.
    #[error("timed out waiting for acknowledgment")]
    Timeout,

    /// The session was reset while the request was in flight.
    #[error("connection reset while request was in flight")]
    ConnectionReset,

    /// The transport write failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A request with this id is already awaiting acknowledgment.
    #[error("a request with id {0} is already pending")]
    DuplicateId(String),

    /// The handshake was acknowledged but never answered.
    #[error("handshake did not complete")]
    HandshakeIncomplete,
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
