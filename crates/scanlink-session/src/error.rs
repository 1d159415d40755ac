//! Session error types.

use std::fmt;

use thiserror::Error;

use scanlink_barcode::BarcodeError;
use scanlink_protocol::ProtocolError;

/// Classification of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// The operation did not finish in time.
    Timeout,
    /// The device could not be found.
    DeviceNotFound,
    /// The platform refused access to the device.
    PermissionDenied,
    /// The handshake exchange failed.
    HandshakeFailed,
    /// The device went away mid-session.
    DeviceDisconnected,
    /// Anything the transport could not classify.
    Unknown,
}

impl ConnectionErrorKind {
    /// Whether auto-reconnect can ever succeed after this failure.
    ///
    /// Permission problems need user action; retrying cannot fix them.
    pub fn reconnectable(&self) -> bool {
        !matches!(self, ConnectionErrorKind::PermissionDenied)
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionErrorKind::Timeout => "timeout",
            ConnectionErrorKind::DeviceNotFound => "device not found",
            ConnectionErrorKind::PermissionDenied => "permission denied",
            ConnectionErrorKind::HandshakeFailed => "handshake failed",
            ConnectionErrorKind::DeviceDisconnected => "device disconnected",
            ConnectionErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by transport implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The platform refused access to the device.
    #[error("permission denied by the device layer")]
    PermissionDenied,

    /// The device could not be found.
    #[error("device not found")]
    NotFound,

    /// The transport operation timed out.
    #[error("transport operation timed out")]
    Timeout,

    /// The device disconnected.
    #[error("device disconnected")]
    Disconnected,

    /// Any other I/O failure.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Map onto the connection-level classification.
    pub fn classify(&self) -> ConnectionErrorKind {
        match self {
            TransportError::PermissionDenied => ConnectionErrorKind::PermissionDenied,
            TransportError::NotFound => ConnectionErrorKind::DeviceNotFound,
            TransportError::Timeout => ConnectionErrorKind::Timeout,
            TransportError::Disconnected => ConnectionErrorKind::DeviceDisconnected,
            TransportError::Io(_) => ConnectionErrorKind::Unknown,
        }
    }
}

/// Errors from the connection handle itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The connection task has shut down.
    #[error("connection task has shut down")]
    ChannelClosed,
}

/// Errors from the acknowledged send path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not in the ready state.
    #[error("connection is not ready")]
    NotReady,

    /// The protocol layer rejected or failed the exchange.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection task has shut down.
    #[error("connection task has shut down")]
    ChannelClosed,
}

/// Errors from the transmission queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The payload failed validation or transformation.
    #[error(transparent)]
    InvalidBarcode(#[from] BarcodeError),

    /// The connection is not in the ready state.
    #[error("connection is not ready")]
    NotReady,

    /// None of the requested item ids are queued.
    #[error("no queued items matched the requested ids")]
    NoSuchItems,

    /// The send failed; queued items are untouched.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Errors from the storage collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed to read or write.
    #[error("storage I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            TransportError::PermissionDenied.classify(),
            ConnectionErrorKind::PermissionDenied
        );
        assert_eq!(
            TransportError::NotFound.classify(),
            ConnectionErrorKind::DeviceNotFound
        );
        assert_eq!(TransportError::Timeout.classify(), ConnectionErrorKind::Timeout);
        assert_eq!(
            TransportError::Disconnected.classify(),
            ConnectionErrorKind::DeviceDisconnected
        );
        assert_eq!(
            TransportError::Io("?".to_string()).classify(),
            ConnectionErrorKind::Unknown
        );
    }

    #[test]
    fn test_only_permission_denied_is_terminal() {
        assert!(!ConnectionErrorKind::PermissionDenied.reconnectable());
        assert!(ConnectionErrorKind::Timeout.reconnectable());
        assert!(ConnectionErrorKind::DeviceNotFound.reconnectable());
        assert!(ConnectionErrorKind::HandshakeFailed.reconnectable());
        assert!(ConnectionErrorKind::DeviceDisconnected.reconnectable());
        assert!(ConnectionErrorKind::Unknown.reconnectable());
    }
}
