//! Transport abstraction handed in by the device layer.
//!
//! The session never touches the platform directly. The excluded device
//! layer (USB discovery, permissions, port opening) hands in two halves:
//! a [`Transport`] for outbound operations, and an event stream carrying
//! attach/detach/receive/error signals.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::TransportError;

/// Signals emitted by the device layer alongside the byte channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The device is attached and the channel is open.
    Attached,
    /// The device went away.
    Detached,
    /// Bytes arrived from the peer.
    Received(Vec<u8>),
    /// The transport failed.
    Error(TransportError),
}

/// Receiver half of the transport event stream.
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// A reliable ordered byte duplex.
///
/// Implementations wrap whatever the platform provides: USB serial, a TCP
/// socket, an in-process loopback for tests. Attachment is reported
/// through the event stream, not the `open` return value, mirroring
/// hotplug-style device layers.
#[async_trait]
pub trait Transport: Send {
    /// Start opening the channel. Errors here are classified into the
    /// connection error taxonomy (permission denied, not found, ...).
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Write bytes to the peer.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Close the channel. Best-effort; never fails the caller.
    async fn close(&mut self);
}
