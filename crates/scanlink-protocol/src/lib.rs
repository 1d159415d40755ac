//! ScanLink wire protocol.
//!
//! This crate implements the message layer spoken between the scanning
//! client and the companion receiver. Messages travel as JSON objects over
//! any reliable ordered byte duplex; the protocol knows nothing about the
//! transport beyond `&[u8]` in and out.
//!
//! # Protocol Overview
//!
//! Every message is one JSON object:
//!
//! ```text
//! { "type": "<KIND>", "id": "<uuid>", "timestamp": "<RFC3339>", "payload": { ... } }
//! ```
//!
//! - **Requests** (`DATA`, `BATCH_DATA`, `COMMAND`, ...) carry a fresh
//!   unique id and expect an acknowledgment.
//! - **Acknowledgments** (`ACK`/`NACK`) reference the original message id
//!   and resolve the matching pending request.
//! - **Handshake** (`HANDSHAKE_REQUEST`/`HANDSHAKE_RESPONSE`) establishes
//!   a session id and capability set before ordinary traffic.
//!
//! # Example
//!
//! ```rust,ignore
//! use scanlink_protocol::{Message, MessagePayload, MessageProtocol};
//!
//! let mut protocol = MessageProtocol::default();
//! let message = Message::new(MessagePayload::StatusRequest);
//! let (bytes, ack) = protocol.prepare_send(&message)?;
//! // write `bytes` to the transport, then:
//! let reply = ack.wait().await?;
//! ```

mod constants;
mod error;
mod message;
mod pending;
mod protocol;
mod stream;

pub use constants::*;
pub use error::*;
pub use message::*;
pub use pending::*;
pub use protocol::*;
pub use stream::*;
