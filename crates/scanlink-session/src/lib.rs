//! ScanLink session layer.
//!
//! This crate manages the life of one link between the scanning client and
//! its companion receiver:
//!
//! - [`ConnectionManager`] owns the connection state machine (attach,
//!   handshake, readiness, error classification) and the reconnection
//!   policy, and fans typed events out to subscribers.
//! - [`TransmissionQueue`] holds scans that could not be sent yet,
//!   persists them through the [`Storage`] collaborator, and drains them
//!   once the connection reports ready.
//!
//! The device layer is out of scope: callers hand in an opened-but-idle
//! [`Transport`] plus its event stream, and whatever storage backend the
//! platform provides.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scanlink_session::{
//!     ConnectionConfig, ConnectionManager, MemoryStorage, QueueConfig, TransmissionQueue,
//! };
//!
//! let manager = ConnectionManager::spawn(transport, events, ConnectionConfig::default());
//! let queue = TransmissionQueue::new(
//!     manager.clone(),
//!     Arc::new(MemoryStorage::new()),
//!     QueueConfig::default(),
//! );
//! queue.load().await;
//! queue.start();
//! manager.connect().await?;
//! ```

mod backoff;
mod config;
mod error;
mod events;
mod manager;
mod queue;
mod storage;
mod transport;

pub use backoff::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use manager::*;
pub use queue::*;
pub use storage::*;
pub use transport::*;
