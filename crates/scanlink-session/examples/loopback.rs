//! Minimal in-process demo: a scanning session talking to a loopback
//! receiver that acknowledges everything it is sent.
//!
//! Run with: `cargo run -p scanlink-session --example loopback`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use scanlink_barcode::detect_format;
use scanlink_protocol::{
    DeviceInfo, HandshakeResponsePayload, Message, MessageKind, MessagePayload, StreamCodec,
};
use scanlink_session::{
    ConnectionConfig, ConnectionManager, ConnectionState, MemoryStorage, QueueConfig, Transport,
    TransportError, TransportEvent, TransmissionQueue,
};

/// A transport whose far end lives in this process and acks everything.
struct LoopbackTransport {
    events_tx: mpsc::Sender<TransportEvent>,
    codec: StreamCodec,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let _ = self.events_tx.send(TransportEvent::Attached).await;
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.codec.push(bytes);
        while let Some(frame) = self.codec.next_object() {
            let Ok(message) = Message::decode(&frame) else {
                continue;
            };
            info!(kind = ?message.kind(), id = %message.id, "receiver got message");
            let mut replies = vec![Message::ack(&message)];
            if message.kind() == MessageKind::HandshakeRequest {
                replies.push(Message::new(MessagePayload::HandshakeResponse(
                    HandshakeResponsePayload {
                        session_id: "loopback-session".to_string(),
                        device_info: DeviceInfo {
                            name: Some("loopback receiver".to_string()),
                            ..DeviceInfo::default()
                        },
                    },
                )));
            }
            for reply in replies {
                if let Ok(encoded) = reply.encode() {
                    let _ = self.events_tx.send(TransportEvent::Received(encoded)).await;
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) {}
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (events_tx, events_rx) = mpsc::channel(64);
    let transport = LoopbackTransport {
        events_tx,
        codec: StreamCodec::new(),
    };
    let manager = ConnectionManager::spawn(transport, events_rx, ConnectionConfig::default());
    let queue = TransmissionQueue::new(
        manager.clone(),
        Arc::new(MemoryStorage::new()),
        QueueConfig::default(),
    );
    queue.load().await;
    queue.start();

    manager.connect().await.expect("connection task alive");

    let mut states = manager.state_changes();
    while *states.borrow_and_update() != ConnectionState::Ready {
        states.changed().await.expect("state channel");
    }
    info!("link ready");

    for barcode in ["9780201896831", "12345670", "ABC-123", "hello world!"] {
        let format = detect_format(barcode);
        let item = queue
            .add_to_queue(barcode, format, false, serde_json::Map::new())
            .await
            .expect("valid scan");
        info!(id = %item.id, %format, %barcode, "queued");
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(remaining = queue.len().await, "queue after drain");

    manager.shutdown().await;
}
