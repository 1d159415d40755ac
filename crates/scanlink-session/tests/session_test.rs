//! End-to-end session tests over an in-memory transport.
//!
//! The tests play the companion receiver: they read frames the session
//! writes, answer with acks/nacks/handshake responses, and inject
//! attach/detach/error signals through the transport event stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Map;
use tokio::sync::mpsc;

use scanlink_barcode::BarcodeFormat;
use scanlink_protocol::{
    CommandPayload, DeviceInfo, HandshakeResponsePayload, Message, MessageKind, MessagePayload,
    ProtocolError, StreamCodec,
};
use scanlink_session::{
    ConnectionConfig, ConnectionErrorKind, ConnectionEvent, ConnectionManager, ConnectionState,
    EventKind, MemoryStorage, QueueConfig, SendError, Storage, Transport, TransmissionQueue,
    TransportError, TransportEvent,
};

// ============================================================================
// Test Harness
// ============================================================================

/// Transport half backed by channels; the test plays the peer.
struct TestTransport {
    events_tx: mpsc::Sender<TransportEvent>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Scripted outcomes for successive `open` calls; exhausted entries
    /// default to success.
    open_results: Arc<StdMutex<VecDeque<Result<(), TransportError>>>>,
    attach_on_open: bool,
    open_count: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Transport for TestTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.open_results.lock().expect("lock").pop_front();
        if let Some(result) = scripted {
            result?;
        }
        if self.attach_on_open {
            let _ = self.events_tx.send(TransportEvent::Attached).await;
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbound_tx
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    async fn close(&mut self) {}
}

/// The receiver side of the link, driven by the test body.
struct Peer {
    events_tx: mpsc::Sender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    codec: StreamCodec,
}

impl Peer {
    async fn next_message(&mut self) -> Message {
        loop {
            if let Some(frame) = self.codec.next_object() {
                return Message::decode(&frame).expect("decode outbound frame");
            }
            let chunk = tokio::time::timeout(Duration::from_secs(2), self.outbound_rx.recv())
                .await
                .expect("timed out waiting for an outbound frame")
                .expect("transport dropped");
            self.codec.push(&chunk);
        }
    }

    async fn expect_silence(&mut self, window: Duration) {
        assert!(self.codec.next_object().is_none(), "unexpected buffered frame");
        let got = tokio::time::timeout(window, self.outbound_rx.recv()).await;
        assert!(got.is_err(), "expected no outbound traffic, got a frame");
    }

    async fn inject(&self, message: &Message) {
        let bytes = message.encode().expect("encode injected message");
        self.events_tx
            .send(TransportEvent::Received(bytes))
            .await
            .expect("inject");
    }

    async fn ack(&self, original: &Message) {
        self.inject(&Message::ack(original)).await;
    }

    async fn nack(&self, original: &Message, error: &str) {
        self.inject(&Message::nack(original, error)).await;
    }

    async fn complete_handshake(&mut self, session_id: &str) {
        let request = self.next_message().await;
        assert_eq!(request.kind(), MessageKind::HandshakeRequest);
        self.ack(&request).await;
        self.inject(&Message::new(MessagePayload::HandshakeResponse(
            HandshakeResponsePayload {
                session_id: session_id.to_string(),
                device_info: DeviceInfo::default(),
            },
        )))
        .await;
    }

    async fn detach(&self) {
        self.events_tx
            .send(TransportEvent::Detached)
            .await
            .expect("detach");
    }

    async fn error(&self, error: TransportError) {
        self.events_tx
            .send(TransportEvent::Error(error))
            .await
            .expect("error");
    }
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_millis(200),
        message_timeout: Duration::from_millis(500),
        sweep_interval: Duration::from_millis(50),
        reconnect_base_delay: Duration::from_millis(30),
        ..ConnectionConfig::default()
    }
}

fn spawn_link(
    config: ConnectionConfig,
    attach_on_open: bool,
    open_results: Vec<Result<(), TransportError>>,
) -> (ConnectionManager, Peer, Arc<AtomicUsize>) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let open_count = Arc::new(AtomicUsize::new(0));
    let transport = TestTransport {
        events_tx: events_tx.clone(),
        outbound_tx,
        open_results: Arc::new(StdMutex::new(open_results.into())),
        attach_on_open,
        open_count: open_count.clone(),
    };
    let manager = ConnectionManager::spawn(transport, events_rx, config);
    let peer = Peer {
        events_tx,
        outbound_rx,
        codec: StreamCodec::new(),
    };
    (manager, peer, open_count)
}

async fn wait_for_state(manager: &ConnectionManager, want: ConnectionState) {
    let mut watch = manager.state_changes();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *watch.borrow_and_update() == want {
                return;
            }
            watch.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want}"));
}

async fn wait_for_len(queue: &TransmissionQueue, want: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if queue.len().await == want && !queue.is_draining() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for queue length {want}"));
}

async fn wait_for_retry_count(queue: &TransmissionQueue, id: &str, want: u32) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let count = queue
                .items()
                .await
                .iter()
                .find(|item| item.id == id)
                .map(|item| item.retry_count);
            if count == Some(want) && !queue.is_draining() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for retry count {want}"));
}

// ============================================================================
// Connection Lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_reaches_ready() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;
    assert!(manager.is_ready());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_connect_is_noop_while_connecting() {
    // Never attaches, so the first connect stays in Connecting.
    let (manager, _peer, open_count) = spawn_link(test_config(), false, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    assert_eq!(manager.state(), ConnectionState::Connecting);
    assert!(!manager.connect().await.expect("second connect"));
    assert_eq!(open_count.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_connect_returns_true_when_already_ready() {
    let (manager, mut peer, open_count) = spawn_link(test_config(), true, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    assert!(manager.connect().await.expect("connect while ready"));
    assert_eq!(open_count.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_connect_timeout_without_attach() {
    let config = ConnectionConfig {
        auto_reconnect: false,
        ..test_config()
    };
    let (manager, _peer, _) = spawn_link(config, false, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    wait_for_state(
        &manager,
        ConnectionState::Error(ConnectionErrorKind::Timeout),
    )
    .await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_handshake_nack_classifies_as_handshake_failed() {
    let config = ConnectionConfig {
        auto_reconnect: false,
        ..test_config()
    };
    let (manager, mut peer, _) = spawn_link(config, true, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    let request = peer.next_message().await;
    assert_eq!(request.kind(), MessageKind::HandshakeRequest);
    peer.nack(&request, "unsupported version").await;

    wait_for_state(
        &manager,
        ConnectionState::Error(ConnectionErrorKind::HandshakeFailed),
    )
    .await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_transport_error_is_classified() {
    let config = ConnectionConfig {
        auto_reconnect: false,
        ..test_config()
    };
    let (manager, mut peer, _) = spawn_link(config, true, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    peer.error(TransportError::Disconnected).await;
    wait_for_state(
        &manager,
        ConnectionState::Error(ConnectionErrorKind::DeviceDisconnected),
    )
    .await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_detach_from_ready_goes_disconnected() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    peer.detach().await;
    wait_for_state(&manager, ConnectionState::Disconnected).await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_rejects_in_flight_sends() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    let sender = manager.clone();
    let in_flight =
        tokio::spawn(async move { sender.send(Message::new(MessagePayload::StatusRequest)).await });

    // The peer receives the request but never acknowledges it.
    let request = peer.next_message().await;
    assert_eq!(request.kind(), MessageKind::StatusRequest);

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let result = in_flight.await.expect("join");
    assert_eq!(
        result.expect_err("send must be rejected"),
        SendError::Protocol(ProtocolError::ConnectionReset)
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_send_fails_when_not_ready() {
    let (manager, _peer, _) = spawn_link(test_config(), true, Vec::new());
    let err = manager
        .send(Message::new(MessagePayload::StatusRequest))
        .await
        .expect_err("not connected");
    assert_eq!(err, SendError::NotReady);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_send_resolves_with_ack_payload() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    let (result, ()) = tokio::join!(
        manager.send(Message::new(MessagePayload::StatusRequest)),
        async {
            let request = peer.next_message().await;
            assert_eq!(request.kind(), MessageKind::StatusRequest);
            let mut ack = Message::ack(&request);
            if let MessagePayload::Ack(payload) = &mut ack.payload {
                payload.extra.insert("itemsReceived".to_string(), 1.into());
            }
            peer.inject(&ack).await;
        }
    );
    let ack = result.expect("acked");
    assert_eq!(ack.extra["itemsReceived"], 1);

    manager.shutdown().await;
}

// ============================================================================
// Reconnection Policy
// ============================================================================

#[tokio::test]
async fn test_auto_reconnect_after_transient_failure() {
    let (manager, mut peer, open_count) = spawn_link(
        test_config(),
        true,
        vec![Err(TransportError::Io("port busy".to_string()))],
    );

    assert!(manager.connect().await.expect("connect"));
    wait_for_state(
        &manager,
        ConnectionState::Error(ConnectionErrorKind::Unknown),
    )
    .await;

    // The scheduled reconnect retries the open, which now succeeds.
    peer.complete_handshake("session-2").await;
    wait_for_state(&manager, ConnectionState::Ready).await;
    assert_eq!(open_count.load(Ordering::SeqCst), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_permission_denied_never_reconnects() {
    let (manager, _peer, open_count) = spawn_link(
        test_config(),
        true,
        vec![Err(TransportError::PermissionDenied)],
    );

    assert!(manager.connect().await.expect("connect"));
    wait_for_state(
        &manager,
        ConnectionState::Error(ConnectionErrorKind::PermissionDenied),
    )
    .await;

    // Long enough for several backoff periods; nothing must happen.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(open_count.load(Ordering::SeqCst), 1);
    assert_eq!(
        manager.state(),
        ConnectionState::Error(ConnectionErrorKind::PermissionDenied)
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_attempts_are_bounded() {
    let config = ConnectionConfig {
        max_reconnect_attempts: 2,
        ..test_config()
    };
    let (manager, _peer, open_count) = spawn_link(
        config,
        false,
        vec![
            Err(TransportError::NotFound),
            Err(TransportError::NotFound),
            Err(TransportError::NotFound),
            Err(TransportError::NotFound),
        ],
    );

    assert!(manager.connect().await.expect("connect"));
    // Initial attempt plus two scheduled retries, then the policy stops.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if open_count.load(Ordering::SeqCst) == 3 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("expected three open attempts");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(open_count.load(Ordering::SeqCst), 3);
    assert_eq!(
        manager.state(),
        ConnectionState::Error(ConnectionErrorKind::DeviceNotFound)
    );

    manager.shutdown().await;
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_subscribers_observe_lifecycle() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());

    let mut connected = manager
        .subscribe(EventKind::Connected)
        .await
        .expect("subscribe");
    let mut changes = manager
        .subscribe(EventKind::StateChanged)
        .await
        .expect("subscribe");

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-7").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    match connected.events.recv().await.expect("connected event") {
        ConnectionEvent::Connected { session_id } => assert_eq!(session_id, "session-7"),
        other => panic!("unexpected event: {other:?}"),
    }

    let mut seen = Vec::new();
    while let Ok(event) = changes.events.try_recv() {
        if let ConnectionEvent::StateChanged { to, .. } = event {
            seen.push(to);
        }
    }
    assert_eq!(
        seen,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Handshaking,
            ConnectionState::Ready,
        ]
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_data_received_fan_out() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());
    let mut data = manager
        .subscribe(EventKind::DataReceived)
        .await
        .expect("subscribe");

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    let command = Message::new(MessagePayload::Command(CommandPayload {
        command: "beep".to_string(),
        params: serde_json::Value::Null,
    }));
    peer.inject(&command).await;

    let event = tokio::time::timeout(Duration::from_secs(2), data.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    match event {
        ConnectionEvent::DataReceived(message) => {
            assert_eq!(message.id, command.id);
            assert_eq!(message.kind(), MessageKind::Command);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_protocol_handlers_run_in_session() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    let handler_id = manager
        .on_message(
            MessageKind::Command,
            Box::new(move |message| {
                assert_eq!(message.kind(), MessageKind::Command);
                seen_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await
        .expect("register handler");

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    let command = Message::new(MessagePayload::Command(CommandPayload {
        command: "beep".to_string(),
        params: serde_json::Value::Null,
    }));
    peer.inject(&command).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while seen.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler never ran");

    assert!(manager
        .remove_message_handler(handler_id)
        .await
        .expect("remove handler"));
    peer.inject(&command).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
}

// ============================================================================
// Transmission Queue
// ============================================================================

fn test_queue_config() -> QueueConfig {
    QueueConfig {
        max_retries: 3,
        auto_retry: false,
        drain_interval: Duration::from_millis(50),
        ..QueueConfig::default()
    }
}

#[tokio::test]
async fn test_end_to_end_scan_drains_on_ready() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());
    let storage = Arc::new(MemoryStorage::new());
    let queue = TransmissionQueue::new(manager.clone(), storage.clone(), test_queue_config());
    queue.load().await;
    queue.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Queued offline: nothing is sent yet.
    let item = queue
        .add_to_queue("12345670", BarcodeFormat::Ean8, false, Map::new())
        .await
        .expect("queue scan");
    assert_eq!(item.retry_count, 0);
    assert_eq!(queue.len().await, 1);

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    // Readiness triggers the drain.
    let data = peer.next_message().await;
    assert_eq!(data.kind(), MessageKind::Data);
    match &data.payload {
        MessagePayload::Data(payload) => {
            assert_eq!(payload.kind, "barcode");
            assert_eq!(payload.data, "12345670");
            assert_eq!(payload.format, "EAN8");
            assert!(!payload.compressed);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    peer.ack(&data).await;
    wait_for_len(&queue, 0).await;

    // A scan added while ready drains immediately.
    queue
        .add_to_queue("9780201896831", BarcodeFormat::Ean13, false, Map::new())
        .await
        .expect("queue scan");
    let data = peer.next_message().await;
    assert_eq!(data.kind(), MessageKind::Data);
    peer.ack(&data).await;
    wait_for_len(&queue, 0).await;

    // The persisted mirror followed every mutation.
    let blob = storage.get("scanlink.queue").await.expect("get").expect("blob");
    assert_eq!(blob, "[]");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_add_rejects_invalid_barcode() {
    let (manager, _peer, _) = spawn_link(test_config(), true, Vec::new());
    let queue = TransmissionQueue::new(
        manager.clone(),
        Arc::new(MemoryStorage::new()),
        test_queue_config(),
    );

    let err = queue
        .add_to_queue("1234567", BarcodeFormat::Ean8, false, Map::new())
        .await
        .expect_err("wrong length");
    assert!(matches!(err, scanlink_session::QueueError::InvalidBarcode(_)));
    assert!(queue.is_empty().await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_queue_retry_accounting_and_freeze() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());
    let queue = TransmissionQueue::new(
        manager.clone(),
        Arc::new(MemoryStorage::new()),
        test_queue_config(),
    );

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    // The add triggers an immediate drain attempt; the peer rejects it.
    let item = queue
        .add_to_queue("ABC-123", BarcodeFormat::Code39, false, Map::new())
        .await
        .expect("queue scan");
    let first = peer.next_message().await;
    assert_eq!(first.kind(), MessageKind::Data);
    peer.nack(&first, "simulated failure").await;
    wait_for_retry_count(&queue, &item.id, 1).await;

    // Two more failing passes reach the ceiling.
    for expected in 2..=3 {
        let (_, ()) = tokio::join!(queue.process_queue(), async {
            let message = peer.next_message().await;
            peer.nack(&message, "simulated failure").await;
        });
        wait_for_retry_count(&queue, &item.id, expected).await;
    }

    // Frozen: skipped by drains, never deleted.
    queue.process_queue().await;
    peer.expect_silence(Duration::from_millis(100)).await;
    assert_eq!(queue.len().await, 1);
    let stalled = queue.stalled_items().await;
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].id, item.id);
    assert_eq!(stalled[0].retry_count, 3);

    // Raising the ceiling re-arms the item.
    queue.set_max_retries(5).await;
    let (_, ()) = tokio::join!(queue.process_queue(), async {
        let message = peer.next_message().await;
        peer.ack(&message).await;
    });
    wait_for_len(&queue, 0).await;

    manager.shutdown().await;
}

#[tokio::test]
async fn test_batch_send_is_atomic() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());
    let queue = TransmissionQueue::new(
        manager.clone(),
        Arc::new(MemoryStorage::new()),
        test_queue_config(),
    );

    // Queue while offline so nothing drains underneath the test.
    let a = queue
        .add_to_queue("12345670", BarcodeFormat::Ean8, false, Map::new())
        .await
        .expect("queue scan");
    let b = queue
        .add_to_queue("9780201896831", BarcodeFormat::Ean13, false, Map::new())
        .await
        .expect("queue scan");
    let c = queue
        .add_to_queue("ABC-123", BarcodeFormat::Code39, false, Map::new())
        .await
        .expect("queue scan");

    let err = queue
        .send_batch(&[a.id.clone(), b.id.clone()])
        .await
        .expect_err("not ready");
    assert!(matches!(err, scanlink_session::QueueError::NotReady));

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    // Failed batch: the queue is untouched.
    let batch_ids = [a.id.clone(), b.id.clone()];
    let (result, ()) = tokio::join!(queue.send_batch(&batch_ids), async {
        let message = peer.next_message().await;
        assert_eq!(message.kind(), MessageKind::BatchData);
        peer.nack(&message, "receiver busy").await;
    });
    assert!(result.is_err());
    assert_eq!(queue.len().await, 3);

    // Successful batch: exactly the batched ids are removed.
    let batch_ids = [a.id.clone(), b.id.clone()];
    let (result, ()) = tokio::join!(queue.send_batch(&batch_ids), async {
        let message = peer.next_message().await;
        match &message.payload {
            MessagePayload::BatchData(payload) => {
                assert_eq!(payload.item_count, 2);
                assert_eq!(payload.items.len(), 2);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        peer.ack(&message).await;
    });
    assert_eq!(result.expect("batch"), 2);

    let remaining = queue.items().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, c.id);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_queue_restores_from_storage() {
    let (manager, _peer, _) = spawn_link(test_config(), true, Vec::new());
    let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());

    let queue = TransmissionQueue::new(manager.clone(), storage.clone(), test_queue_config());
    queue
        .add_to_queue("12345670", BarcodeFormat::Ean8, false, Map::new())
        .await
        .expect("queue scan");
    queue
        .add_to_queue("ABC-123", BarcodeFormat::Code39, false, Map::new())
        .await
        .expect("queue scan");

    // A fresh queue over the same storage sees both items.
    let restored = TransmissionQueue::new(manager.clone(), storage.clone(), test_queue_config());
    restored.load().await;
    assert_eq!(restored.len().await, 2);
    let barcodes: Vec<String> = restored
        .items()
        .await
        .into_iter()
        .map(|item| item.barcode)
        .collect();
    assert_eq!(barcodes, vec!["12345670".to_string(), "ABC-123".to_string()]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_persisted_queue_is_discarded() {
    let (manager, _peer, _) = spawn_link(test_config(), true, Vec::new());
    let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());
    storage
        .set("scanlink.queue", "this is not json")
        .await
        .expect("seed corrupt blob");

    let queue = TransmissionQueue::new(manager.clone(), storage, test_queue_config());
    queue.load().await;
    assert!(queue.is_empty().await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_remove_from_queue() {
    let (manager, _peer, _) = spawn_link(test_config(), true, Vec::new());
    let queue = TransmissionQueue::new(
        manager.clone(),
        Arc::new(MemoryStorage::new()),
        test_queue_config(),
    );

    let item = queue
        .add_to_queue("12345670", BarcodeFormat::Ean8, false, Map::new())
        .await
        .expect("queue scan");
    assert!(queue.remove_from_queue(&item.id).await);
    assert!(!queue.remove_from_queue(&item.id).await);
    assert!(queue.is_empty().await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_compressed_item_travels_hex_armored() {
    let (manager, mut peer, _) = spawn_link(test_config(), true, Vec::new());
    let queue = TransmissionQueue::new(
        manager.clone(),
        Arc::new(MemoryStorage::new()),
        test_queue_config(),
    );

    assert!(manager.connect().await.expect("connect"));
    peer.complete_handshake("session-1").await;
    wait_for_state(&manager, ConnectionState::Ready).await;

    queue
        .add_to_queue("9780201896831", BarcodeFormat::Ean13, true, Map::new())
        .await
        .expect("queue scan");

    let data = peer.next_message().await;
    match &data.payload {
        MessagePayload::Data(payload) => {
            assert!(payload.compressed);
            assert_ne!(payload.data, "9780201896831");
            assert_eq!(
                scanlink_barcode::unpack_content(&payload.data, payload.compressed),
                "9780201896831"
            );
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    peer.ack(&data).await;
    wait_for_len(&queue, 0).await;

    manager.shutdown().await;
}
