//! Connection lifecycle management.
//!
//! A [`ConnectionManager`] is a cheap cloneable handle over a single
//! background task that owns the transport, the protocol session, and the
//! state machine. All connection state is touched only from that task, so
//! no locking is needed; the handle talks to it over a command channel
//! and observes state through a watch channel.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, info, warn};

use scanlink_protocol::{
    AckPayload, AckWait, HandlerId, Message, MessageHandler, MessageKind, MessageProtocol,
    ProtocolResult, SessionInfo,
};

use crate::backoff::reconnect_delay;
use crate::config::ConnectionConfig;
use crate::events::{ConnectionEvent, EventBus, EventKind, EventSubscription, SubscriptionId};
use crate::transport::{Transport, TransportEvent, TransportEvents};
use crate::{ConnectionErrorKind, SendError, SessionError};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link. The initial state.
    Disconnected,
    /// Waiting for the device to attach.
    Connecting,
    /// Channel open; handshake not yet started.
    Connected,
    /// Handshake request sent, waiting for the peer.
    Handshaking,
    /// Handshake complete; traffic is accepted.
    Ready,
    /// The connection failed; the kind says why.
    Error(ConnectionErrorKind),
}

impl ConnectionState {
    /// Whether traffic is currently accepted.
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// The failure classification, when in the error state.
    pub fn error_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            ConnectionState::Error(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Handshaking => f.write_str("handshaking"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Error(kind) => write!(f, "error ({kind})"),
        }
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        message: Message,
        reply: oneshot::Sender<Result<AckWait, SendError>>,
    },
    Post {
        message: Message,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Subscribe {
        kind: EventKind,
        reply: oneshot::Sender<EventSubscription>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    RegisterHandler {
        kind: MessageKind,
        handler: MessageHandler,
        reply: oneshot::Sender<HandlerId>,
    },
    RemoveHandler {
        id: HandlerId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to a running connection task.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the connection task over an opened-but-idle transport and
    /// its event stream.
    pub fn spawn<T: Transport + 'static>(
        transport: T,
        transport_events: TransportEvents,
        config: ConnectionConfig,
    ) -> ConnectionManager {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let task = ConnectionTask::new(transport, transport_events, config, command_rx, state_tx);
        tokio::spawn(task.run());
        ConnectionManager {
            commands: command_tx,
            state: state_rx,
        }
    }

    /// Start connecting.
    ///
    /// Returns false when a connect is already in progress; true when
    /// already ready or once the attempt has been started.
    pub async fn connect(&self) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { reply: tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Tear the connection down, whatever its state. Never fails.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Disconnect { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Send a message and wait for its acknowledgment.
    pub async fn send(&self, message: Message) -> Result<AckPayload, SendError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { message, reply: tx })
            .await
            .map_err(|_| SendError::ChannelClosed)?;
        let wait = rx.await.map_err(|_| SendError::ChannelClosed)??;
        wait.wait().await.map_err(SendError::Protocol)
    }

    /// Send a message that expects no acknowledgment (acks, replies).
    pub async fn post(&self, message: Message) -> Result<(), SendError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Post { message, reply: tx })
            .await
            .map_err(|_| SendError::ChannelClosed)?;
        rx.await.map_err(|_| SendError::ChannelClosed)?
    }

    /// Whether traffic is currently accepted.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch channel following every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Whether the connection task has shut down.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Subscribe to one kind of connection event.
    pub async fn subscribe(&self, kind: EventKind) -> Result<EventSubscription, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { kind, reply: tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Remove a subscription. Returns whether it existed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Unsubscribe { id, reply: tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Register a protocol-level handler for one message kind.
    ///
    /// Handlers run inside the connection task for every incoming message
    /// of that kind; a failing handler is logged and never blocks the
    /// others.
    pub async fn on_message(
        &self,
        kind: MessageKind,
        handler: MessageHandler,
    ) -> Result<HandlerId, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RegisterHandler {
                kind,
                handler,
                reply: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Remove a protocol-level handler. Returns whether it existed.
    pub async fn remove_message_handler(&self, id: HandlerId) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RemoveHandler { id, reply: tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;
        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Stop the connection task.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

type HandshakeFuture = Pin<Box<dyn Future<Output = ProtocolResult<SessionInfo>> + Send>>;

enum Action {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    Sweep,
    ConnectTimeout,
    Reconnect,
    HandshakeDone(ProtocolResult<SessionInfo>),
}

struct ConnectionTask<T: Transport> {
    transport: T,
    transport_events: TransportEvents,
    config: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    protocol: MessageProtocol,
    bus: EventBus,
    reconnect_attempts: u32,
    connect_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    handshake: Option<HandshakeFuture>,
    events_closed: bool,
}

/// Sleep until the deadline, or pend forever when there is none.
async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Await the stored future, or pend forever when there is none.
async fn poll_opt(slot: &mut Option<HandshakeFuture>) -> ProtocolResult<SessionInfo> {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

impl<T: Transport> ConnectionTask<T> {
    fn new(
        transport: T,
        transport_events: TransportEvents,
        config: ConnectionConfig,
        commands: mpsc::Receiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let protocol = MessageProtocol::new(config.message_timeout);
        ConnectionTask {
            transport,
            transport_events,
            config,
            commands,
            state_tx,
            state: ConnectionState::Disconnected,
            protocol,
            bus: EventBus::default(),
            reconnect_attempts: 0,
            connect_deadline: None,
            reconnect_at: None,
            handshake: None,
            events_closed: false,
        }
    }

    async fn run(mut self) {
        let mut sweep = interval(self.config.sweep_interval);
        loop {
            let action = tokio::select! {
                cmd = self.commands.recv() => Action::Command(cmd),
                event = self.transport_events.recv(), if !self.events_closed => {
                    Action::Transport(event)
                }
                _ = sweep.tick() => Action::Sweep,
                _ = sleep_opt(self.connect_deadline) => Action::ConnectTimeout,
                _ = sleep_opt(self.reconnect_at) => Action::Reconnect,
                result = poll_opt(&mut self.handshake) => Action::HandshakeDone(result),
            };
            match action {
                Action::Command(None) => {
                    // Every handle is gone; tear down.
                    self.force_disconnect().await;
                    break;
                }
                Action::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Action::Transport(None) => {
                    warn!("transport event stream closed");
                    self.events_closed = true;
                    if self.state != ConnectionState::Disconnected {
                        self.fail(ConnectionErrorKind::DeviceDisconnected);
                    }
                }
                Action::Transport(Some(event)) => self.handle_transport_event(event).await,
                Action::Sweep => {
                    self.protocol.sweep_timeouts();
                }
                Action::ConnectTimeout => {
                    self.connect_deadline = None;
                    if self.state == ConnectionState::Connecting {
                        warn!("connection attempt timed out");
                        self.fail(ConnectionErrorKind::Timeout);
                    }
                }
                Action::Reconnect => {
                    self.reconnect_at = None;
                    if matches!(self.state, ConnectionState::Error(_)) {
                        info!(attempt = self.reconnect_attempts, "attempting automatic reconnect");
                        self.start_connect().await;
                    }
                }
                Action::HandshakeDone(result) => self.handle_handshake_done(result),
            }
        }
        debug!("connection task stopped");
    }

    /// Returns false when the task should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { reply } => {
                let result = self.start_connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                self.force_disconnect().await;
                let _ = reply.send(());
            }
            Command::Send { message, reply } => {
                let result = self.start_send(message).await;
                let _ = reply.send(result);
            }
            Command::Post { message, reply } => {
                let result = self.post_message(message).await;
                let _ = reply.send(result);
            }
            Command::Subscribe { kind, reply } => {
                let _ = reply.send(self.bus.subscribe(kind));
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.bus.unsubscribe(id));
            }
            Command::RegisterHandler {
                kind,
                handler,
                reply,
            } => {
                let _ = reply.send(self.protocol.on_message(kind, handler));
            }
            Command::RemoveHandler { id, reply } => {
                let _ = reply.send(self.protocol.remove_handler(id));
            }
            Command::Shutdown => {
                self.force_disconnect().await;
                return false;
            }
        }
        true
    }

    async fn start_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting => return false,
            ConnectionState::Ready => return true,
            _ => {}
        }
        self.reconnect_at = None;
        self.handshake = None;
        self.set_state(ConnectionState::Connecting);
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
        if let Err(e) = self.transport.open().await {
            warn!(error = %e, "transport open failed");
            self.fail(e.classify());
        }
        true
    }

    async fn force_disconnect(&mut self) {
        self.connect_deadline = None;
        self.reconnect_at = None;
        self.handshake = None;
        self.reconnect_attempts = 0;
        self.protocol.reset();
        self.transport.close().await;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn start_send(&mut self, message: Message) -> Result<AckWait, SendError> {
        if self.state != ConnectionState::Ready {
            return Err(SendError::NotReady);
        }
        let (bytes, wait) = self.protocol.prepare_send(&message)?;
        if let Err(e) = self.transport.send(&bytes).await {
            // The waiter resolves with the send failure; the state machine
            // records the classified transport fault.
            self.protocol.abort_send(&message.id, &e.to_string());
            warn!(error = %e, "transport write failed");
            self.fail(e.classify());
        }
        Ok(wait)
    }

    async fn post_message(&mut self, message: Message) -> Result<(), SendError> {
        if self.state != ConnectionState::Ready {
            return Err(SendError::NotReady);
        }
        let bytes = message.encode().map_err(SendError::Protocol)?;
        if let Err(e) = self.transport.send(&bytes).await {
            warn!(error = %e, "transport write failed");
            let kind = e.classify();
            self.fail(kind);
            return Err(SendError::Protocol(
                scanlink_protocol::ProtocolError::SendFailed(e.to_string()),
            ));
        }
        Ok(())
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Attached => self.handle_attached().await,
            TransportEvent::Detached => self.handle_detached().await,
            TransportEvent::Received(bytes) => self.handle_received(&bytes),
            TransportEvent::Error(e) => {
                if self.state == ConnectionState::Disconnected {
                    debug!(error = %e, "ignoring transport error while disconnected");
                    return;
                }
                warn!(error = %e, "transport error");
                self.fail(e.classify());
            }
        }
    }

    async fn handle_attached(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "ignoring attach signal");
            return;
        }
        self.connect_deadline = None;
        self.set_state(ConnectionState::Connected);
        // The handshake starts automatically on attach; callers never
        // drive it.
        self.begin_handshake().await;
    }

    async fn handle_detached(&mut self) {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Ready | ConnectionState::Error(_) => {
                info!("device detached");
                self.force_disconnect().await;
            }
            // A detach mid-connect is a disconnection fault, so the
            // reconnect policy applies.
            _ => self.fail(ConnectionErrorKind::DeviceDisconnected),
        }
    }

    async fn begin_handshake(&mut self) {
        self.set_state(ConnectionState::Handshaking);
        let begun = self.protocol.begin_handshake(
            self.config.app_info.clone(),
            self.config.capabilities.clone(),
        );
        match begun {
            Ok((message, bytes, wait)) => {
                if let Err(e) = self.transport.send(&bytes).await {
                    warn!(error = %e, "failed to send handshake request");
                    self.protocol.abort_send(&message.id, &e.to_string());
                    self.fail(ConnectionErrorKind::HandshakeFailed);
                    return;
                }
                debug!(id = %message.id, "handshake request sent");
                self.handshake = Some(Box::pin(wait.wait()));
            }
            Err(e) => {
                warn!(error = %e, "failed to build handshake request");
                self.fail(ConnectionErrorKind::HandshakeFailed);
            }
        }
    }

    fn handle_handshake_done(&mut self, result: ProtocolResult<SessionInfo>) {
        self.handshake = None;
        if self.state != ConnectionState::Handshaking {
            debug!(state = %self.state, "ignoring stale handshake outcome");
            return;
        }
        match result {
            Ok(info) => {
                info!(session = %info.session_id, "handshake complete");
                self.reconnect_attempts = 0;
                self.set_state(ConnectionState::Ready);
                self.bus.emit(&ConnectionEvent::Connected {
                    session_id: info.session_id,
                });
            }
            Err(e) => {
                warn!(error = %e, "handshake failed");
                self.fail(ConnectionErrorKind::HandshakeFailed);
            }
        }
    }

    fn handle_received(&mut self, bytes: &[u8]) {
        for message in self.protocol.feed(bytes) {
            match message.kind() {
                // Correlation traffic is consumed by the protocol layer.
                MessageKind::Ack | MessageKind::Nack => {}
                _ => self.bus.emit(&ConnectionEvent::DataReceived(message)),
            }
        }
    }

    fn fail(&mut self, kind: ConnectionErrorKind) {
        self.connect_deadline = None;
        self.reconnect_at = None;
        self.handshake = None;
        self.protocol.reset();
        self.set_state(ConnectionState::Error(kind));
        self.schedule_reconnect(kind);
    }

    fn schedule_reconnect(&mut self, kind: ConnectionErrorKind) {
        if !self.config.auto_reconnect || !kind.reconnectable() {
            return;
        }
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            warn!(
                attempts = self.reconnect_attempts,
                "giving up on automatic reconnection"
            );
            return;
        }
        let delay = reconnect_delay(self.config.reconnect_base_delay, self.reconnect_attempts);
        self.reconnect_attempts += 1;
        info!(attempt = self.reconnect_attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn set_state(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        let _ = self.state_tx.send(to);
        debug!(%from, %to, "connection state changed");
        self.bus.emit(&ConnectionEvent::StateChanged { from, to });
        match to {
            ConnectionState::Disconnected => self.bus.emit(&ConnectionEvent::Disconnected),
            ConnectionState::Error(kind) => self.bus.emit(&ConnectionEvent::Error(kind)),
            _ => {}
        }
    }
}
