//! Message protocol session state.
//!
//! [`MessageProtocol`] owns the pending-request table, the stream codec,
//! the handshake/session state, and a per-kind handler registry. It is a
//! plain struct with no interior locking; the connection task owns it and
//! touches it only between await points.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    AckWait, AppInfo, DeviceInfo, HandshakeRequestPayload, Message, MessageKind, MessagePayload,
    PendingTable, ProtocolError, ProtocolResult, StreamCodec, MESSAGE_TIMEOUT,
};

/// Handler invoked for each incoming message of a registered kind.
///
/// A handler returning an error is logged and skipped; it never aborts
/// dispatch to the remaining handlers.
pub type MessageHandler = Box<dyn FnMut(&Message) -> Result<(), String> + Send>;

/// Identifier for a registered message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Session information established by the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Session id assigned by the peer.
    pub session_id: String,
    /// Peer device description.
    pub device_info: DeviceInfo,
}

/// Future side of an in-flight handshake.
///
/// The exchange succeeds once the handshake request is acknowledged *and*
/// the `HANDSHAKE_RESPONSE` has been recorded, all within the message
/// timeout.
pub struct HandshakeWait {
    ack: AckWait,
    complete: oneshot::Receiver<SessionInfo>,
    timeout: Duration,
}

impl HandshakeWait {
    /// Wait for the handshake to complete.
    pub async fn wait(self) -> ProtocolResult<SessionInfo> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        tokio::time::timeout_at(deadline, self.ack.wait())
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        match tokio::time::timeout_at(deadline, self.complete).await {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(_)) => Err(ProtocolError::ConnectionReset),
            Err(_) => Err(ProtocolError::HandshakeIncomplete),
        }
    }
}

/// Protocol session over one connection.
pub struct MessageProtocol {
    pending: PendingTable,
    stream: StreamCodec,
    handlers: HashMap<MessageKind, Vec<(HandlerId, MessageHandler)>>,
    next_handler_id: u64,
    session: Option<SessionInfo>,
    handshake_complete: bool,
    handshake_waiter: Option<oneshot::Sender<SessionInfo>>,
    message_timeout: Duration,
}

impl Default for MessageProtocol {
    fn default() -> Self {
        MessageProtocol::new(MESSAGE_TIMEOUT)
    }
}

impl MessageProtocol {
    /// Create a protocol session with the given message timeout.
    pub fn new(message_timeout: Duration) -> Self {
        MessageProtocol {
            pending: PendingTable::new(),
            stream: StreamCodec::new(),
            handlers: HashMap::new(),
            next_handler_id: 0,
            session: None,
            handshake_complete: false,
            handshake_waiter: None,
            message_timeout,
        }
    }

    /// Register a request and serialize it for transmission.
    ///
    /// The caller owns the transport write; call [`abort_send`] if the
    /// write fails so the waiter rejects instead of timing out.
    ///
    /// [`abort_send`]: MessageProtocol::abort_send
    pub fn prepare_send(&mut self, message: &Message) -> ProtocolResult<(Vec<u8>, AckWait)> {
        let bytes = message.encode()?;
        let wait = self.pending.register(&message.id)?;
        Ok((bytes, wait))
    }

    /// Reject the pending entry for `id` after a failed transport write.
    pub fn abort_send(&mut self, id: &str, reason: &str) {
        self.pending
            .reject(id, ProtocolError::SendFailed(reason.to_string()));
    }

    /// Feed raw transport bytes; returns every complete message decoded,
    /// after correlation bookkeeping and handler dispatch.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Message> {
        self.stream.push(data);
        let mut out = Vec::new();
        while let Some(frame) = self.stream.next_object() {
            match Message::decode(&frame) {
                Ok(message) => out.push(self.process_incoming(message)),
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }
        out
    }

    /// Handle one decoded message.
    fn process_incoming(&mut self, message: Message) -> Message {
        match &message.payload {
            MessagePayload::Ack(ack) => {
                if !self.pending.resolve(&ack.original_message_id, ack.clone()) {
                    debug!(id = %ack.original_message_id, "dropping unmatched ack");
                }
            }
            MessagePayload::Nack(nack) => {
                let error = ProtocolError::Nack(nack.error_message.clone());
                if !self.pending.reject(&nack.original_message_id, error) {
                    debug!(id = %nack.original_message_id, "dropping unmatched nack");
                }
            }
            MessagePayload::HandshakeResponse(response) => {
                let info = SessionInfo {
                    session_id: response.session_id.clone(),
                    device_info: response.device_info.clone(),
                };
                debug!(session = %info.session_id, "handshake response recorded");
                self.session = Some(info.clone());
                self.handshake_complete = true;
                if let Some(waiter) = self.handshake_waiter.take() {
                    let _ = waiter.send(info);
                }
            }
            _ => {}
        }
        self.dispatch(&message);
        message
    }

    fn dispatch(&mut self, message: &Message) {
        if let Some(handlers) = self.handlers.get_mut(&message.kind()) {
            for (id, handler) in handlers.iter_mut() {
                if let Err(e) = handler(message) {
                    warn!(handler = id.0, kind = ?message.kind(), error = %e, "message handler failed");
                }
            }
        }
    }

    /// Register a handler for one message kind.
    pub fn on_message(&mut self, kind: MessageKind, handler: MessageHandler) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        self.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Remove a previously registered handler. Returns whether it existed.
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        for handlers in self.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.len() != before {
                return true;
            }
        }
        false
    }

    /// Begin a handshake exchange.
    ///
    /// Resets session state, builds the `HANDSHAKE_REQUEST`, and registers
    /// both the acknowledgment and the completion waiter. The caller
    /// writes the returned bytes to the transport (calling [`abort_send`]
    /// with the message id on failure) and awaits the [`HandshakeWait`].
    ///
    /// [`abort_send`]: MessageProtocol::abort_send
    pub fn begin_handshake(
        &mut self,
        app_info: AppInfo,
        capabilities: Vec<String>,
    ) -> ProtocolResult<(Message, Vec<u8>, HandshakeWait)> {
        self.reset_session();
        let message = Message::new(MessagePayload::HandshakeRequest(HandshakeRequestPayload {
            app_info,
            capabilities,
        }));
        let (bytes, ack) = self.prepare_send(&message)?;
        let (tx, rx) = oneshot::channel();
        self.handshake_waiter = Some(tx);
        Ok((
            message,
            bytes,
            HandshakeWait {
                ack,
                complete: rx,
                timeout: self.message_timeout,
            },
        ))
    }

    /// Reject pending entries older than the message timeout.
    /// Returns how many were swept.
    pub fn sweep_timeouts(&mut self) -> usize {
        let expired = self.pending.sweep(self.message_timeout);
        if !expired.is_empty() {
            debug!(count = expired.len(), "timed out pending requests");
        }
        expired.len()
    }

    /// Discard all session and correlation state.
    ///
    /// Outstanding requests are force-rejected with
    /// [`ProtocolError::ConnectionReset`] so their callers never hang.
    pub fn reset(&mut self) {
        let rejected = self.pending.reject_all(ProtocolError::ConnectionReset);
        if rejected > 0 {
            debug!(rejected, "force-rejected pending requests on reset");
        }
        self.stream.clear();
        self.reset_session();
    }

    fn reset_session(&mut self) {
        self.session = None;
        self.handshake_complete = false;
        // Dropping the waiter makes any outstanding HandshakeWait observe
        // a reset.
        self.handshake_waiter = None;
    }

    /// Session established by the last completed handshake, if any.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Whether the handshake has completed for the current session.
    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Number of requests awaiting acknowledgment.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
