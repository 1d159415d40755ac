//! Typed connection events and subscriptions.

use tokio::sync::mpsc;

use scanlink_protocol::Message;

use crate::{ConnectionErrorKind, ConnectionState};

/// Kinds of events a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    DataReceived,
    Error,
    StateChanged,
}

/// Events delivered to subscribers.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Handshake finished; the link is ready for traffic.
    Connected { session_id: String },
    /// The link went away.
    Disconnected,
    /// A non-correlation message arrived from the peer.
    DataReceived(Message),
    /// The connection failed.
    Error(ConnectionErrorKind),
    /// Any state transition.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl ConnectionEvent {
    /// The subscription kind this event belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connected { .. } => EventKind::Connected,
            ConnectionEvent::Disconnected => EventKind::Disconnected,
            ConnectionEvent::DataReceived(_) => EventKind::DataReceived,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::StateChanged { .. } => EventKind::StateChanged,
        }
    }
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// A live subscription: the id (for unsubscribe) and the event stream.
#[derive(Debug)]
pub struct EventSubscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Registry of subscribers, grouped by event kind.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Vec<(SubscriptionId, EventKind, mpsc::UnboundedSender<ConnectionEvent>)>,
    next_id: u64,
}

impl EventBus {
    pub fn subscribe(&mut self, kind: EventKind) -> EventSubscription {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((id, kind, tx));
        EventSubscription { id, events: rx }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    /// Deliver to every live subscriber of the event's kind.
    ///
    /// A dropped receiver is pruned and never prevents delivery to the
    /// remaining subscribers.
    pub fn emit(&mut self, event: &ConnectionEvent) {
        let kind = event.kind();
        self.subscribers.retain(|(_, sub_kind, tx)| {
            if *sub_kind != kind {
                return true;
            }
            tx.send(event.clone()).is_ok()
        });
    }
}
