//! Negotiation event bus
//!
//! Transports raise `connect` and `produce` signals that need a signaling
//! round trip. The session relays them here as typed events; the signaling
//! layer subscribes and carries them to the router.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use relaycast_protocol::{ConnectTransport, DtlsParameters, ProduceTransport, TransportDirection};

use crate::engine::Completion;
use crate::error::NegotiationError;
use crate::lock;

/// Receiving end of a bus subscription
pub type EventReceiver = mpsc::UnboundedReceiver<NegotiationEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Produce,
}

#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    Connect(ConnectEvent),
    Produce(ProduceTransport),
}

impl NegotiationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NegotiationEvent::Connect(_) => EventKind::Connect,
            NegotiationEvent::Produce(_) => EventKind::Produce,
        }
    }
}

/// A transport wants its DTLS handshake carried to the router
#[derive(Debug, Clone)]
pub struct ConnectEvent {
    pub payload: ConnectTransport,
    pub responder: ConnectResponder,
}

impl ConnectEvent {
    pub fn direction(&self) -> TransportDirection {
        self.payload.direction
    }

    pub fn dtls_parameters(&self) -> &DtlsParameters {
        &self.payload.dtls_parameters
    }
}

/// Completion handle of a transport's connect signal
///
/// Cloned into every subscriber's copy of the event; the first response wins.
#[derive(Clone)]
pub struct ConnectResponder {
    direction: TransportDirection,
    completion: Arc<Mutex<Option<Completion<()>>>>,
}

impl ConnectResponder {
    pub(crate) fn new(direction: TransportDirection, completion: Completion<()>) -> Self {
        Self {
            direction,
            completion: Arc::new(Mutex::new(Some(completion))),
        }
    }

    fn take(&self) -> Result<Completion<()>, NegotiationError> {
        lock(&self.completion)
            .take()
            .ok_or(NegotiationError::AlreadySettled)
    }

    /// The router accepted the handshake
    pub fn accept(&self) -> Result<(), NegotiationError> {
        self.take()?.settle(())
    }

    /// The router refused the handshake
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), NegotiationError> {
        let completion = self.take()?;
        completion.reject(NegotiationError::Rejected(reason.into()));
        Ok(())
    }

    /// Settle on the session's behalf when nobody will answer any more
    pub(crate) fn abandon(&self, err: NegotiationError) -> Result<(), NegotiationError> {
        let completion = self.take()?;
        completion.reject(err);
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.completion).is_none()
    }
}

impl std::fmt::Debug for ConnectResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectResponder")
            .field("direction", &self.direction)
            .field("settled", &self.is_settled())
            .finish()
    }
}

struct Subscriber {
    filter: Option<EventKind>,
    tx: mpsc::UnboundedSender<NegotiationEvent>,
}

/// Publish/subscribe surface for negotiation events
///
/// Delivery is FIFO per subscriber; every subscriber registered at publish
/// time gets its own copy.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> EventReceiver {
        self.add_subscriber(None)
    }

    /// Subscribe to one kind of event
    pub fn subscribe_kind(&self, kind: EventKind) -> EventReceiver {
        self.add_subscriber(Some(kind))
    }

    fn add_subscriber(&self, filter: Option<EventKind>) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(Subscriber { filter, tx });
        rx
    }

    /// Deliver an event, returning how many subscribers received it
    pub fn publish(&self, event: NegotiationEvent) -> usize {
        let kind = event.kind();
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.filter.is_some_and(|f| f != kind) {
                continue;
            }
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            tracing::warn!("No subscribers for {:?} event", kind);
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &lock(&self.subscribers).len())
            .finish()
    }
}
