//! Send/receive transport pair and the negotiation relays installed on them

use std::sync::{Arc, Mutex};

use relaycast_protocol::{ConnectTransport, ProduceTransport, TransportDirection};

use crate::engine::Transport;
use crate::error::{NegotiationError, Result, SessionError};
use crate::events::{ConnectEvent, ConnectResponder, EventBus, NegotiationEvent};
use crate::ledger::{KeyGenerator, PendingProduceLedger};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created, no connect signal seen yet
    New,
    /// Connect event published, waiting for the signaling round trip
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// A transport plus the connection state tracked by its connect relay
#[derive(Clone)]
pub struct ManagedTransport {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<TransportState>>,
    /// Responder of the connect round trip, kept so closing can settle it
    connect: Arc<Mutex<Option<ConnectResponder>>>,
}

impl ManagedTransport {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(TransportState::New)),
            connect: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        self.transport.id()
    }

    pub fn direction(&self) -> TransportDirection {
        self.transport.direction()
    }

    pub fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Mark the transport closed, fail a connect nobody answered yet, then
    /// close the engine transport
    pub fn close(&self) {
        *lock(&self.state) = TransportState::Closed;

        if let Some(responder) = lock(&self.connect).take() {
            if responder.abandon(NegotiationError::SessionClosed).is_ok() {
                tracing::debug!("Failed pending connect on {} transport", self.direction());
            }
        }
        self.transport.close();
    }
}

impl std::fmt::Debug for ManagedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedTransport")
            .field("id", &self.id())
            .field("direction", &self.direction())
            .field("state", &self.state())
            .finish()
    }
}

/// At most one transport per direction
#[derive(Debug, Default)]
pub struct TransportPair {
    send: Option<ManagedTransport>,
    recv: Option<ManagedTransport>,
}

impl TransportPair {
    pub fn get(&self, direction: TransportDirection) -> Option<&ManagedTransport> {
        match direction {
            TransportDirection::Send => self.send.as_ref(),
            TransportDirection::Recv => self.recv.as_ref(),
        }
    }

    pub fn insert(&mut self, transport: ManagedTransport) -> Result<()> {
        let direction = transport.direction();
        let slot = match direction {
            TransportDirection::Send => &mut self.send,
            TransportDirection::Recv => &mut self.recv,
        };
        if slot.is_some() {
            return Err(SessionError::TransportExists(direction));
        }
        *slot = Some(transport);
        Ok(())
    }

    /// Close and forget both transports
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for transport in [self.send.take(), self.recv.take()].into_iter().flatten() {
            transport.close();
            tracing::debug!("Closed {} transport {}", transport.direction(), transport.id());
            closed += 1;
        }
        closed
    }
}

/// Relay the transport's `connect` signal onto the bus
///
/// The published event carries exactly the DTLS parameters and direction
/// present when the signal fired. Each transport connects at most once.
pub(crate) fn install_connect_relay(
    managed: &ManagedTransport,
    bus: EventBus,
    auto_complete: bool,
) {
    let direction = managed.direction();
    let state = managed.state.clone();
    let pending = managed.connect.clone();

    managed.transport.on_connect(Box::new(move |dtls_parameters, completion| {
        let mut current = lock(&state);
        match *current {
            TransportState::New => {}
            TransportState::Closed => {
                drop(current);
                tracing::debug!("Refusing connect on closed {} transport", direction);
                completion.reject(NegotiationError::SessionClosed);
                return;
            }
            other => {
                drop(current);
                tracing::warn!(
                    "Ignoring repeated connect on {} transport ({:?})",
                    direction,
                    other
                );
                completion.reject(NegotiationError::AlreadyAttempted);
                return;
            }
        }
        *current = TransportState::Connecting;

        let outcome_state = state.clone();
        let completion = completion.map_outcome(move |outcome| {
            let mut current = lock(&outcome_state);
            if *current != TransportState::Connecting {
                return;
            }
            *current = match outcome {
                Ok(()) => TransportState::Connected,
                Err(e) => {
                    tracing::warn!("{} transport connect failed: {}", direction, e);
                    TransportState::Failed
                }
            };
        });

        let responder = ConnectResponder::new(direction, completion);
        *lock(&pending) = Some(responder.clone());
        drop(current);

        tracing::debug!("Relaying connect for {} transport", direction);
        bus.publish(NegotiationEvent::Connect(ConnectEvent {
            payload: ConnectTransport {
                dtls_parameters,
                direction,
            },
            responder: responder.clone(),
        }));

        if auto_complete {
            if let Err(e) = responder.accept() {
                tracing::debug!("Connect on {} transport already settled: {}", direction, e);
            }
        }
    }));
}

/// Relay the send transport's `produce` signal onto the bus, parking its
/// completion in the ledger under a fresh correlation key
pub(crate) fn install_produce_relay(
    managed: &ManagedTransport,
    bus: EventBus,
    ledger: Arc<Mutex<PendingProduceLedger>>,
    keys: Arc<dyn KeyGenerator>,
) {
    let state = managed.state.clone();

    managed.transport.on_produce(Box::new(move |request, completion| {
        // Held until the entry is in the ledger so a concurrent close drains it
        let current = lock(&state);
        if *current == TransportState::Closed {
            drop(current);
            tracing::debug!("Refusing produce request on closed transport");
            completion.reject(NegotiationError::SessionClosed);
            return;
        }

        let producer_key = keys.next_key();
        let source = request.app_data.source;

        let inserted = lock(&ledger).insert(producer_key.clone(), completion);
        drop(current);
        if let Err((err, completion)) = inserted {
            tracing::error!("Refusing produce request: {}", err);
            completion.reject(err);
            return;
        }

        tracing::debug!("Produce request {} for {} pending", producer_key, source);
        bus.publish(NegotiationEvent::Produce(ProduceTransport {
            rtp_parameters: request.rtp_parameters,
            producer_key,
            source,
        }));
    }));
}
