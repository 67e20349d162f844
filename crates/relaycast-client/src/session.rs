//! SFU client session
//!
//! Mediates between a local media engine and a remote router: loads the
//! router's capabilities, owns the send/receive transports, relays their
//! negotiation signals onto the [`EventBus`], and keeps track of every
//! producer and consumer it created.

use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use relaycast_protocol::{
    ConsumerAppData, InitOptions, ProducerAppData, RtpCapabilities, RtpParameters, TrackSource,
    TransportDirection, TransportOptions,
};

use crate::capabilities::CapabilityNegotiator;
use crate::config::SessionConfig;
use crate::engine::{LocalTrack, MediaEngine, Transport};
use crate::error::{NegotiationError, Result, SessionError};
use crate::events::{EventBus, EventKind, EventReceiver};
use crate::ledger::{KeyGenerator, PendingProduceLedger, UuidKeyGenerator};
use crate::lock;
use crate::registry::{Consumer, Producer, Registry};
use crate::transport::{
    install_connect_relay, install_produce_relay, ManagedTransport, TransportPair, TransportState,
};

/// Client-side session against one SFU router
///
/// Cheap to clone; clones share all state. Locks are always taken in the
/// order negotiator, transports, producers, consumers.
#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    negotiator: Arc<RwLock<CapabilityNegotiator>>,
    transports: Arc<RwLock<TransportPair>>,
    producers: Arc<RwLock<Registry<Producer>>>,
    consumers: Arc<RwLock<Registry<Consumer>>>,
    ledger: Arc<Mutex<PendingProduceLedger>>,
    keys: Arc<dyn KeyGenerator>,
    events: EventBus,
}

impl Session {
    /// Create a session with the default configuration
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self::with_config(engine, SessionConfig::default())
    }

    pub fn with_config(engine: Arc<dyn MediaEngine>, config: SessionConfig) -> Self {
        Self {
            config,
            negotiator: Arc::new(RwLock::new(CapabilityNegotiator::new(engine))),
            transports: Arc::new(RwLock::new(TransportPair::default())),
            producers: Arc::new(RwLock::new(Registry::new())),
            consumers: Arc::new(RwLock::new(Registry::new())),
            ledger: Arc::new(Mutex::new(PendingProduceLedger::new())),
            keys: Arc::new(UuidKeyGenerator),
            events: EventBus::new(),
        }
    }

    /// Replace the correlation key source
    pub fn with_key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to both `connect` and `produce` events
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn subscribe_kind(&self, kind: EventKind) -> EventReceiver {
        self.events.subscribe_kind(kind)
    }

    /// Load the router's capabilities, create the transports named in
    /// `options`, and return this client's capabilities
    pub async fn init(&self, options: InitOptions) -> Result<RtpCapabilities> {
        let client_capabilities = self
            .negotiator
            .write()
            .await
            .load(&options.router_rtp_capabilities)
            .await?;

        if let Some(send_options) = &options.send_transport_options {
            self.create_send_transport(send_options).await?;
        }
        if let Some(recv_options) = &options.recv_transport_options {
            self.create_recv_transport(recv_options).await?;
        }

        tracing::info!("Session initialized");
        Ok(client_capabilities)
    }

    pub async fn create_send_transport(&self, options: &TransportOptions) -> Result<()> {
        self.create_transport(TransportDirection::Send, options).await
    }

    pub async fn create_recv_transport(&self, options: &TransportOptions) -> Result<()> {
        self.create_transport(TransportDirection::Recv, options).await
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        options: &TransportOptions,
    ) -> Result<()> {
        let negotiator = self.negotiator.read().await;
        let device = negotiator.device()?;
        let mut transports = self.transports.write().await;

        if transports.get(direction).is_some() {
            return Err(SessionError::TransportExists(direction));
        }

        let transport = match direction {
            TransportDirection::Send => device.create_send_transport(options),
            TransportDirection::Recv => device.create_recv_transport(options),
        }
        .map_err(|e| SessionError::NegotiationFailed(format!("{:#}", e)))?;

        let managed = ManagedTransport::new(transport);
        install_connect_relay(
            &managed,
            self.events.clone(),
            self.config.auto_complete_connect,
        );
        if direction == TransportDirection::Send {
            install_produce_relay(
                &managed,
                self.events.clone(),
                self.ledger.clone(),
                self.keys.clone(),
            );
        }

        tracing::info!("Created {} transport {}", direction, managed.id());
        transports.insert(managed)
    }

    /// Engine transport for `direction`, checking the session is initialized
    async fn transport_for(&self, direction: TransportDirection) -> Result<Arc<dyn Transport>> {
        if !self.negotiator.read().await.is_loaded() {
            return Err(SessionError::NotInitialized);
        }

        self.transports
            .read()
            .await
            .get(direction)
            .map(|t| t.transport())
            .ok_or(match direction {
                TransportDirection::Send => SessionError::NoSendTransport,
                TransportDirection::Recv => SessionError::NoRecvTransport,
            })
    }

    /// Whether `transport` is still the session's live transport for its direction
    fn is_current(transports: &TransportPair, transport: &Arc<dyn Transport>) -> bool {
        transports
            .get(transport.direction())
            .is_some_and(|t| Arc::ptr_eq(&t.transport(), transport) && !transport.closed())
    }

    /// Publish a local track
    ///
    /// Settles once the signaling layer resolves the `produce` event raised
    /// for it (and the transport's `connect`, the first time).
    pub async fn produce(&self, source: TrackSource, track: LocalTrack) -> Result<Producer> {
        let transport = self.transport_for(TransportDirection::Send).await?;

        let engine_producer = transport
            .produce(track, ProducerAppData { source })
            .await
            .map_err(|e| SessionError::NegotiationFailed(format!("{:#}", e)))?;

        let transports = self.transports.read().await;
        if !Self::is_current(&transports, &transport) {
            engine_producer.close();
            return Err(SessionError::NotInitialized);
        }

        let producer = Producer::new(engine_producer, source);
        self.producers.write().await.insert(producer.clone());

        tracing::info!("Producing {} as {}", source, producer.id());
        Ok(producer)
    }

    /// Subscribe to a remote stream published by `user_id`
    pub async fn consume(
        &self,
        source: TrackSource,
        user_id: impl Into<String>,
        rtp_parameters: RtpParameters,
    ) -> Result<Consumer> {
        let user_id = user_id.into();
        let transport = self.transport_for(TransportDirection::Recv).await?;

        let engine_consumer = transport
            .consume(
                rtp_parameters,
                ConsumerAppData {
                    source,
                    user_id: user_id.clone(),
                },
            )
            .await
            .map_err(|e| SessionError::NegotiationFailed(format!("{:#}", e)))?;

        let transports = self.transports.read().await;
        if !Self::is_current(&transports, &transport) {
            engine_consumer.close();
            return Err(SessionError::NotInitialized);
        }

        let consumer = Consumer::new(engine_consumer, source, user_id);
        self.consumers.write().await.insert(consumer.clone());

        tracing::info!(
            "Consuming {} from user {} as {}",
            source,
            consumer.user_id(),
            consumer.id()
        );
        Ok(consumer)
    }

    /// Hand the router-assigned producer id to the request waiting on `key`
    ///
    /// Fails with `UnknownCorrelationKey` for keys that were never issued or
    /// are already resolved; callers must not retry. If delivering the id
    /// fails, the request's failure path runs instead. Either way the key is
    /// gone afterwards.
    pub fn resolve_produce_event(&self, key: &str, producer_id: &str) -> Result<()> {
        let completion = lock(&self.ledger).take(key)?;

        match completion.settle(producer_id.to_string()) {
            Ok(()) => tracing::debug!("Produce request {} resolved as {}", key, producer_id),
            Err(e) => tracing::warn!("Produce request {} could not be resolved: {}", key, e),
        }
        Ok(())
    }

    /// Report that the router refused the produce request waiting on `key`
    pub fn reject_produce_event(&self, key: &str, reason: impl Into<String>) -> Result<()> {
        let completion = lock(&self.ledger).take(key)?;
        let reason = reason.into();

        tracing::debug!("Produce request {} rejected: {}", key, reason);
        completion.reject(NegotiationError::Rejected(reason));
        Ok(())
    }

    /// Close every producer matching `predicate`, returning the closed ids
    pub async fn close_producers<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&Producer) -> bool,
    {
        let snapshot = self.producers.read().await.snapshot();
        let targets: Vec<String> = snapshot
            .iter()
            .filter(|p| predicate(p))
            .map(|p| p.id().to_string())
            .collect();

        if targets.is_empty() {
            return targets;
        }

        let closed = self.producers.write().await.close_ids(&targets);
        tracing::info!("Closed {} producers", closed.len());
        closed
    }

    /// Close every consumer matching `predicate`, returning the closed ids
    pub async fn close_consumers<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&Consumer) -> bool,
    {
        let snapshot = self.consumers.read().await.snapshot();
        let targets: Vec<String> = snapshot
            .iter()
            .filter(|c| predicate(c))
            .map(|c| c.id().to_string())
            .collect();

        if targets.is_empty() {
            return targets;
        }

        let closed = self.consumers.write().await.close_ids(&targets);
        tracing::info!("Closed {} consumers", closed.len());
        closed
    }

    /// Tear the session down: producers, consumers, transports, then the
    /// device. Unanswered connects fail with `SessionClosed`. Requests still
    /// in the ledger are rejected with `SessionClosed` or dropped, depending
    /// on configuration.
    pub async fn close(&self) {
        let mut negotiator = self.negotiator.write().await;
        let mut transports = self.transports.write().await;

        let producers = self.producers.write().await.close_all();
        let consumers = self.consumers.write().await.close_all();
        let closed_transports = transports.close_all();
        let had_device = negotiator.release();
        let pending = lock(&self.ledger).drain();

        drop(transports);
        drop(negotiator);

        if !pending.is_empty() {
            if self.config.reject_pending_on_close {
                for (key, completion) in pending {
                    tracing::debug!("Rejecting pending produce request {}", key);
                    completion.reject(NegotiationError::SessionClosed);
                }
            } else {
                tracing::warn!("Dropping {} pending produce requests", pending.len());
            }
        }

        if had_device {
            tracing::info!(
                "Session closed ({} producers, {} consumers, {} transports)",
                producers.len(),
                consumers.len(),
                closed_transports
            );
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.negotiator.read().await.is_loaded()
    }

    /// This client's capabilities, if the device is loaded
    pub async fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.negotiator.read().await.rtp_capabilities()
    }

    pub async fn transport_state(&self, direction: TransportDirection) -> Option<TransportState> {
        self.transports.read().await.get(direction).map(|t| t.state())
    }

    pub async fn producers(&self) -> Vec<Producer> {
        self.producers.read().await.snapshot()
    }

    pub async fn consumers(&self) -> Vec<Consumer> {
        self.consumers.read().await.snapshot()
    }

    pub async fn producer(&self, id: &str) -> Option<Producer> {
        self.producers.read().await.get(id).cloned()
    }

    pub async fn consumer(&self, id: &str) -> Option<Consumer> {
        self.consumers.read().await.get(id).cloned()
    }

    /// Number of produce requests waiting for `resolve_produce_event`
    pub fn pending_produce_count(&self) -> usize {
        lock(&self.ledger).len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
