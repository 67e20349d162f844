//! In-memory media engine
//!
//! Behaves like a real device as far as negotiation is concerned: it emits
//! `connect` once per transport before the first stream, emits `produce` for
//! every outbound stream, and only settles when the completions fire. No
//! media flows.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use relaycast_protocol::{
    ConsumerAppData, DtlsParameters, MediaKind, ProducerAppData, RtpCapabilities, RtpParameters,
    TransportDirection, TransportOptions,
};

use super::{
    Completion, Device, EngineConsumer, EngineProducer, LocalTrack, MediaEngine, OnConnectHdlrFn,
    OnProduceHdlrFn, ProduceRequest, Transport,
};
use crate::error::NegotiationError;
use crate::lock;

type ConnectHandler = Arc<dyn Fn(DtlsParameters, Completion<()>) + Send + Sync>;
type ProduceHandler = Arc<dyn Fn(ProduceRequest, Completion<String>) + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackEngine;

impl LoopbackEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn load(&self, router_capabilities: &RtpCapabilities) -> Result<Box<dyn Device>> {
        let codecs = router_capabilities
            .0
            .get("codecs")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("router capabilities must contain a codecs array"))?;

        tracing::debug!("Loopback device loaded with {} codecs", codecs.len());

        Ok(Box::new(LoopbackDevice {
            codecs: codecs.clone(),
        }))
    }
}

pub struct LoopbackDevice {
    codecs: Vec<serde_json::Value>,
}

impl Device for LoopbackDevice {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities(json!({
            "codecs": self.codecs,
            "headerExtensions": [],
        }))
    }

    fn create_send_transport(&self, options: &TransportOptions) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(LoopbackTransport::new(TransportDirection::Send, options)))
    }

    fn create_recv_transport(&self, options: &TransportOptions) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(LoopbackTransport::new(TransportDirection::Recv, options)))
    }
}

pub struct LoopbackTransport {
    id: String,
    direction: TransportDirection,
    dtls_parameters: DtlsParameters,
    connect_handler: Mutex<Option<ConnectHandler>>,
    produce_handler: Mutex<Option<ProduceHandler>>,
    /// Held across the connect round trip so concurrent streams wait for one handshake
    connected: tokio::sync::Mutex<bool>,
    closed: AtomicBool,
    next_mid: AtomicU32,
    producers: Mutex<Vec<Arc<LoopbackProducer>>>,
    consumers: Mutex<Vec<Arc<LoopbackConsumer>>>,
}

impl LoopbackTransport {
    fn new(direction: TransportDirection, options: &TransportOptions) -> Self {
        let id = options
            .0
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let dtls_parameters = options
            .0
            .get("dtlsParameters")
            .cloned()
            .map(DtlsParameters)
            .unwrap_or_else(|| DtlsParameters(json!({ "role": "auto", "fingerprints": [] })));

        Self {
            id,
            direction,
            dtls_parameters,
            connect_handler: Mutex::new(None),
            produce_handler: Mutex::new(None),
            connected: tokio::sync::Mutex::new(false),
            closed: AtomicBool::new(false),
            next_mid: AtomicU32::new(0),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }

        let handler = lock(&self.connect_handler)
            .clone()
            .ok_or_else(|| anyhow!("no connect listener on transport {}", self.id))?;

        let (completion, rx) = Completion::channel();
        handler(self.dtls_parameters.clone(), completion);

        match rx.await {
            Ok(Ok(())) => {
                *connected = true;
                tracing::debug!("Loopback transport {} connected", self.id);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(NegotiationError::Abandoned.into()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed() {
            bail!("transport {} is closed", self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn on_connect(&self, handler: OnConnectHdlrFn) {
        *lock(&self.connect_handler) = Some(Arc::from(handler));
    }

    fn on_produce(&self, handler: OnProduceHdlrFn) {
        *lock(&self.produce_handler) = Some(Arc::from(handler));
    }

    async fn produce(
        &self,
        track: LocalTrack,
        app_data: ProducerAppData,
    ) -> Result<Arc<dyn EngineProducer>> {
        if self.direction != TransportDirection::Send {
            bail!("cannot produce on a receive transport");
        }
        self.ensure_open()?;
        self.ensure_connected().await?;
        self.ensure_open()?;

        let handler = lock(&self.produce_handler)
            .clone()
            .ok_or_else(|| anyhow!("no produce listener on transport {}", self.id))?;

        let mid = self.next_mid.fetch_add(1, Ordering::SeqCst);
        let rtp_parameters = RtpParameters(json!({
            "mid": mid.to_string(),
            "kind": track.kind,
            "trackId": track.id,
            "codecs": [],
            "encodings": [{ "ssrc": 1000 + mid }],
        }));

        let (completion, rx) = Completion::channel();
        handler(
            ProduceRequest {
                kind: track.kind,
                rtp_parameters,
                app_data,
            },
            completion,
        );

        let id = match rx.await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(NegotiationError::Abandoned.into()),
        };
        self.ensure_open()?;

        let producer = Arc::new(LoopbackProducer {
            id,
            kind: track.kind,
            closed: AtomicBool::new(false),
        });
        lock(&self.producers).push(producer.clone());

        Ok(producer)
    }

    async fn consume(
        &self,
        rtp_parameters: RtpParameters,
        app_data: ConsumerAppData,
    ) -> Result<Arc<dyn EngineConsumer>> {
        if self.direction != TransportDirection::Recv {
            bail!("cannot consume on a send transport");
        }
        self.ensure_open()?;
        self.ensure_connected().await?;
        self.ensure_open()?;

        let id = rtp_parameters
            .0
            .get("consumerId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let consumer = Arc::new(LoopbackConsumer {
            id,
            kind: app_data.source.kind(),
            closed: AtomicBool::new(false),
        });
        lock(&self.consumers).push(consumer.clone());

        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for producer in lock(&self.producers).drain(..) {
            producer.close();
        }
        for consumer in lock(&self.consumers).drain(..) {
            consumer.close();
        }
        tracing::debug!("Loopback transport {} closed", self.id);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct LoopbackProducer {
    id: String,
    kind: MediaKind,
    closed: AtomicBool,
}

impl EngineProducer for LoopbackProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct LoopbackConsumer {
    id: String,
    kind: MediaKind,
    closed: AtomicBool,
}

impl EngineConsumer for LoopbackConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
