//! End-to-end session walkthrough
//!
//! Runs a session against the loopback engine. A fake router answers the
//! negotiation messages the signaling task forwards to it as JSON, the way a
//! WebSocket signaling channel would carry them.

use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaycast::engine::loopback::LoopbackEngine;
use relaycast::events::ConnectResponder;
use relaycast::protocol::{
    ClientMessage, InitOptions, MediaKind, RtpCapabilities, RtpParameters, ServerMessage,
    TrackSource, TransportOptions,
};
use relaycast::{LocalTrack, NegotiationEvent, Session, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaycast=debug,relaycast_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SessionConfig::load()?;
    let session = Session::with_config(Arc::new(LoopbackEngine::new()), config);

    let (to_router, router_rx) = mpsc::unbounded_channel::<String>();
    let (to_client, client_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(run_router(router_rx, to_client));
    tokio::spawn(run_signaling(session.clone(), to_router, client_rx));

    let capabilities = session
        .init(InitOptions {
            router_rtp_capabilities: RtpCapabilities(json!({
                "codecs": [
                    { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                    { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
                ]
            })),
            send_transport_options: Some(TransportOptions(json!({ "id": "send-transport" }))),
            recv_transport_options: Some(TransportOptions(json!({ "id": "recv-transport" }))),
        })
        .await?;
    tracing::info!("Client capabilities: {}", capabilities.0);

    let mic = session
        .produce(TrackSource::Microphone, LocalTrack::new("mic", MediaKind::Audio))
        .await?;
    let cam = session
        .produce(TrackSource::Camera, LocalTrack::new("cam", MediaKind::Video))
        .await?;
    tracing::info!("Producing {} and {}", mic.id(), cam.id());

    for source in [TrackSource::Camera, TrackSource::Microphone] {
        let consumer = session
            .consume(source, "remote-user", RtpParameters(json!({})))
            .await?;
        tracing::info!("Consuming {} from {} as {}", source, consumer.user_id(), consumer.id());
    }

    let closed = session
        .close_consumers(|c| c.source() == TrackSource::Camera)
        .await;
    tracing::info!("Closed camera consumers: {:?}", closed);

    session.close().await;
    Ok(())
}

/// Forward negotiation events to the router and apply its answers
async fn run_signaling(
    session: Session,
    to_router: mpsc::UnboundedSender<String>,
    mut from_router: mpsc::UnboundedReceiver<String>,
) {
    let mut events = session.subscribe();
    let mut pending_connects: HashMap<_, ConnectResponder> = HashMap::new();

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let message = match event {
                    NegotiationEvent::Connect(event) => {
                        pending_connects.insert(event.direction(), event.responder.clone());
                        ClientMessage::from(event.payload)
                    }
                    NegotiationEvent::Produce(request) => ClientMessage::from(request),
                };
                match serde_json::to_string(&message) {
                    Ok(json) => {
                        if to_router.send(json).is_err() {
                            tracing::error!("Router channel closed");
                            return;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize message: {}", e),
                }
            }
            Some(text) = from_router.recv() => {
                let Ok(message) = serde_json::from_str::<ServerMessage>(&text) else {
                    tracing::warn!("Unparseable router message: {}", text);
                    continue;
                };
                let result = match message {
                    ServerMessage::TransportConnected { direction } => pending_connects
                        .remove(&direction)
                        .map(|r| r.accept().map_err(|e| e.to_string()))
                        .unwrap_or(Ok(())),
                    ServerMessage::TransportConnectFailed { direction, reason } => pending_connects
                        .remove(&direction)
                        .map(|r| r.fail(reason).map_err(|e| e.to_string()))
                        .unwrap_or(Ok(())),
                    ServerMessage::Produced { producer_key, producer_id } => session
                        .resolve_produce_event(&producer_key, &producer_id)
                        .map_err(|e| e.to_string()),
                    ServerMessage::Error { message } => Err(message),
                };
                if let Err(e) = result {
                    tracing::warn!("Signaling error: {}", e);
                }
            }
            else => return,
        }
    }
}

/// Accept every handshake and hand out sequential producer ids
async fn run_router(
    mut requests: mpsc::UnboundedReceiver<String>,
    responses: mpsc::UnboundedSender<String>,
) {
    let mut next_id = 1;
    while let Some(text) = requests.recv().await {
        let response = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::ConnectTransport { direction, .. }) => {
                ServerMessage::TransportConnected { direction }
            }
            Ok(ClientMessage::Produce {
                producer_key,
                source,
                ..
            }) => {
                let producer_id = format!("{}-producer-{}", source, next_id);
                next_id += 1;
                ServerMessage::Produced {
                    producer_key,
                    producer_id,
                }
            }
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
            },
        };

        match serde_json::to_string(&response) {
            Ok(json) => {
                if responses.send(json).is_err() {
                    return;
                }
            }
            Err(e) => tracing::error!("Failed to serialize response: {}", e),
        }
    }
}
