//! Session-level tests driven through the in-memory loopback engine
//!
//! Run with: cargo test -p relaycast-client --test session_tests

use std::collections::HashSet;
use std::sync::Arc;

use relaycast::engine::loopback::LoopbackEngine;
use relaycast::protocol::{
    InitOptions, MediaKind, RtpCapabilities, RtpParameters, TrackSource, TransportDirection,
    TransportOptions,
};
use relaycast::{
    EventKind, LocalTrack, NegotiationEvent, SequentialKeyGenerator, Session, SessionConfig,
    SessionError, TransportState,
};
use serde_json::json;
use tokio_test::{assert_pending, assert_ready};

fn router_capabilities() -> RtpCapabilities {
    RtpCapabilities(json!({
        "codecs": [
            { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
            { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
        ]
    }))
}

fn full_options() -> InitOptions {
    InitOptions {
        router_rtp_capabilities: router_capabilities(),
        send_transport_options: Some(TransportOptions(json!({ "id": "send-1" }))),
        recv_transport_options: Some(TransportOptions(json!({ "id": "recv-1" }))),
    }
}

fn new_session(config: SessionConfig) -> Session {
    Session::with_config(Arc::new(LoopbackEngine::new()), config)
        .with_key_generator(Arc::new(SequentialKeyGenerator::new("key")))
}

fn mic() -> LocalTrack {
    LocalTrack::new("mic-track", MediaKind::Audio)
}

fn camera() -> LocalTrack {
    LocalTrack::new("camera-track", MediaKind::Video)
}

/// Stand-in for the signaling layer and router: accepts every connect and
/// assigns `producer-<n>` ids in arrival order
fn spawn_router(session: &Session) -> tokio::task::JoinHandle<()> {
    let mut events = session.subscribe();
    let session = session.clone();
    tokio::spawn(async move {
        let mut produced = 0;
        while let Some(event) = events.recv().await {
            match event {
                NegotiationEvent::Connect(event) => {
                    let _ = event.responder.accept();
                }
                NegotiationEvent::Produce(request) => {
                    produced += 1;
                    let _ = session.resolve_produce_event(
                        &request.producer_key,
                        &format!("producer-{}", produced),
                    );
                }
            }
        }
    })
}

#[tokio::test]
async fn test_init_returns_client_capabilities() {
    let session = new_session(SessionConfig::default());
    let caps = session.init(full_options()).await.unwrap();

    assert_eq!(caps.0["codecs"][1]["mimeType"], "video/VP8");
    assert!(session.is_initialized().await);
    assert_eq!(
        session.transport_state(TransportDirection::Send).await,
        Some(TransportState::New)
    );
    assert_eq!(session.rtp_capabilities().await, Some(caps));
}

#[tokio::test]
async fn test_produce_requires_send_transport() {
    let session = new_session(SessionConfig::default());
    session
        .init(InitOptions {
            router_rtp_capabilities: router_capabilities(),
            send_transport_options: None,
            recv_transport_options: Some(TransportOptions::default()),
        })
        .await
        .unwrap();

    let result = session.produce(TrackSource::Microphone, mic()).await;
    assert!(matches!(result, Err(SessionError::NoSendTransport)));

    // Once the send transport exists the same call goes through end to end
    let _router = spawn_router(&session);
    session
        .create_send_transport(&TransportOptions::default())
        .await
        .unwrap();
    let producer = session.produce(TrackSource::Microphone, mic()).await.unwrap();

    assert_eq!(producer.id(), "producer-1");
    assert_eq!(producer.source(), TrackSource::Microphone);
    assert_eq!(
        session.transport_state(TransportDirection::Send).await,
        Some(TransportState::Connected)
    );
}

#[tokio::test]
async fn test_consume_requires_recv_transport() {
    let session = new_session(SessionConfig::default());
    session
        .init(InitOptions {
            router_rtp_capabilities: router_capabilities(),
            send_transport_options: Some(TransportOptions::default()),
            recv_transport_options: None,
        })
        .await
        .unwrap();

    let result = session
        .consume(TrackSource::Camera, "alice", RtpParameters::default())
        .await;
    assert!(matches!(result, Err(SessionError::NoRecvTransport)));
}

#[tokio::test]
async fn test_produce_settles_only_after_resolution() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();
    let mut events = session.subscribe();

    let mut produce = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(produce.poll());

    let NegotiationEvent::Connect(connect) = events.try_recv().unwrap() else {
        panic!("expected connect event first");
    };
    assert_eq!(connect.direction(), TransportDirection::Send);
    connect.responder.accept().unwrap();
    assert!(produce.is_woken());
    assert_pending!(produce.poll());

    let NegotiationEvent::Produce(request) = events.try_recv().unwrap() else {
        panic!("expected produce event");
    };
    assert_eq!(request.producer_key, "key-1");
    assert_eq!(request.source, TrackSource::Camera);
    assert_eq!(request.rtp_parameters.0["kind"], "video");
    assert_eq!(session.pending_produce_count(), 1);

    session
        .resolve_produce_event(&request.producer_key, "producer-123")
        .unwrap();

    let producer = assert_ready!(produce.poll()).unwrap();
    assert_eq!(producer.id(), "producer-123");
    assert_eq!(session.pending_produce_count(), 0);
    assert!(session.producer("producer-123").await.is_some());
}

#[tokio::test]
async fn test_resolving_unknown_key_fails_without_side_effects() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();
    let _router = spawn_router(&session);
    session.produce(TrackSource::Microphone, mic()).await.unwrap();

    let result = session.resolve_produce_event("nonexistent-key", "x");
    assert!(matches!(
        result,
        Err(SessionError::UnknownCorrelationKey(key)) if key == "nonexistent-key"
    ));
    assert_eq!(session.producers().await.len(), 1);
    assert!(session.consumers().await.is_empty());
}

#[tokio::test]
async fn test_resolving_twice_fails() {
    let session = new_session(SessionConfig {
        auto_complete_connect: true,
        ..SessionConfig::default()
    });
    session.init(full_options()).await.unwrap();
    let mut events = session.subscribe_kind(EventKind::Produce);

    let mut produce = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(produce.poll());

    let NegotiationEvent::Produce(request) = events.try_recv().unwrap() else {
        panic!("expected produce event");
    };
    session
        .resolve_produce_event(&request.producer_key, "p1")
        .unwrap();
    assert!(assert_ready!(produce.poll()).is_ok());

    let second = session.resolve_produce_event(&request.producer_key, "p1");
    assert!(matches!(second, Err(SessionError::UnknownCorrelationKey(_))));
}

#[tokio::test]
async fn test_correlation_keys_are_never_reused() {
    let session = new_session(SessionConfig::default());
    let mut requests = session.subscribe_kind(EventKind::Produce);
    let _router = spawn_router(&session);

    for _ in 0..2 {
        session.init(full_options()).await.unwrap();
        for _ in 0..5 {
            session.produce(TrackSource::Microphone, mic()).await.unwrap();
        }
        session.close().await;
    }

    let keys: Vec<String> = std::iter::from_fn(|| requests.try_recv().ok())
        .map(|event| match event {
            NegotiationEvent::Produce(request) => request.producer_key,
            other => panic!("unexpected event: {:?}", other),
        })
        .collect();
    let unique: HashSet<&String> = keys.iter().collect();

    assert_eq!(keys.len(), 10);
    assert_eq!(unique.len(), 10);
}

#[tokio::test]
async fn test_close_consumers_by_source() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();
    let _router = spawn_router(&session);

    let cam = session
        .consume(TrackSource::Camera, "alice", RtpParameters(json!({})))
        .await
        .unwrap();
    let audio = session
        .consume(TrackSource::Microphone, "alice", RtpParameters(json!({})))
        .await
        .unwrap();
    assert_ne!(cam.id(), audio.id());
    assert_eq!(session.consumers().await.len(), 2);

    let closed = session
        .close_consumers(|c| c.source() == TrackSource::Camera)
        .await;

    assert_eq!(closed, vec![cam.id().to_string()]);
    assert!(cam.closed());
    assert!(!audio.closed());
    assert!(session.consumer(cam.id()).await.is_none());
    let remaining = session.consumer(audio.id()).await.unwrap();
    assert_eq!(remaining.user_id(), "alice");
    assert_eq!(remaining.source(), TrackSource::Microphone);
}

#[tokio::test]
async fn test_close_producers_keeps_non_matching() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();
    let _router = spawn_router(&session);

    let audio = session.produce(TrackSource::Microphone, mic()).await.unwrap();
    let video = session.produce(TrackSource::Camera, camera()).await.unwrap();
    let screen = session
        .produce(
            TrackSource::ScreenshareVideo,
            LocalTrack::new("screen", MediaKind::Video),
        )
        .await
        .unwrap();

    let closed = session
        .close_producers(|p| p.kind() == MediaKind::Video)
        .await;
    let closed: HashSet<String> = closed.into_iter().collect();

    assert_eq!(
        closed,
        HashSet::from([video.id().to_string(), screen.id().to_string()])
    );
    for id in &closed {
        assert!(session.producer(id).await.is_none());
    }
    let kept = session.producer(audio.id()).await.unwrap();
    assert!(!kept.closed());
    assert_eq!(kept.source(), TrackSource::Microphone);

    assert!(session.close_producers(|_| true).await.len() == 1);
    assert!(session.producers().await.is_empty());
}

#[tokio::test]
async fn test_operations_after_close_fail_predictably() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();
    let _router = spawn_router(&session);
    let producer = session.produce(TrackSource::Microphone, mic()).await.unwrap();

    session.close().await;
    assert!(producer.closed());
    assert!(!session.is_initialized().await);
    assert_eq!(session.transport_state(TransportDirection::Send).await, None);

    let produce = session.produce(TrackSource::Microphone, mic()).await;
    assert!(matches!(produce, Err(SessionError::NotInitialized)));

    let consume = session
        .consume(TrackSource::Camera, "bob", RtpParameters::default())
        .await;
    assert!(matches!(consume, Err(SessionError::NotInitialized)));

    let transport = session
        .create_recv_transport(&TransportOptions::default())
        .await;
    assert!(matches!(transport, Err(SessionError::NotInitialized)));

    assert!(session.close_producers(|_| true).await.is_empty());

    // Closing again is harmless, and the session can be initialized anew
    session.close().await;
    assert!(session.init(full_options()).await.is_ok());
}

#[tokio::test]
async fn test_double_init_fails_with_not_loaded() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();

    let second = session.init(full_options()).await;
    assert!(matches!(second, Err(SessionError::NotLoaded(_))));
}

#[tokio::test]
async fn test_malformed_capabilities_fail_with_not_loaded() {
    let session = new_session(SessionConfig::default());
    let result = session
        .init(InitOptions {
            router_rtp_capabilities: RtpCapabilities(json!({ "codecs": "opus" })),
            ..InitOptions::default()
        })
        .await;

    assert!(matches!(result, Err(SessionError::NotLoaded(_))));
    assert!(!session.is_initialized().await);
}

#[tokio::test]
async fn test_second_transport_of_same_direction_is_refused() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();

    let result = session
        .create_send_transport(&TransportOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(SessionError::TransportExists(TransportDirection::Send))
    ));
}

#[tokio::test]
async fn test_close_rejects_pending_produce_requests() {
    let session = new_session(SessionConfig {
        auto_complete_connect: true,
        ..SessionConfig::default()
    });
    session.init(full_options()).await.unwrap();

    let mut produce = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(produce.poll());
    assert_eq!(session.pending_produce_count(), 1);

    session.close().await;
    assert_eq!(session.pending_produce_count(), 0);

    let result = assert_ready!(produce.poll());
    match result {
        Err(SessionError::NegotiationFailed(msg)) => assert!(msg.contains("Session closed")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_close_can_drop_pending_produce_requests() {
    let session = new_session(SessionConfig {
        auto_complete_connect: true,
        reject_pending_on_close: false,
    });
    session.init(full_options()).await.unwrap();

    let mut produce = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(produce.poll());

    session.close().await;

    let result = assert_ready!(produce.poll());
    match result {
        Err(SessionError::NegotiationFailed(msg)) => assert!(msg.contains("abandoned")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_close_while_connecting_settles_produce() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();
    let mut events = session.subscribe();

    let mut produce = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(produce.poll());

    let connect = match events.try_recv() {
        Ok(NegotiationEvent::Connect(event)) => event,
        other => panic!("expected connect event, got {:?}", other),
    };
    assert_eq!(session.pending_produce_count(), 0);

    session.close().await;

    let result = assert_ready!(produce.poll());
    match result {
        Err(SessionError::NegotiationFailed(msg)) => assert!(msg.contains("Session closed")),
        other => panic!("unexpected result: {:?}", other),
    }

    // The signaling layer answers after the session is gone
    assert!(connect.responder.accept().is_err());
    assert_eq!(session.pending_produce_count(), 0);
    assert!(events.try_recv().is_err());

    session.init(full_options()).await.unwrap();
    assert_eq!(session.pending_produce_count(), 0);
    assert_eq!(
        session.transport_state(TransportDirection::Send).await,
        Some(TransportState::New)
    );
}

#[tokio::test]
async fn test_rejected_produce_leaves_other_requests_pending() {
    let session = new_session(SessionConfig {
        auto_complete_connect: true,
        ..SessionConfig::default()
    });
    session.init(full_options()).await.unwrap();
    let mut requests = session.subscribe_kind(EventKind::Produce);

    let mut first = tokio_test::task::spawn(session.produce(TrackSource::Microphone, mic()));
    let mut second = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    let mut keys = Vec::new();
    while let Ok(NegotiationEvent::Produce(request)) = requests.try_recv() {
        keys.push((request.source, request.producer_key));
    }
    assert_eq!(keys.len(), 2);
    let key_for = |source: TrackSource| {
        keys.iter()
            .find(|(s, _)| *s == source)
            .map(|(_, k)| k.clone())
            .unwrap()
    };

    session
        .reject_produce_event(&key_for(TrackSource::Microphone), "quota exceeded")
        .unwrap();
    match assert_ready!(first.poll()) {
        Err(SessionError::NegotiationFailed(msg)) => assert!(msg.contains("quota exceeded")),
        other => panic!("unexpected result: {:?}", other),
    }

    assert_pending!(second.poll());
    assert_eq!(session.pending_produce_count(), 1);
    session
        .resolve_produce_event(&key_for(TrackSource::Camera), "producer-cam")
        .unwrap();
    assert_eq!(assert_ready!(second.poll()).unwrap().id(), "producer-cam");
    assert!(session.producer("producer-mic").await.is_none());
}

#[tokio::test]
async fn test_resolution_after_caller_gave_up_still_clears_key() {
    let session = new_session(SessionConfig {
        auto_complete_connect: true,
        ..SessionConfig::default()
    });
    session.init(full_options()).await.unwrap();
    let mut requests = session.subscribe_kind(EventKind::Produce);

    let mut produce = tokio_test::task::spawn(session.produce(TrackSource::Camera, camera()));
    assert_pending!(produce.poll());
    drop(produce);

    let NegotiationEvent::Produce(request) = requests.try_recv().unwrap() else {
        panic!("expected produce event");
    };

    // Delivery fails, the failure path runs, and the key is gone either way
    session
        .resolve_produce_event(&request.producer_key, "late")
        .unwrap();
    assert_eq!(session.pending_produce_count(), 0);
    assert!(session.producers().await.is_empty());
    assert!(matches!(
        session.resolve_produce_event(&request.producer_key, "late"),
        Err(SessionError::UnknownCorrelationKey(_))
    ));
}

#[tokio::test]
async fn test_connect_is_one_shot_per_transport() {
    let session = new_session(SessionConfig::default());
    session.init(full_options()).await.unwrap();

    let mut events = session.subscribe();
    let connects = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(event) = events.recv().await {
            if let NegotiationEvent::Connect(event) = event {
                seen += 1;
                event.responder.fail("dtls mismatch").unwrap();
            }
            if seen == 1 {
                break;
            }
        }
        seen
    });

    let first = session.produce(TrackSource::Microphone, mic()).await;
    match first {
        Err(SessionError::NegotiationFailed(msg)) => assert!(msg.contains("dtls mismatch")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(connects.await.unwrap(), 1);
    assert_eq!(
        session.transport_state(TransportDirection::Send).await,
        Some(TransportState::Failed)
    );

    let second = session.produce(TrackSource::Microphone, mic()).await;
    match second {
        Err(SessionError::NegotiationFailed(msg)) => assert!(msg.contains("already attempted")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_connect_events_carry_each_direction() {
    let session = new_session(SessionConfig::default());
    session
        .init(InitOptions {
            router_rtp_capabilities: router_capabilities(),
            send_transport_options: Some(TransportOptions(json!({
                "id": "send-1",
                "dtlsParameters": { "role": "client", "fingerprints": ["aa"] }
            }))),
            recv_transport_options: Some(TransportOptions(json!({
                "id": "recv-1",
                "dtlsParameters": { "role": "server", "fingerprints": ["bb"] }
            }))),
        })
        .await
        .unwrap();

    let mut connects = session.subscribe_kind(EventKind::Connect);
    let _router = spawn_router(&session);

    session.produce(TrackSource::Microphone, mic()).await.unwrap();
    session
        .consume(TrackSource::Microphone, "carol", RtpParameters(json!({})))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(NegotiationEvent::Connect(event)) = connects.try_recv() {
        seen.push((event.direction(), event.dtls_parameters().0["role"].clone()));
    }
    assert_eq!(
        seen,
        vec![
            (TransportDirection::Send, json!("client")),
            (TransportDirection::Recv, json!("server")),
        ]
    );
    assert_eq!(
        session.transport_state(TransportDirection::Recv).await,
        Some(TransportState::Connected)
    );
}
