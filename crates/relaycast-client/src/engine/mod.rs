//! Media engine capability interface
//!
//! The session core never touches codecs, ICE or DTLS itself. It drives a
//! media engine through these traits; any conformant implementation can be
//! plugged in. [`loopback::LoopbackEngine`] is a complete in-memory one.

pub mod loopback;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use relaycast_protocol::{
    ConsumerAppData, DtlsParameters, MediaKind, ProducerAppData, RtpCapabilities, RtpParameters,
    TransportDirection, TransportOptions,
};

use crate::error::NegotiationError;
use crate::lock;

type ResolveFn<T> = Box<dyn FnOnce(T) -> std::result::Result<(), NegotiationError> + Send>;
type RejectFn = Box<dyn FnOnce(NegotiationError) + Send>;

/// Resolve/reject pair handed out with every negotiation signal
///
/// Exactly one of the two paths runs, except when resolving itself fails:
/// [`Completion::settle`] then falls through to the reject path.
pub struct Completion<T> {
    resolve: ResolveFn<T>,
    reject: RejectFn,
}

impl<T: Send + 'static> Completion<T> {
    pub fn new<R, E>(resolve: R, reject: E) -> Self
    where
        R: FnOnce(T) -> std::result::Result<(), NegotiationError> + Send + 'static,
        E: FnOnce(NegotiationError) + Send + 'static,
    {
        Self {
            resolve: Box::new(resolve),
            reject: Box::new(reject),
        }
    }

    /// Completion backed by a oneshot channel. The receiver yields the
    /// outcome, or a `RecvError` if the completion is dropped unsettled.
    pub fn channel() -> (
        Self,
        oneshot::Receiver<std::result::Result<T, NegotiationError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let reject_tx = tx.clone();

        let completion = Self::new(
            move |value| {
                let sender = lock(&tx).take().ok_or(NegotiationError::AlreadySettled)?;
                sender.send(Ok(value)).map_err(|_| NegotiationError::Abandoned)
            },
            move |err| {
                if let Some(sender) = lock(&reject_tx).take() {
                    let _ = sender.send(Err(err));
                }
            },
        );

        (completion, rx)
    }

    /// Run the resolve path; on failure run the reject path with the same error
    pub fn settle(self, value: T) -> std::result::Result<(), NegotiationError> {
        let Completion { resolve, reject } = self;
        match resolve(value) {
            Ok(()) => Ok(()),
            Err(err) => {
                reject(err.clone());
                Err(err)
            }
        }
    }

    pub fn reject(self, err: NegotiationError) {
        (self.reject)(err)
    }

    /// Wrap both paths, e.g. to observe the outcome before forwarding it
    pub fn map_outcome<F>(self, observe: F) -> Self
    where
        F: Fn(std::result::Result<(), &NegotiationError>) + Send + Sync + 'static,
    {
        let Completion { resolve, reject } = self;
        let observe = Arc::new(observe);
        let observe_reject = observe.clone();

        Self::new(
            move |value| {
                let result = resolve(value);
                observe(result.as_ref().map(|_| ()));
                result
            },
            move |err| {
                observe_reject(Err(&err));
                reject(err)
            },
        )
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Local media track handed to the engine for publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Data attached to a transport's `produce` signal
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_data: ProducerAppData,
}

/// Handler for a transport's `connect` signal
pub type OnConnectHdlrFn = Box<dyn Fn(DtlsParameters, Completion<()>) + Send + Sync>;

/// Handler for a transport's `produce` signal; resolves with the router-assigned id
pub type OnProduceHdlrFn = Box<dyn Fn(ProduceRequest, Completion<String>) + Send + Sync>;

/// Entry point of a media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Load the router's capabilities. Malformed capabilities are an error.
    async fn load(&self, router_capabilities: &RtpCapabilities) -> Result<Box<dyn Device>>;
}

/// A loaded media engine device
pub trait Device: Send + Sync {
    /// Capabilities of this client, to be sent to the router
    fn rtp_capabilities(&self) -> RtpCapabilities;

    fn create_send_transport(&self, options: &TransportOptions) -> Result<Arc<dyn Transport>>;

    fn create_recv_transport(&self, options: &TransportOptions) -> Result<Arc<dyn Transport>>;
}

/// One direction of the routing connection
///
/// The transport raises `connect` before its first stream and `produce`
/// for every outbound stream. Both settle only when the handed-out
/// [`Completion`] runs.
#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> &str;

    fn direction(&self) -> TransportDirection;

    fn on_connect(&self, handler: OnConnectHdlrFn);

    fn on_produce(&self, handler: OnProduceHdlrFn);

    async fn produce(
        &self,
        track: LocalTrack,
        app_data: ProducerAppData,
    ) -> Result<Arc<dyn EngineProducer>>;

    async fn consume(
        &self,
        rtp_parameters: RtpParameters,
        app_data: ConsumerAppData,
    ) -> Result<Arc<dyn EngineConsumer>>;

    /// Close the transport and every stream created on it
    fn close(&self);

    fn closed(&self) -> bool;
}

/// Engine-side outbound stream
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn close(&self);
    fn closed(&self) -> bool;
}

/// Engine-side inbound stream
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn close(&self);
    fn closed(&self) -> bool;
}
