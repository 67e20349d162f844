use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of the routing connection a transport carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl TransportDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a published or subscribed track comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenshareAudio,
    ScreenshareVideo,
}

impl TrackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackSource::Microphone => "microphone",
            TrackSource::Camera => "camera",
            TrackSource::ScreenshareAudio => "screenshare-audio",
            TrackSource::ScreenshareVideo => "screenshare-video",
        }
    }

    /// Media kind carried by tracks of this source
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackSource::Microphone | TrackSource::ScreenshareAudio => MediaKind::Audio,
            TrackSource::Camera | TrackSource::ScreenshareVideo => MediaKind::Video,
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Router RTP capabilities, opaque to the session core
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

/// RTP parameters of a single stream, opaque to the session core
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// DTLS handshake parameters, opaque to the session core
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

/// Server-issued options for creating a transport (ICE/DTLS setup)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportOptions(pub Value);

/// Options passed to session initialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOptions {
    pub router_rtp_capabilities: RtpCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_transport_options: Option<TransportOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv_transport_options: Option<TransportOptions>,
}

/// Payload of a `connect` negotiation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub dtls_parameters: DtlsParameters,
    pub direction: TransportDirection,
}

/// Payload of a `produce` negotiation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceTransport {
    pub rtp_parameters: RtpParameters,
    pub producer_key: String,
    pub source: TrackSource,
}

/// Application data attached to a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerAppData {
    pub source: TrackSource,
}

/// Application data attached to a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerAppData {
    pub source: TrackSource,
    #[serde(rename = "userID")]
    pub user_id: String,
}
