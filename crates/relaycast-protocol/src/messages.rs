use serde::{Deserialize, Serialize};

use crate::types::{
    ConnectTransport, DtlsParameters, ProduceTransport, RtpParameters, TrackSource,
    TransportDirection,
};

/// Negotiation requests sent from the client to the router's signaling endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Complete the DTLS handshake for one transport
    ConnectTransport {
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
    },

    /// Ask the router to accept a new outbound stream
    Produce {
        producer_key: String,
        source: TrackSource,
        rtp_parameters: RtpParameters,
    },
}

/// Negotiation responses sent from the router back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Transport handshake accepted
    TransportConnected { direction: TransportDirection },

    /// Transport handshake refused
    TransportConnectFailed {
        direction: TransportDirection,
        reason: String,
    },

    /// Produce request accepted; the router assigned an identifier
    Produced {
        producer_key: String,
        producer_id: String,
    },

    /// Error message
    Error { message: String },
}

impl From<ConnectTransport> for ClientMessage {
    fn from(event: ConnectTransport) -> Self {
        ClientMessage::ConnectTransport {
            direction: event.direction,
            dtls_parameters: event.dtls_parameters,
        }
    }
}

impl From<ProduceTransport> for ClientMessage {
    fn from(event: ProduceTransport) -> Self {
        ClientMessage::Produce {
            producer_key: event.producer_key,
            source: event.source,
            rtp_parameters: event.rtp_parameters,
        }
    }
}
