use relaycast_protocol::TransportDirection;
use thiserror::Error;

/// Errors surfaced synchronously by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is not initialized")]
    NotInitialized,

    #[error("Device not loaded: {0}")]
    NotLoaded(String),

    #[error("Send transport must be set up to produce")]
    NoSendTransport,

    #[error("Receive transport must be set up to consume")]
    NoRecvTransport,

    #[error("No callback found for produce key '{0}'")]
    UnknownCorrelationKey(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("A {0} transport already exists")]
    TransportExists(TransportDirection),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Failure delivered through a negotiation completion handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Rejected by router: {0}")]
    Rejected(String),

    #[error("Session closed before negotiation completed")]
    SessionClosed,

    #[error("Negotiation abandoned")]
    Abandoned,

    #[error("Connect already attempted on this transport")]
    AlreadyAttempted,

    #[error("Negotiation already settled")]
    AlreadySettled,

    #[error("Correlation key '{0}' is already pending")]
    DuplicateKey(String),
}

impl From<NegotiationError> for SessionError {
    fn from(err: NegotiationError) -> Self {
        SessionError::NegotiationFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
