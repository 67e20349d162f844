//! Relaycast protocol definitions
//!
//! Types shared between the session core and whatever signaling layer
//! carries negotiation payloads to the router.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
