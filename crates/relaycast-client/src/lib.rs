//! Relaycast client
//!
//! Client-side session manager for an SFU router. The session negotiates
//! transports through a pluggable media engine, publishes local tracks as
//! producers, subscribes to remote streams as consumers, and exposes the
//! `connect`/`produce` negotiation requests that a signaling layer must carry
//! to the router.

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use engine::{LocalTrack, MediaEngine};
pub use error::{NegotiationError, Result, SessionError};
pub use events::{ConnectEvent, EventBus, EventKind, EventReceiver, NegotiationEvent};
pub use ledger::{KeyGenerator, SequentialKeyGenerator, UuidKeyGenerator};
pub use registry::{Consumer, Producer};
pub use session::Session;
pub use transport::TransportState;

pub use relaycast_protocol as protocol;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
