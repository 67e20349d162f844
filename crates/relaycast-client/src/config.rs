//! Session configuration
//!
//! Defaults can be overridden through `RELAYCAST_*` environment variables.

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reject produce requests still pending at close with
    /// `NegotiationError::SessionClosed` instead of dropping them
    pub reject_pending_on_close: bool,
    /// Complete a transport's connect handle right after the `connect`
    /// event is published, without waiting for the signaling layer
    pub auto_complete_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reject_pending_on_close: true,
            auto_complete_connect: false,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("RELAYCAST").try_parsing(true))
            .build()?;

        let config: SessionConfig = settings.try_deserialize()?;
        tracing::debug!("Loaded session config: {:?}", config);
        Ok(config)
    }
}
