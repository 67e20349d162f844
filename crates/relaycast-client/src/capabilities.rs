//! Router capability loading
//!
//! Holds the one media-engine device a session loads from the router's
//! capabilities, until the session closes.

use std::sync::Arc;

use relaycast_protocol::RtpCapabilities;

use crate::engine::{Device, MediaEngine};
use crate::error::{Result, SessionError};

/// Owns the session's single loaded media-engine device
pub struct CapabilityNegotiator {
    engine: Arc<dyn MediaEngine>,
    device: Option<Box<dyn Device>>,
}

impl CapabilityNegotiator {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            device: None,
        }
    }

    /// Load the router's capabilities and return the client's own
    pub async fn load(&mut self, router_capabilities: &RtpCapabilities) -> Result<RtpCapabilities> {
        if self.device.is_some() {
            return Err(SessionError::NotLoaded(
                "device already loaded, close the session first".to_string(),
            ));
        }

        let device = self
            .engine
            .load(router_capabilities)
            .await
            .map_err(|e| SessionError::NotLoaded(format!("{:#}", e)))?;

        let client_capabilities = device.rtp_capabilities();
        self.device = Some(device);

        tracing::info!("Media device loaded");
        Ok(client_capabilities)
    }

    pub fn device(&self) -> Result<&dyn Device> {
        self.device.as_deref().ok_or(SessionError::NotInitialized)
    }

    pub fn is_loaded(&self) -> bool {
        self.device.is_some()
    }

    pub fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.device.as_ref().map(|d| d.rtp_capabilities())
    }

    /// Drop the device handle. Returns whether one was loaded.
    pub fn release(&mut self) -> bool {
        self.device.take().is_some()
    }
}
