//! Push dispatch.
//!
//! Enqueuing a command only makes it selectable; the device still has
//! to check in. The dispatcher wakes it up through an external push
//! transport. Dispatch is fire-and-forget: a push failure never rolls
//! back an enqueue, it only increments the device's failure counter.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use mandate_core::{Error, Result};
use mandate_store::{Device, Store};

/// Everything the transport needs to reach one device.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAddress {
    pub token: Vec<u8>,
    pub push_magic: String,
    pub topic: String,
}

impl PushAddress {
    /// The device's push address, if it has reported the full triple.
    pub fn for_device(device: &Device) -> Option<Self> {
        Some(Self {
            token: device.push_token.clone()?,
            push_magic: device.push_magic.clone()?,
            topic: device.topic.clone()?,
        })
    }
}

/// Transport-level push failure.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push transport failure: {0}")]
    Transport(String),
}

/// External push transport collaborator.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, address: &PushAddress) -> std::result::Result<(), PushError>;
}

/// Wakes devices up after new work is enqueued for them.
#[derive(Clone)]
pub struct PushDispatcher {
    store: Arc<Store>,
    transport: Arc<dyn PushTransport>,
}

impl PushDispatcher {
    pub fn new(store: Arc<Store>, transport: Arc<dyn PushTransport>) -> Self {
        Self { store, transport }
    }

    /// Push to one device. Returns whether a push actually went out:
    /// unenrolled or address-less devices are skipped, not errors. The
    /// outcome is recorded on the device either way.
    pub async fn notify(&self, udid: &str) -> Result<bool> {
        let device = match self.store.get_device(udid) {
            Ok(device) => device,
            Err(Error::NotFound(_)) => {
                debug!(udid, "push skipped, device not registered");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if !device.enrolled {
            debug!(udid, "push skipped, device checked out");
            return Ok(false);
        }
        let Some(address) = PushAddress::for_device(&device) else {
            debug!(udid, "push skipped, no push address yet");
            return Ok(false);
        };

        match self.transport.send(&address).await {
            Ok(()) => {
                self.store.note_push_outcome(udid, true, Utc::now())?;
                debug!(udid, "push sent");
                Ok(true)
            }
            Err(err) => {
                warn!(udid, %err, "push failed");
                self.store.note_push_outcome(udid, false, Utc::now())?;
                Ok(false)
            }
        }
    }

    /// Fire-and-forget push. Never blocks the caller; failures are
    /// logged and counted, not surfaced.
    pub fn notify_detached(&self, udid: &str) {
        let dispatcher = self.clone();
        let udid = udid.to_string();
        tokio::spawn(async move {
            if let Err(err) = dispatcher.notify(&udid).await {
                warn!(udid, %err, "push dispatch failed");
            }
        });
    }
}
