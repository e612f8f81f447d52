//! # Message bus
//!
//! Publish/subscribe seam between the simulator and a broker. The
//! production transport is MQTT (feature `mqtt`); [`InMemoryBus`] records
//! messages for dry runs and tests.

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod topics;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::SiteId;

pub use memory::InMemoryBus;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttBus;
pub use topics::{TopicKind, Topics};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("publish to {topic} timed out after {after_ms} ms")]
    Timeout { topic: String, after_ms: u64 },

    #[error("not connected to broker")]
    Disconnected,
}

/// One message ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub site_id: SiteId,
    pub kind: TopicKind,
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl OutboundMessage {
    /// Serialize `body` as JSON for `site` under `kind`.
    pub fn json<T: Serialize>(
        topics: &Topics,
        site: &SiteId,
        kind: TopicKind,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            site_id: site.clone(),
            kind,
            topic: topics.topic(site, kind),
            payload: serde_json::to_vec(body)?,
            retain: kind.retained(),
        })
    }
}

/// A broker connection. Implementations must allow concurrent `publish`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn connect(&self) -> Result<(), BusError>;

    /// At-least-once delivery of a single message. Resolves once the
    /// transport has confirmed delivery; the caller bounds the wait.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError>;

    async fn disconnect(&self) -> Result<(), BusError>;

    fn is_connected(&self) -> bool;
}
