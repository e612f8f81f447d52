use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{BusError, MessageBus, OutboundMessage, TopicKind};
use crate::domain::SiteId;

#[derive(Debug, Default)]
struct Recorded {
    published: VecDeque<OutboundMessage>,
    /// Keep at most this many messages, oldest evicted first
    limit: Option<usize>,
    retained: HashMap<String, OutboundMessage>,
    failing_sites: HashSet<SiteId>,
    delay: Option<Duration>,
}

/// In-process bus that records every accepted message.
///
/// Sites can be marked as failing to exercise publish error paths.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    inner: Mutex<Recorded>,
    connected: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that starts out connected.
    pub fn connected() -> Self {
        let bus = Self::default();
        bus.connected.store(true, Ordering::SeqCst);
        bus
    }

    /// Connected bus that only keeps the latest `limit` messages.
    pub fn bounded(limit: usize) -> Self {
        let bus = Self::connected();
        bus.inner.lock().limit = Some(limit);
        bus
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Reject every publish for `site` until [`InMemoryBus::heal_site`].
    pub fn fail_site(&self, site: SiteId) {
        self.inner.lock().failing_sites.insert(site);
    }

    pub fn heal_site(&self, site: &SiteId) {
        self.inner.lock().failing_sites.remove(site);
    }

    /// Hold every publish for `delay` before accepting it.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.inner.lock().delay = delay;
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.inner.lock().published.iter().cloned().collect()
    }

    pub fn messages_for(&self, site: &SiteId) -> Vec<OutboundMessage> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|m| &m.site_id == site)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: TopicKind) -> usize {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|m| m.kind == kind)
            .count()
    }

    /// Last retained message per topic.
    pub fn retained(&self, topic: &str) -> Option<OutboundMessage> {
        self.inner.lock().retained.get(topic).cloned()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.published.clear();
        inner.retained.clear();
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("in-memory bus connected");
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        let delay = {
            let inner = self.inner.lock();
            if inner.failing_sites.contains(&message.site_id) {
                return Err(BusError::Publish {
                    topic: message.topic.clone(),
                    reason: "site marked as failing".into(),
                });
            }
            inner.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if message.retain {
            inner
                .retained
                .insert(message.topic.clone(), message.clone());
        }
        if inner.limit.is_some_and(|limit| inner.published.len() >= limit) {
            inner.published.pop_front();
        }
        inner.published.push_back(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topics;

    fn message(site: &str, kind: TopicKind) -> OutboundMessage {
        OutboundMessage::json(&Topics::new("t"), &SiteId::from(site), kind, &serde_json::json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_while_disconnected() {
        let bus = InMemoryBus::new();
        let err = bus.publish(&message("site_001", TopicKind::Telemetry)).await;
        assert_eq!(err, Err(BusError::Disconnected));

        bus.connect().await.unwrap();
        assert!(bus.publish(&message("site_001", TopicKind::Telemetry)).await.is_ok());
        assert_eq!(bus.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_site_is_isolated() {
        let bus = InMemoryBus::connected();
        bus.fail_site(SiteId::from("site_002"));

        assert!(bus.publish(&message("site_001", TopicKind::Weather)).await.is_ok());
        assert!(matches!(
            bus.publish(&message("site_002", TopicKind::Weather)).await,
            Err(BusError::Publish { .. })
        ));

        bus.heal_site(&SiteId::from("site_002"));
        assert!(bus.publish(&message("site_002", TopicKind::Weather)).await.is_ok());
        assert_eq!(bus.count(TopicKind::Weather), 2);
    }

    #[tokio::test]
    async fn test_bounded_bus_evicts_oldest() {
        let bus = InMemoryBus::bounded(2);
        for kind in [TopicKind::Telemetry, TopicKind::Weather, TopicKind::Faults] {
            bus.publish(&message("site_001", kind)).await.unwrap();
        }
        let kinds: Vec<_> = bus.messages().iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![TopicKind::Weather, TopicKind::Faults]);
    }

    #[tokio::test]
    async fn test_static_is_retained() {
        let bus = InMemoryBus::connected();
        bus.publish(&message("site_001", TopicKind::Static)).await.unwrap();
        assert!(bus.retained("t/site_001/static").is_some());
        assert!(bus.retained("t/site_001/telemetry").is_none());
    }
}
