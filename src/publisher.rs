//! # Publisher
//!
//! Bounded queue of tick batches drained by a single dispatcher task.
//! Sites inside a batch are published concurrently (at most `workers` in
//! flight) while each site's own messages go out in order, so per-site
//! ordering holds within and across ticks.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusError, MessageBus, OutboundMessage, TopicKind};
use crate::config::{OverloadPolicy, PublisherConfig};
use crate::domain::SiteId;

/// How often a held dispatcher re-checks the broker connection.
const RECONNECT_POLL: Duration = Duration::from_millis(250);

/// Ordered messages of one site for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteMessages {
    pub site_id: SiteId,
    pub messages: Vec<OutboundMessage>,
}

/// Everything produced by one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    pub tick: u64,
    pub sites: Vec<SiteMessages>,
}

impl TickBatch {
    pub fn message_count(&self) -> usize {
        self.sites.iter().map(|s| s.messages.len()).sum()
    }

    fn static_sites(&self) -> impl Iterator<Item = &SiteId> {
        self.sites
            .iter()
            .filter(|s| s.messages.iter().any(|m| m.kind == TopicKind::Static))
            .map(|s| &s.site_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Queue was full; the oldest pending batch was discarded
    DroppedOldest { dropped_tick: u64 },
    /// Queue was full; the new batch was discarded
    Skipped,
    /// Publisher is shutting down
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    dropped_batches: AtomicU64,
    batches: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub dropped_batches: u64,
    pub batches: u64,
}

pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    cfg: PublisherConfig,
    queue: Mutex<VecDeque<TickBatch>>,
    notify: Notify,
    closed: AtomicBool,
    counters: Counters,
    undelivered_static: Mutex<BTreeSet<SiteId>>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>, cfg: PublisherConfig) -> Arc<Self> {
        Arc::new(Self {
            bus,
            cfg,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            undelivered_static: Mutex::new(BTreeSet::new()),
        })
    }

    /// Queue a batch, applying the overload policy when full.
    pub fn enqueue(&self, batch: TickBatch) -> EnqueueOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return EnqueueOutcome::Closed;
        }
        let capacity = self.cfg.queue_capacity.max(1);
        let (outcome, dropped) = {
            let mut queue = self.queue.lock();
            if queue.len() < capacity {
                queue.push_back(batch);
                (EnqueueOutcome::Accepted, None)
            } else {
                match self.cfg.overload_policy {
                    OverloadPolicy::DropOldest => {
                        let oldest = queue.pop_front();
                        queue.push_back(batch);
                        let dropped_tick = oldest.as_ref().map(|b| b.tick).unwrap_or_default();
                        (EnqueueOutcome::DroppedOldest { dropped_tick }, oldest)
                    }
                    OverloadPolicy::SkipTick => (EnqueueOutcome::Skipped, Some(batch)),
                }
            }
        };

        if let Some(dropped) = dropped {
            self.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
            self.undelivered_static
                .lock()
                .extend(dropped.static_sites().cloned());
            warn!(
                tick = dropped.tick,
                messages = dropped.message_count(),
                policy = %self.cfg.overload_policy,
                "publish queue full, batch dropped"
            );
        }
        self.notify.notify_one();
        outcome
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> PublisherStats {
        let c = &self.counters;
        PublisherStats {
            published: c.published.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            dropped_batches: c.dropped_batches.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
        }
    }

    /// Sites whose static message has not been delivered. Draining.
    pub fn take_undelivered_static(&self) -> Vec<SiteId> {
        std::mem::take(&mut *self.undelivered_static.lock())
            .into_iter()
            .collect()
    }

    /// Start the dispatcher task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move { publisher.run().await })
    }

    /// Stop accepting batches and wait up to `deadline` for the queue to drain.
    /// Returns `true` if everything queued was dispatched.
    pub async fn shutdown(&self, mut dispatcher: JoinHandle<()>, deadline: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        match tokio::time::timeout(deadline, &mut dispatcher).await {
            Ok(_) => {
                info!(stats = ?self.stats(), "publish queue flushed");
                true
            }
            Err(_) => {
                dispatcher.abort();
                let lost = self.queue.lock().len();
                warn!(
                    pending_batches = lost,
                    deadline_s = deadline.as_secs_f64(),
                    "shutdown flush deadline reached, discarding pending batches"
                );
                false
            }
        }
    }

    async fn run(&self) {
        loop {
            let notified = self.notify.notified();
            let connected = self.bus.is_connected();
            let next = if connected {
                self.queue.lock().pop_front()
            } else {
                None
            };
            if let Some(batch) = next {
                self.dispatch(batch).await;
                continue;
            }
            if self.closed.load(Ordering::SeqCst) && self.queue.lock().is_empty() {
                break;
            }
            if connected {
                notified.await;
            } else {
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(RECONNECT_POLL) => {}
                }
            }
        }
        debug!("publisher dispatcher stopped");
    }

    async fn dispatch(&self, batch: TickBatch) {
        let started = Instant::now();
        let tick = batch.tick;
        let total = batch.message_count();
        let failed_before = self.counters.failed.load(Ordering::Relaxed);

        stream::iter(batch.sites)
            .for_each_concurrent(self.cfg.workers.max(1), |site| self.publish_site(site))
            .await;

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed) - failed_before;
        debug!(
            tick,
            messages = total,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch published"
        );
    }

    async fn publish_site(&self, site: SiteMessages) {
        for message in &site.messages {
            match self.publish_with_retry(message).await {
                Ok(()) => {
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    if message.kind == TopicKind::Static {
                        self.undelivered_static.lock().insert(site.site_id.clone());
                    }
                    warn!(site_id = %site.site_id, topic = %message.topic, error = %e, "publish failed");
                }
            }
        }
    }

    /// Linear backoff before retrying after `attempt` failures.
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.cfg.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    async fn publish_with_retry(&self, message: &OutboundMessage) -> Result<(), BusError> {
        let timeout = Duration::from_millis(self.cfg.publish_timeout_ms);
        let max_attempts = self.cfg.max_retries.saturating_add(1);

        for attempt in 1..=max_attempts {
            let result = match tokio::time::timeout(timeout, self.bus.publish(message)).await {
                Ok(result) => result,
                Err(_) => {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    Err(BusError::Timeout {
                        topic: message.topic.clone(),
                        after_ms: self.cfg.publish_timeout_ms,
                    })
                }
            };
            match result {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(topic = %message.topic, attempt, "publish succeeded after retry");
                    }
                    return Ok(());
                }
                // Retrying cannot help until the bus reconnects
                Err(BusError::Disconnected) => return Err(BusError::Disconnected),
                Err(e) if attempt == max_attempts => return Err(e),
                Err(e) => {
                    debug!(topic = %message.topic, attempt, error = %e, "publish attempt failed");
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
        Err(BusError::Publish {
            topic: message.topic.clone(),
            reason: "no publish attempt made".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, MockMessageBus, Topics};
    use std::sync::atomic::AtomicUsize;

    fn cfg() -> PublisherConfig {
        PublisherConfig {
            workers: 4,
            queue_capacity: 2,
            publish_timeout_ms: 200,
            max_retries: 2,
            retry_backoff_ms: 1,
            overload_policy: OverloadPolicy::DropOldest,
            shutdown_flush_seconds: 5,
        }
    }

    fn msg(site: &SiteId, kind: TopicKind, tick: u64) -> OutboundMessage {
        OutboundMessage::json(
            &Topics::new("test"),
            site,
            kind,
            &serde_json::json!({ "tick": tick }),
        )
        .unwrap()
    }

    fn batch(tick: u64, sites: usize, with_static: bool) -> TickBatch {
        TickBatch {
            tick,
            sites: (1..=sites)
                .map(|n| {
                    let id = SiteId::from_index(n);
                    let mut messages = Vec::new();
                    if with_static {
                        messages.push(msg(&id, TopicKind::Static, tick));
                    }
                    messages.push(msg(&id, TopicKind::Telemetry, tick));
                    messages.push(msg(&id, TopicKind::Weather, tick));
                    SiteMessages {
                        site_id: id,
                        messages,
                    }
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut bus = MockMessageBus::new();
        bus.expect_is_connected().return_const(true);
        bus.expect_publish().times(3).returning(move |m| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BusError::Publish {
                    topic: m.topic.clone(),
                    reason: "broker busy".into(),
                })
            } else {
                Ok(())
            }
        });

        let publisher = Publisher::new(Arc::new(bus), cfg());
        let id = SiteId::from_index(1);
        assert!(publisher
            .publish_with_retry(&msg(&id, TopicKind::Telemetry, 1))
            .await
            .is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(publisher.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mut bus = MockMessageBus::new();
        bus.expect_is_connected().return_const(true);
        bus.expect_publish().times(3).returning(|m| {
            Err(BusError::Publish {
                topic: m.topic.clone(),
                reason: "rejected".into(),
            })
        });

        let publisher = Publisher::new(Arc::new(bus), cfg());
        let result = publisher
            .publish_with_retry(&msg(&SiteId::from_index(1), TopicKind::Weather, 1))
            .await;
        assert!(matches!(result, Err(BusError::Publish { .. })));
    }

    #[tokio::test]
    async fn test_disconnected_is_not_retried() {
        let mut bus = MockMessageBus::new();
        bus.expect_publish()
            .times(1)
            .returning(|_| Err(BusError::Disconnected));

        let publisher = Publisher::new(Arc::new(bus), cfg());
        let result = publisher
            .publish_with_retry(&msg(&SiteId::from_index(1), TopicKind::Weather, 1))
            .await;
        assert_eq!(result, Err(BusError::Disconnected));
        assert_eq!(publisher.stats().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_publish_times_out() {
        let bus = Arc::new(InMemoryBus::connected());
        bus.set_delay(Some(Duration::from_secs(10)));
        let publisher = Publisher::new(bus.clone(), cfg());

        let result = publisher
            .publish_with_retry(&msg(&SiteId::from_index(1), TopicKind::Telemetry, 1))
            .await;
        assert!(matches!(result, Err(BusError::Timeout { after_ms: 200, .. })));
        assert_eq!(publisher.stats().timeouts, 3);
        assert!(bus.messages().is_empty());
    }

    #[test]
    fn test_backoff_is_linear_and_saturates() {
        let publisher = Publisher::new(Arc::new(InMemoryBus::connected()), cfg());
        assert_eq!(publisher.backoff(3), Duration::from_millis(3));

        let huge = Publisher::new(
            Arc::new(InMemoryBus::connected()),
            PublisherConfig {
                retry_backoff_ms: u64::MAX,
                ..cfg()
            },
        );
        assert_eq!(huge.backoff(20), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_drop_oldest_policy() {
        let publisher = Publisher::new(Arc::new(InMemoryBus::connected()), cfg());
        assert_eq!(publisher.enqueue(batch(1, 2, true)), EnqueueOutcome::Accepted);
        assert_eq!(publisher.enqueue(batch(2, 2, false)), EnqueueOutcome::Accepted);
        assert_eq!(
            publisher.enqueue(batch(3, 2, false)),
            EnqueueOutcome::DroppedOldest { dropped_tick: 1 }
        );
        let ticks: Vec<_> = publisher.queue.lock().iter().map(|b| b.tick).collect();
        assert_eq!(ticks, vec![2, 3]);
        assert_eq!(publisher.stats().dropped_batches, 1);
        // Static metadata in the dropped batch must be re-sent
        assert_eq!(
            publisher.take_undelivered_static(),
            vec![SiteId::from_index(1), SiteId::from_index(2)]
        );
        assert!(publisher.take_undelivered_static().is_empty());
    }

    #[tokio::test]
    async fn test_skip_tick_policy() {
        let publisher = Publisher::new(
            Arc::new(InMemoryBus::connected()),
            PublisherConfig {
                overload_policy: OverloadPolicy::SkipTick,
                ..cfg()
            },
        );
        publisher.enqueue(batch(1, 1, false));
        publisher.enqueue(batch(2, 1, false));
        assert_eq!(publisher.enqueue(batch(3, 1, false)), EnqueueOutcome::Skipped);
        let ticks: Vec<_> = publisher.queue.lock().iter().map(|b| b.tick).collect();
        assert_eq!(ticks, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_per_site_order_is_preserved() {
        let bus = Arc::new(InMemoryBus::connected());
        let publisher = Publisher::new(
            bus.clone(),
            PublisherConfig {
                queue_capacity: 8,
                ..cfg()
            },
        );
        publisher.enqueue(batch(1, 10, true));
        publisher.enqueue(batch(2, 10, false));
        publisher.enqueue(batch(3, 10, false));

        let handle = publisher.spawn();
        assert!(publisher.shutdown(handle, Duration::from_secs(5)).await);

        for n in 1..=10 {
            let site = SiteId::from_index(n);
            let order: Vec<_> = bus
                .messages_for(&site)
                .into_iter()
                .map(|m| {
                    let v: serde_json::Value = serde_json::from_slice(&m.payload).unwrap();
                    (v["tick"].as_u64().unwrap(), m.kind)
                })
                .collect();
            assert_eq!(
                order,
                vec![
                    (1, TopicKind::Static),
                    (1, TopicKind::Telemetry),
                    (1, TopicKind::Weather),
                    (2, TopicKind::Telemetry),
                    (2, TopicKind::Weather),
                    (3, TopicKind::Telemetry),
                    (3, TopicKind::Weather),
                ]
            );
        }
        assert_eq!(publisher.stats().published, 70);
    }

    #[tokio::test]
    async fn test_failing_site_does_not_block_others() {
        let bus = Arc::new(InMemoryBus::connected());
        bus.fail_site(SiteId::from_index(3));
        let publisher = Publisher::new(bus.clone(), cfg());
        publisher.enqueue(batch(1, 5, true));

        let handle = publisher.spawn();
        assert!(publisher.shutdown(handle, Duration::from_secs(5)).await);

        let stats = publisher.stats();
        assert_eq!(stats.published, 12);
        assert_eq!(stats.failed, 3);
        assert!(bus.messages_for(&SiteId::from_index(3)).is_empty());
        assert_eq!(publisher.take_undelivered_static(), vec![SiteId::from_index(3)]);
    }

    #[tokio::test]
    async fn test_holds_batches_while_disconnected() {
        let bus = Arc::new(InMemoryBus::new());
        let publisher = Publisher::new(bus.clone(), cfg());
        let handle = publisher.spawn();

        publisher.enqueue(batch(1, 2, false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(publisher.queue_len(), 1);
        assert!(bus.messages().is_empty());

        bus.set_connected(true);
        assert!(publisher.shutdown(handle, Duration::from_secs(5)).await);
        assert_eq!(bus.messages().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deadline_discards_when_broker_stays_down() {
        let bus = Arc::new(InMemoryBus::new());
        let publisher = Publisher::new(bus, cfg());
        let handle = publisher.spawn();
        publisher.enqueue(batch(1, 1, false));

        assert!(!publisher.shutdown(handle, Duration::from_secs(2)).await);
        assert_eq!(publisher.enqueue(batch(2, 1, false)), EnqueueOutcome::Closed);
    }
}
