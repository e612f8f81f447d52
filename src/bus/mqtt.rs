use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BusError, MessageBus, OutboundMessage};
use crate::config::BrokerConfig;

/// Outgoing requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Matches broker PUBACKs to the publishes waiting on them.
///
/// The event loop assigns packet ids in request order, so a waiter is queued
/// when its request is handed to the client and bound to an id when the
/// matching outgoing PUBLISH is observed.
#[derive(Debug, Default)]
struct AckTracker {
    queued: VecDeque<oneshot::Sender<()>>,
    inflight: HashMap<u16, oneshot::Sender<()>>,
}

impl AckTracker {
    fn queue(&mut self, waiter: oneshot::Sender<()>) {
        self.queued.push_back(waiter);
    }

    fn on_outgoing(&mut self, pkid: u16) {
        // Known id: a retransmission after reconnect
        if self.inflight.contains_key(&pkid) {
            return;
        }
        match self.queued.pop_front() {
            Some(waiter) => {
                self.inflight.insert(pkid, waiter);
            }
            None => debug!(pkid, "outgoing publish without a waiter"),
        }
    }

    fn on_puback(&mut self, pkid: u16) -> bool {
        match self.inflight.remove(&pkid) {
            Some(waiter) => {
                // The publisher may have timed out already
                let _ = waiter.send(());
                true
            }
            None => false,
        }
    }

    /// The broker started a fresh session, so in-flight publishes will never
    /// be acknowledged. Their waiters fail.
    fn reset_inflight(&mut self) -> usize {
        let lost = self.inflight.len();
        self.inflight.clear();
        lost
    }

    fn clear(&mut self) {
        self.queued.clear();
        self.inflight.clear();
    }
}

/// MQTT transport over `rumqttc`.
///
/// A background task drives the event loop. When the connection drops it
/// retries every `reconnect_interval`; publishes fail fast with
/// [`BusError::Disconnected`] meanwhile. The session is persistent so
/// unacknowledged QoS 1 publishes are retransmitted after a reconnect, and
/// `publish` resolves only once the broker's PUBACK arrives.
pub struct MqttBus {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    connected_tx: Mutex<Option<watch::Sender<bool>>>,
    connected_rx: watch::Receiver<bool>,
    acks: Arc<Mutex<AckTracker>>,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    cancel: CancellationToken,
}

impl MqttBus {
    pub fn new(cfg: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_seconds));
        options.set_clean_session(false);
        if let Some(username) = &cfg.username {
            options.set_credentials(username.clone(), cfg.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            driver: Mutex::new(None),
            connected_tx: Mutex::new(Some(connected_tx)),
            connected_rx,
            acks: Arc::new(Mutex::new(AckTracker::default())),
            connect_timeout: CONNECT_TIMEOUT,
            reconnect_interval: Duration::from_secs(cfg.reconnect_interval_seconds),
            cancel: CancellationToken::new(),
        }
    }

    fn start_driver(&self) {
        let (Some(mut eventloop), Some(tx)) =
            (self.eventloop.lock().take(), self.connected_tx.lock().take())
        else {
            return;
        };
        let cancel = self.cancel.clone();
        let reconnect = self.reconnect_interval;
        let acks = Arc::clone(&self.acks);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code == ConnectReturnCode::Success {
                                if !ack.session_present {
                                    let lost = acks.lock().reset_inflight();
                                    if lost > 0 {
                                        warn!(lost, "broker started a new session, unacknowledged publishes lost");
                                    }
                                }
                                info!(session_present = ack.session_present, "connected to broker");
                                tx.send_replace(true);
                            } else {
                                warn!(code = ?ack.code, "broker refused connection");
                                tx.send_replace(false);
                            }
                        }
                        Ok(Event::Outgoing(Outgoing::Publish(pkid))) => acks.lock().on_outgoing(pkid),
                        Ok(Event::Incoming(Packet::PubAck(ack))) => {
                            if !acks.lock().on_puback(ack.pkid) {
                                debug!(pkid = ack.pkid, "PUBACK for unknown packet id");
                            }
                        }
                        Ok(other) => debug!(event = ?other, "mqtt event"),
                        Err(e) => {
                            if tx.send_replace(false) {
                                warn!(error = %e, "broker connection lost");
                            } else {
                                debug!(error = %e, "broker unreachable");
                            }
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(reconnect) => {}
                            }
                        }
                    },
                }
            }
            tx.send_replace(false);
            debug!("mqtt event loop stopped");
        });
        *self.driver.lock() = Some(handle);
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&self) -> Result<(), BusError> {
        self.start_driver();
        let mut rx = self.connected_rx.clone();
        let outcome = tokio::time::timeout(self.connect_timeout, rx.wait_for(|up| *up))
            .await
            .map(|up| up.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BusError::Connection("event loop stopped".into())),
            Err(_) => Err(BusError::Connection(format!(
                "no CONNACK within {} ms",
                self.connect_timeout.as_millis()
            ))),
        }
    }

    /// Resolves on the broker's PUBACK. Callers bound the wait.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Disconnected);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            // Hand off and queue under one lock so waiters keep request order
            let mut acks = self.acks.lock();
            self.client
                .try_publish(
                    message.topic.clone(),
                    QoS::AtLeastOnce,
                    message.retain,
                    message.payload.clone(),
                )
                .map_err(|e| BusError::Publish {
                    topic: message.topic.clone(),
                    reason: e.to_string(),
                })?;
            acks.queue(ack_tx);
        }
        ack_rx.await.map_err(|_| BusError::Publish {
            topic: message.topic.clone(),
            reason: "session reset before PUBACK".into(),
        })
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let result = if self.is_connected() {
            self.client
                .disconnect()
                .await
                .map_err(|e| BusError::Connection(e.to_string()))
        } else {
            Ok(())
        };

        // Let the event loop flush the DISCONNECT packet before stopping it
        let mut rx = self.connected_rx.clone();
        let stopped = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|up| !*up))
            .await
            .map(|down| down.map(|_| ()));
        if stopped.is_err() {
            debug!("event loop still up after disconnect, stopping it");
        }
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.acks.lock().clear();
        info!("disconnected from broker");
        result
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }
}
