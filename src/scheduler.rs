//! # Scheduler
//!
//! Drives the simulated clock, steps the fleet once per tick and hands each
//! tick's messages to the [`Publisher`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, OutboundMessage, TopicKind, Topics};
use crate::config::{Config, SimulationConfig};
use crate::domain::{
    FaultPayload, MaintenancePayload, SiteId, StaticPayload, WeatherPayload,
};
use crate::error::Result;
use crate::publisher::{EnqueueOutcome, Publisher, PublisherStats, SiteMessages, TickBatch};
use crate::simulation::{ModeEvent, SimulationEngine, SiteTick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Ticking,
    ShuttingDown,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub final_clock: DateTime<Utc>,
    pub flushed: bool,
    pub publisher: PublisherStats,
}

pub struct Scheduler {
    engine: SimulationEngine,
    bus: Arc<dyn MessageBus>,
    publisher: Arc<Publisher>,
    topics: Topics,
    settings: SimulationConfig,
    flush_deadline: Duration,
    clock: DateTime<Utc>,
    ticks: u64,
    static_sent: bool,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(engine: SimulationEngine, bus: Arc<dyn MessageBus>, cfg: &Config) -> Self {
        let publisher = Publisher::new(bus.clone(), cfg.publisher.clone());
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            engine,
            bus,
            publisher,
            topics: Topics::new(cfg.broker.namespace.clone()),
            settings: cfg.simulation.clone(),
            flush_deadline: Duration::from_secs(cfg.publisher.shutdown_flush_seconds),
            clock: cfg.simulation.start_time.unwrap_or_else(Utc::now),
            ticks: 0,
            static_sent: false,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn engine(&self) -> &SimulationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SimulationEngine {
        &mut self.engine
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Simulated time of the next tick.
    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    /// Tick until `cancel` fires or `max_ticks` is reached, then flush and
    /// disconnect. A tick that has started always completes.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunSummary> {
        let dispatcher = self.publisher.spawn();
        let period = self.settings.wall_period();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sites = self.engine.registry().len(),
            interval_s = self.settings.publish_interval_seconds,
            time_scale = self.settings.time_scale,
            start = %self.clock,
            "scheduler started"
        );

        let mut outcome = Ok(());
        loop {
            if self.settings.max_ticks.is_some_and(|max| self.ticks >= max) {
                info!(ticks = self.ticks, "tick limit reached");
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.state.send_replace(SchedulerState::Ticking);
            let result = self.run_tick();
            self.state.send_replace(SchedulerState::Idle);
            if let Err(e) = result {
                outcome = Err(e);
                break;
            }
        }

        self.state.send_replace(SchedulerState::ShuttingDown);
        info!(ticks = self.ticks, "scheduler stopping, flushing publish queue");
        let flushed = self
            .publisher
            .shutdown(dispatcher, self.flush_deadline)
            .await;
        if let Err(e) = self.bus.disconnect().await {
            warn!(error = %e, "broker disconnect failed");
        }
        outcome?;

        Ok(RunSummary {
            ticks: self.ticks,
            final_clock: self.clock,
            flushed,
            publisher: self.publisher.stats(),
        })
    }

    /// Step every site at the current clock, enqueue the batch and advance.
    pub fn run_tick(&mut self) -> Result<TickBatch> {
        let started = Instant::now();
        let now = self.clock;
        let interval = self.settings.interval();
        let site_ticks = self.engine.tick(now, interval)?;

        let resend: HashSet<SiteId> = if self.static_sent {
            self.publisher.take_undelivered_static().into_iter().collect()
        } else {
            self.engine
                .registry()
                .sites()
                .iter()
                .map(|s| s.id.clone())
                .collect()
        };
        self.static_sent = true;

        let fleet_power_kw: f64 = site_ticks.iter().map(|t| t.snapshot.power_output_kw).sum();
        let events: usize = site_ticks.iter().map(|t| t.events.len()).sum();

        let sites = site_ticks
            .into_iter()
            .map(|tick| {
                let with_static = resend.contains(&tick.site_id);
                self.site_messages(tick, with_static)
            })
            .collect();
        let batch = TickBatch {
            tick: self.ticks + 1,
            sites,
        };

        let outcome = self.publisher.enqueue(batch.clone());
        self.ticks += 1;
        self.clock += interval;

        info!(
            tick = self.ticks,
            sim_time = %now,
            messages = batch.message_count(),
            state_changes = events,
            fleet_power_mw = fleet_power_kw / 1000.0,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tick complete"
        );
        if outcome != EnqueueOutcome::Accepted {
            debug!(?outcome, "batch not queued as-is");
        }
        Ok(batch)
    }

    fn site_messages(&self, tick: SiteTick, with_static: bool) -> SiteMessages {
        let id = tick.site_id;
        let at = tick.snapshot.timestamp;
        let mut messages = Vec::with_capacity(3 + tick.events.len());

        if with_static {
            if let Ok(site) = self.engine.registry().lookup(&id) {
                self.push(&mut messages, &id, TopicKind::Static, &StaticPayload::from(site));
            }
        }
        for event in &tick.events {
            match event {
                ModeEvent::FaultRaised(fault) => {
                    self.push(&mut messages, &id, TopicKind::Faults, &FaultPayload::raised(&id, fault, at))
                }
                ModeEvent::FaultCleared { fault, reason } => self.push(
                    &mut messages,
                    &id,
                    TopicKind::Faults,
                    &FaultPayload::cleared(&id, fault, *reason, at),
                ),
                ModeEvent::MaintenanceStarted(window) => self.push(
                    &mut messages,
                    &id,
                    TopicKind::Maintenance,
                    &MaintenancePayload::new(&id, window, true, at),
                ),
                ModeEvent::MaintenanceEnded(window) => self.push(
                    &mut messages,
                    &id,
                    TopicKind::Maintenance,
                    &MaintenancePayload::new(&id, window, false, at),
                ),
            }
        }
        self.push(&mut messages, &id, TopicKind::Telemetry, &tick.snapshot);
        self.push(
            &mut messages,
            &id,
            TopicKind::Weather,
            &WeatherPayload {
                site_id: id.clone(),
                sample: tick.environment,
            },
        );

        SiteMessages {
            site_id: id,
            messages,
        }
    }

    fn push<T: Serialize>(
        &self,
        out: &mut Vec<OutboundMessage>,
        site: &SiteId,
        kind: TopicKind,
        body: &T,
    ) {
        match OutboundMessage::json(&self.topics, site, kind, body) {
            Ok(message) => out.push(message),
            Err(e) => warn!(site_id = %site, %kind, error = %e, "payload serialization failed"),
        }
    }
}
