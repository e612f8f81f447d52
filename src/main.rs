use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use solar_fleet_sim::bus::{InMemoryBus, MessageBus};
use solar_fleet_sim::config::{BrokerConfig, Config, Overrides, Transport};
use solar_fleet_sim::scheduler::Scheduler;
use solar_fleet_sim::simulation::SimulationEngine;
use solar_fleet_sim::telemetry::{init_tracing, shutdown_token};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Messages kept by the in-memory transport during a dry run.
const MEMORY_BUS_RETENTION: usize = 10_000;

#[derive(Debug, Parser)]
#[command(author, version, about = "Solar farm fleet telemetry simulator", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "HOST", help = "Broker host")]
    broker: Option<String>,

    #[arg(long, help = "Broker port")]
    port: Option<u16>,

    #[arg(long, env = "SOLARSIM_BROKER_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "SOLARSIM_BROKER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, value_name = "SECONDS", help = "Simulated seconds between ticks")]
    interval: Option<u64>,

    #[arg(long, help = "Number of simulated sites")]
    sites: Option<usize>,

    #[arg(long, help = "Random seed for fleet generation and models")]
    seed: Option<u64>,

    #[arg(long, help = "Stop after this many ticks")]
    ticks: Option<u64>,

    #[arg(long, help = "Simulated seconds per wall-clock second")]
    time_scale: Option<f64>,

    #[arg(long, value_enum)]
    transport: Option<CliTransport>,

    #[arg(long, help = "Print the fleet summary as JSON and exit")]
    summary: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTransport {
    Mqtt,
    Memory,
}

impl From<CliTransport> for Transport {
    fn from(value: CliTransport) -> Self {
        match value {
            CliTransport::Mqtt => Transport::Mqtt,
            CliTransport::Memory => Transport::Memory,
        }
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.broker.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            transport: self.transport.map(Into::into),
            interval_seconds: self.interval,
            sites: self.sites,
            seed: self.seed,
            ticks: self.ticks,
            time_scale: self.time_scale,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let cfg = Config::load(cli.config.as_deref(), cli.overrides())
        .context("invalid configuration")?;
    let _log_guard = init_tracing(&cfg.logging);

    let engine = SimulationEngine::from_config(&cfg)?;

    if cli.summary {
        let summary = engine.registry().summary();
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);
    async move {
        let summary = engine.registry().summary();
        info!(
            farms = summary.total_farms,
            capacity_mw = summary.total_capacity_kw / 1000.0,
            countries = summary.countries.len(),
            "fleet generated"
        );

        let bus = build_bus(&cfg.broker)?;
        connect_with_retry(bus.as_ref(), &cfg.broker).await;

        let cancel = shutdown_token();
        let scheduler = Scheduler::new(engine, bus, &cfg);
        let result = scheduler.run(cancel).await?;

        info!(
            ticks = result.ticks,
            published = result.publisher.published,
            failed = result.publisher.failed,
            dropped_batches = result.publisher.dropped_batches,
            flushed = result.flushed,
            "simulation stopped"
        );
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}

fn build_bus(cfg: &BrokerConfig) -> Result<Arc<dyn MessageBus>> {
    match cfg.transport {
        #[cfg(feature = "mqtt")]
        Transport::Mqtt => Ok(Arc::new(solar_fleet_sim::bus::MqttBus::new(cfg))),
        #[cfg(not(feature = "mqtt"))]
        Transport::Mqtt => anyhow::bail!("built without the `mqtt` feature; use --transport memory"),
        Transport::Memory => Ok(Arc::new(InMemoryBus::bounded(MEMORY_BUS_RETENTION))),
    }
}

/// Exponential backoff on startup. Exhausting the retries is not fatal: the
/// bus keeps reconnecting in the background and ticks continue meanwhile.
async fn connect_with_retry(bus: &dyn MessageBus, cfg: &BrokerConfig) {
    let attempts = cfg.connect_retries + 1;
    let mut backoff = Duration::from_millis(cfg.connect_backoff_ms);
    for attempt in 1..=attempts {
        match bus.connect().await {
            Ok(()) => {
                info!(host = %cfg.host, port = cfg.port, attempt, "broker connected");
                return;
            }
            Err(e) if attempt < attempts => {
                warn!(error = %e, attempt, retry_in_ms = backoff.as_millis() as u64, "broker connect failed");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                warn!(error = %e, attempts, "broker unreachable, continuing in disconnected mode");
            }
        }
    }
}
