use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::{Validate, ValidationError};

use crate::error::{Result, SimError};
use crate::simulation::{EnvironmentParams, FaultParams, PowerParams};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "SOLARSIM__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_cross_fields"))]
pub struct Config {
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[validate(nested)]
    pub simulation: SimulationConfig,
    #[validate(nested)]
    pub publisher: PublisherConfig,
    pub logging: LoggingConfig,
    #[validate(nested)]
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transport {
    #[default]
    Mqtt,
    /// In-process bus, useful for dry runs and tests
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BrokerConfig {
    pub transport: Transport,
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(length(min = 1, max = 128))]
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Topic prefix: `{namespace}/{site_id}/{kind}`
    #[validate(length(min = 1), custom(function = "validate_namespace"))]
    pub namespace: String,
    #[validate(range(min = 5, max = 3600))]
    pub keep_alive_seconds: u64,
    pub connect_retries: u32,
    #[validate(range(min = 1))]
    pub connect_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub reconnect_interval_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Mqtt,
            host: "localhost".into(),
            port: 1883,
            client_id: "solar-fleet-sim".into(),
            username: None,
            password: None,
            namespace: "solar_farms".into(),
            keep_alive_seconds: 60,
            connect_retries: 5,
            connect_backoff_ms: 500,
            reconnect_interval_seconds: 5,
        }
    }
}

fn validate_namespace(ns: &str) -> std::result::Result<(), ValidationError> {
    if ns.contains(['#', '+']) || ns.starts_with('/') || ns.ends_with('/') {
        return Err(ValidationError::new("namespace_not_a_topic_prefix"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulationConfig {
    #[validate(range(min = 1, max = 100_000))]
    pub site_count: usize,
    pub seed: u64,
    /// At most one simulated day per tick
    #[validate(range(min = 1, max = 86_400))]
    pub publish_interval_seconds: u64,
    /// Simulated seconds per wall-clock second
    #[validate(range(min = 0.001, max = 100_000.0))]
    pub time_scale: f64,
    /// Simulated clock at the first tick; wall clock when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub fault_probability: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub maintenance_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            site_count: 150,
            seed: 42,
            publish_interval_seconds: 30,
            time_scale: 1.0,
            start_time: None,
            max_ticks: None,
            fault_probability: 0.005,
            maintenance_probability: 0.0001,
        }
    }
}

impl SimulationConfig {
    /// Simulated time between ticks.
    pub fn interval(&self) -> chrono::Duration {
        i64::try_from(self.publish_interval_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Wall-clock period between ticks.
    pub fn wall_period(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.publish_interval_seconds as f64 / self.time_scale)
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// What to discard when the publish queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverloadPolicy {
    /// Drop the oldest batch not yet started
    #[default]
    DropOldest,
    /// Drop the incoming batch
    SkipTick,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PublisherConfig {
    #[validate(range(min = 1, max = 1024))]
    pub workers: usize,
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    #[validate(range(min = 1))]
    pub publish_timeout_ms: u64,
    #[validate(range(max = 20))]
    pub max_retries: u32,
    #[validate(range(max = 60_000))]
    pub retry_backoff_ms: u64,
    pub overload_policy: OverloadPolicy,
    pub shutdown_flush_seconds: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 4,
            publish_timeout_ms: 2000,
            max_retries: 2,
            retry_backoff_ms: 100,
            overload_policy: OverloadPolicy::DropOldest,
            shutdown_flush_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Tunable model coefficients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ModelConfig {
    #[validate(nested)]
    pub environment: EnvironmentParams,
    #[validate(nested)]
    pub power: PowerParams,
    #[validate(nested)]
    pub faults: FaultParams,
}

fn validate_cross_fields(cfg: &Config) -> std::result::Result<(), ValidationError> {
    if cfg.broker.password.is_some() && cfg.broker.username.is_none() {
        return Err(ValidationError::new("password_without_username"));
    }
    if cfg.simulation.wall_period() < std::time::Duration::from_millis(1) {
        return Err(ValidationError::new("tick_period_below_1ms"));
    }
    Ok(())
}

/// Values set on the command line. `None` leaves the layered value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub transport: Option<Transport>,
    pub interval_seconds: Option<u64>,
    pub sites: Option<usize>,
    pub seed: Option<u64>,
    pub ticks: Option<u64>,
    pub time_scale: Option<f64>,
}

impl Overrides {
    pub fn apply(self, cfg: &mut Config) {
        if let Some(v) = self.host {
            cfg.broker.host = v;
        }
        if let Some(v) = self.port {
            cfg.broker.port = v;
        }
        if let Some(v) = self.username {
            cfg.broker.username = Some(v);
        }
        if let Some(v) = self.password {
            cfg.broker.password = Some(v);
        }
        if let Some(v) = self.transport {
            cfg.broker.transport = v;
        }
        if let Some(v) = self.interval_seconds {
            cfg.simulation.publish_interval_seconds = v;
        }
        if let Some(v) = self.sites {
            cfg.simulation.site_count = v;
        }
        if let Some(v) = self.seed {
            cfg.simulation.seed = v;
        }
        if let Some(v) = self.ticks {
            cfg.simulation.max_ticks = Some(v);
        }
        if let Some(v) = self.time_scale {
            cfg.simulation.time_scale = v;
        }
    }
}

impl Config {
    /// Defaults, then the TOML file, then `SOLARSIM__SECTION__KEY` variables.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Layer file and environment, apply CLI overrides, then validate.
    ///
    /// An explicitly given `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(SimError::Configuration(format!(
                    "config file {} not found",
                    p.display()
                )));
            }
        }
        let mut cfg: Config = Self::figment(path).extract()?;
        overrides.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }
}
