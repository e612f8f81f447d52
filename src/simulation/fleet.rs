//! # Fleet runtime
//!
//! Mutable per-site state (mode, weather, energy counters, generator) and
//! the engine that steps every site through one simulated tick.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::environment::{EnvironmentModel, WeatherState};
use super::faults::{FaultStateMachine, ModeEvent, SiteMode, TransitionDraw};
use super::power::{EnergyTotals, PowerModel, PowerReading};
use super::registry::SiteRegistry;
use crate::config::Config;
use crate::domain::{
    ActiveFault, ClearReason, EnvironmentalSample, FaultKind, FaultSeverity, MaintenanceWindow,
    Site, SiteId, TelemetrySnapshot,
};
use crate::error::{Result, SimError};

/// Hours of full-capacity production an opening energy balance may represent.
const OPENING_BALANCE_HOURS: f64 = 8.0;

/// Mutable state of one site between ticks.
#[derive(Debug, Clone)]
pub struct SiteRuntime {
    pub mode: SiteMode,
    pub weather: WeatherState,
    pub totals: EnergyTotals,
    /// Faults ever raised on this site
    pub lifetime_fault_count: u64,
    /// Events from manual injection, published with the next tick
    pending_events: Vec<ModeEvent>,
    rng: StdRng,
}

impl SiteRuntime {
    fn new(site: &Site, index: usize, seed: u64, env: &EnvironmentModel, parasitic: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(site_seed(seed, index));
        let weather = WeatherState::initial(env.params(), &mut rng);
        let opening = rng.gen_range(0.0..=site.capacity_kw.max(0.0) * OPENING_BALANCE_HOURS);
        Self {
            mode: SiteMode::Normal,
            weather,
            totals: EnergyTotals::opening(opening, parasitic),
            lifetime_fault_count: 0,
            pending_events: Vec::new(),
            rng,
        }
    }
}

/// Independent stream per site so results never depend on evaluation order.
fn site_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((index as u64 + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9))
}

/// Owned runtime state of the whole fleet, keyed by site id.
#[derive(Debug, Clone, Default)]
pub struct FleetState {
    sites: BTreeMap<SiteId, SiteRuntime>,
}

impl FleetState {
    pub fn get(&self, id: &SiteId) -> Result<&SiteRuntime> {
        self.sites
            .get(id)
            .ok_or_else(|| SimError::SiteNotFound(id.clone()))
    }

    pub fn get_mut(&mut self, id: &SiteId) -> Result<&mut SiteRuntime> {
        self.sites
            .get_mut(id)
            .ok_or_else(|| SimError::SiteNotFound(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SiteId, &SiteRuntime)> {
        self.sites.iter()
    }

    /// Force a fault onto a site in normal operation.
    ///
    /// Returns `false` (and changes nothing) when the site is already
    /// faulted or in maintenance.
    pub fn inject_fault(
        &mut self,
        id: &SiteId,
        kind: FaultKind,
        severity: FaultSeverity,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let runtime = self.get_mut(id)?;
        if runtime.mode != SiteMode::Normal {
            return Ok(false);
        }
        let mut fault = ActiveFault::new(kind, severity, at);
        if kind == FaultKind::StringFailure {
            fault.failed_strings = 1;
        }
        runtime.mode = SiteMode::Faulted(fault.clone());
        runtime.lifetime_fault_count += 1;
        runtime.pending_events.push(ModeEvent::FaultRaised(fault));
        info!(site_id = %id, %kind, %severity, "fault injected");
        Ok(true)
    }

    /// Start a maintenance window now, clearing any active fault.
    ///
    /// Returns `false` when the site is already in maintenance.
    pub fn begin_maintenance(
        &mut self,
        id: &SiteId,
        at: DateTime<Utc>,
        duration: Duration,
    ) -> Result<bool> {
        let runtime = self.get_mut(id)?;
        if runtime.mode.in_maintenance() {
            return Ok(false);
        }
        if let SiteMode::Faulted(fault) = &runtime.mode {
            runtime.pending_events.push(ModeEvent::FaultCleared {
                fault: fault.clone(),
                reason: ClearReason::Maintenance,
            });
        }
        let window = MaintenanceWindow::new(at, duration);
        runtime.mode = SiteMode::Maintenance(window.clone());
        runtime
            .pending_events
            .push(ModeEvent::MaintenanceStarted(window));
        info!(site_id = %id, duration_s = duration.num_seconds(), "maintenance scheduled");
        Ok(true)
    }
}

/// Everything one site produced during a tick.
#[derive(Debug, Clone)]
pub struct SiteTick {
    pub site_id: SiteId,
    pub snapshot: TelemetrySnapshot,
    pub environment: EnvironmentalSample,
    /// Mode changes in the order they happened
    pub events: Vec<ModeEvent>,
}

/// Drives the models over the registry and owns the fleet state.
#[derive(Debug)]
pub struct SimulationEngine {
    registry: SiteRegistry,
    environment: EnvironmentModel,
    power: PowerModel,
    faults: FaultStateMachine,
    state: FleetState,
}

impl SimulationEngine {
    pub fn new(
        registry: SiteRegistry,
        environment: EnvironmentModel,
        power: PowerModel,
        faults: FaultStateMachine,
        seed: u64,
    ) -> Self {
        let parasitic = power.params().parasitic_fraction;
        let sites = registry
            .sites()
            .iter()
            .enumerate()
            .map(|(i, site)| {
                (
                    site.id.clone(),
                    SiteRuntime::new(site, i, seed, &environment, parasitic),
                )
            })
            .collect();
        Self {
            registry,
            environment,
            power,
            faults,
            state: FleetState { sites },
        }
    }

    /// Build the fleet and models described by `cfg`.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let sim = &cfg.simulation;
        let faults = FaultStateMachine::new(
            cfg.model.faults.clone(),
            sim.fault_probability,
            sim.maintenance_probability,
        )
        .map_err(|e| SimError::Configuration(format!("model.faults.distribution: {e}")))?;
        Ok(Self::new(
            SiteRegistry::generate(sim.site_count, sim.seed),
            EnvironmentModel::new(cfg.model.environment.clone()),
            PowerModel::new(cfg.model.power.clone()),
            faults,
            sim.seed,
        ))
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn state(&self) -> &FleetState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FleetState {
        &mut self.state
    }

    pub fn environment(&self) -> &EnvironmentModel {
        &self.environment
    }

    pub fn power(&self) -> &PowerModel {
        &self.power
    }

    pub fn faults(&self) -> &FaultStateMachine {
        &self.faults
    }

    /// Step one site to `now`, `interval` after its previous tick.
    pub fn step_site(&mut self, id: &SiteId, now: DateTime<Utc>, interval: Duration) -> Result<SiteTick> {
        let site = self.registry.lookup(id)?;
        let runtime = self
            .state
            .sites
            .get_mut(id)
            .ok_or_else(|| SimError::SiteNotFound(id.clone()))?;

        let mut events = std::mem::take(&mut runtime.pending_events);

        runtime
            .weather
            .advance(self.environment.params(), &mut runtime.rng);

        let draw = TransitionDraw::sample(&mut runtime.rng, &self.faults);
        let transition = self.faults.transition(&runtime.mode, now, &draw);
        for event in &transition.events {
            if let ModeEvent::FaultRaised(fault) = event {
                runtime.lifetime_fault_count += 1;
                debug!(site_id = %id, kind = %fault.kind, severity = %fault.severity, "fault raised");
            }
        }
        runtime.mode = transition.next;
        events.extend(transition.events);

        let environment = self
            .environment
            .sample(site, now, &runtime.weather, &mut runtime.rng);
        let reading = self
            .power
            .compute(site, &environment, &runtime.mode, &runtime.totals, interval);
        runtime.totals = reading.totals;

        let snapshot = assemble_snapshot(site, &environment, &reading, runtime);
        Ok(SiteTick {
            site_id: id.clone(),
            snapshot,
            environment,
            events,
        })
    }

    /// Step every site in registry order.
    pub fn tick(&mut self, now: DateTime<Utc>, interval: Duration) -> Result<Vec<SiteTick>> {
        let ids: Vec<SiteId> = self.registry.sites().iter().map(|s| s.id.clone()).collect();
        ids.iter()
            .map(|id| self.step_site(id, now, interval))
            .collect()
    }
}

fn assemble_snapshot(
    site: &Site,
    env: &EnvironmentalSample,
    reading: &PowerReading,
    runtime: &SiteRuntime,
) -> TelemetrySnapshot {
    let fault = runtime.mode.active_fault();
    TelemetrySnapshot {
        timestamp: env.timestamp,
        site_id: site.id.clone(),
        power_output_kw: reading.power_output_kw,
        energy_generated_kwh: reading.totals.generated_kwh,
        energy_consumed_kwh: reading.totals.consumed_kwh,
        energy_exported_kwh: reading.totals.exported_kwh,
        energy_generated_interval_kwh: reading.generated_delta_kwh,
        energy_consumed_interval_kwh: reading.consumed_delta_kwh,
        energy_exported_interval_kwh: reading.exported_delta_kwh,
        irradiance_wm2: env.irradiance_wm2,
        ambient_temperature_c: env.ambient_temperature_c,
        module_temperature_c: env.module_temperature_c,
        wind_speed_ms: env.wind_speed_ms,
        humidity_percent: env.humidity_percent,
        inverter_efficiency: reading.inverter_efficiency,
        system_efficiency: reading.system_efficiency,
        fault_count: runtime.lifetime_fault_count,
        active_fault_count: u32::from(fault.is_some()),
        string_faults: fault.map(|f| f.failed_strings).unwrap_or(0),
        maintenance_mode: runtime.mode.in_maintenance(),
        operational_status: reading.operational_status,
        inverter_status: reading.inverter_status,
        dc_voltage_v: reading.dc_voltage_v,
        ac_voltage_v: reading.ac_voltage_v,
    }
}
