#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use solar_fleet_sim::config::Config;
use solar_fleet_sim::domain::Site;
use solar_fleet_sim::simulation::{
    EnvironmentModel, FaultParams, FaultStateMachine, PowerModel, SimulationEngine, SiteRegistry,
};

/// March equinox, solar noon on the prime meridian.
pub fn equinox_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
}

/// 1 MW site on the equator at the prime meridian.
pub fn equator_site() -> Site {
    Site::at("site_001", 0.0, 0.0, 1000.0)
}

/// Engine over explicit sites with no spontaneous maintenance.
pub fn engine_for(sites: Vec<Site>, fault_probability: f64, faults: FaultParams) -> SimulationEngine {
    SimulationEngine::new(
        SiteRegistry::from_sites(sites).unwrap(),
        EnvironmentModel::default(),
        PowerModel::default(),
        FaultStateMachine::new(faults, fault_probability, 0.0).unwrap(),
        42,
    )
}

/// Quiet, fast configuration for scheduler runs on the in-memory bus.
pub fn test_config(sites: usize, max_ticks: u64) -> Config {
    let mut cfg = Config::default();
    cfg.simulation.site_count = sites;
    cfg.simulation.max_ticks = Some(max_ticks);
    cfg.simulation.start_time = Some(equinox_noon());
    cfg.simulation.fault_probability = 0.0;
    cfg.simulation.maintenance_probability = 0.0;
    cfg.publisher.retry_backoff_ms = 1;
    cfg
}
