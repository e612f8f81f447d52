//! # Fleet Simulation Module
//!
//! Physical and operational models of a solar farm fleet.
//!
//! ## Components
//!
//! - **Registry**: Deterministic fleet generation across both hemispheres
//! - **Environment**: Clear-sky irradiance, cloud attenuation, ambient/module temperature, wind and humidity
//! - **Power**: DC/AC conversion with temperature derating, inverter efficiency and energy accounting
//! - **Faults**: Normal / Faulted / Maintenance state machine driven by pre-sampled draws
//! - **Fleet**: Per-site runtime state and the engine that steps every site each tick
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use solar_fleet_sim::simulation::{
//!     EnvironmentModel, FaultParams, FaultStateMachine, PowerModel, SimulationEngine, SiteRegistry,
//! };
//!
//! let registry = SiteRegistry::generate(10, 42);
//! let faults = FaultStateMachine::new(FaultParams::default(), 0.005, 0.0001).unwrap();
//! let mut engine = SimulationEngine::new(
//!     registry,
//!     EnvironmentModel::default(),
//!     PowerModel::default(),
//!     faults,
//!     42,
//! );
//!
//! let ticks = engine.tick(Utc::now(), Duration::seconds(30)).unwrap();
//! assert_eq!(ticks.len(), 10);
//! ```

pub mod environment;
pub mod faults;
pub mod fleet;
pub mod invariants;
pub mod power;
pub mod registry;

pub use environment::{ClearSkyModel, EnvironmentModel, EnvironmentParams, WeatherState};
pub use faults::{
    FaultParams, FaultStateMachine, FaultWeight, ModeEvent, SiteMode, Transition, TransitionDraw,
};
pub use fleet::{FleetState, SimulationEngine, SiteRuntime, SiteTick};
pub use power::{EnergyTotals, PowerModel, PowerParams, PowerReading};
pub use registry::{FleetSummary, Region, SiteRegistry};
