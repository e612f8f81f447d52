//! Solar farm fleet simulator.
//!
//! Generates a deterministic fleet of solar farms, models weather, power
//! conversion and fault/maintenance behaviour per site, and publishes
//! JSON telemetry to a message bus on a fixed cadence.

pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod publisher;
pub mod scheduler;
pub mod simulation;
pub mod telemetry;

pub use error::{Result, SimError};
