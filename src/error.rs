use thiserror::Error;

use crate::bus::BusError;
use crate::domain::SiteId;

/// Library-level error type.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Site not found: {0}")]
    SiteNotFound(SiteId),

    #[error("Model invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl From<figment::Error> for SimError {
    fn from(e: figment::Error) -> Self {
        SimError::Configuration(e.to_string())
    }
}

impl From<validator::ValidationErrors> for SimError {
    fn from(e: validator::ValidationErrors) -> Self {
        SimError::Configuration(e.to_string())
    }
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
