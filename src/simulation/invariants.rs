//! Model invariant guards.
//!
//! A violated invariant is a programming defect. Debug builds (development
//! and tests) panic; release builds clamp the value and log at `error`.

use tracing::error;

use crate::domain::SiteId;
use crate::error::SimError;

fn violation(site: &SiteId, detail: String) {
    let err = SimError::InvariantViolation(format!("{site}: {detail}"));
    if cfg!(debug_assertions) {
        panic!("{err}");
    }
    error!(site_id = %site, error = %err, "clamping invalid model output");
}

/// Energy deltas and power must never be negative (or NaN).
pub fn non_negative(site: &SiteId, field: &'static str, value: f64) -> f64 {
    if value >= 0.0 {
        return value;
    }
    violation(site, format!("{field} = {value} is negative"));
    0.0
}

/// Ratios reported on the wire must stay within [0, 1].
pub fn unit_interval(site: &SiteId, field: &'static str, value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        return value;
    }
    violation(site, format!("{field} = {value} outside [0, 1]"));
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
