use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

// ============================================================================
// Site identity
// ============================================================================

/// Stable site identifier, formatted `site_001`, `site_002`, ...
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub String);

impl SiteId {
    /// Identifier for the n-th generated site (1-based).
    pub fn from_index(n: usize) -> Self {
        Self(format!("site_{n:03}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Status enums (wire values are snake_case and must stay stable)
// ============================================================================

/// Summary state of a site at a given tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationalStatus {
    Online,
    Degraded,
    Fault,
    Maintenance,
    Offline,
}

/// Inverter health as reported alongside the operational status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InverterStatus {
    Healthy,
    Fault,
    Maintenance,
    Standby,
}

/// Ordinal fault impact. Ordering matters: `Critical` forces shutdown.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultSeverity {
    Minor,
    Major,
    Critical,
}

impl FaultSeverity {
    pub fn forces_shutdown(&self) -> bool {
        *self >= FaultSeverity::Critical
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    /// Transient inverter firmware/control glitch
    InverterGlitch,
    /// Inverter tripped offline on protection
    InverterTrip,
    /// One or more PV strings disconnected (blown fuse, connector failure)
    StringFailure,
    /// Insulation/ground fault on the DC side
    GroundFault,
    /// Step-up transformer failure, site cannot export
    TransformerFailure,
}

impl FaultKind {
    /// Faults that are attributed to the inverter itself.
    pub fn is_inverter_fault(&self) -> bool {
        matches!(self, FaultKind::InverterGlitch | FaultKind::InverterTrip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClearReason {
    /// Repaired without intervention
    SelfHealed,
    /// Reached the maximum fault duration
    Expired,
    /// Cleared as part of a maintenance window
    Maintenance,
}

// ============================================================================
// Fault and maintenance records
// ============================================================================

/// A fault currently affecting a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveFault {
    pub kind: FaultKind,
    pub severity: FaultSeverity,
    pub onset: DateTime<Utc>,
    /// Number of strings disconnected (string failures only)
    pub failed_strings: u32,
}

impl ActiveFault {
    pub fn new(kind: FaultKind, severity: FaultSeverity, onset: DateTime<Utc>) -> Self {
        Self {
            kind,
            severity,
            onset,
            failed_strings: 0,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.onset).max(Duration::zero())
    }
}

/// A scheduled maintenance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start: DateTime<Utc>,
    pub duration_seconds: i64,
}

impl MaintenanceWindow {
    pub fn new(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            duration_seconds: duration.num_seconds().max(0),
        }
    }

    pub fn expected_end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.duration_seconds)
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expected_end()
    }
}
