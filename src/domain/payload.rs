//! Wire payloads published to the message bus.
//!
//! Field names are an external contract with downstream collectors. New
//! fields may be appended; existing names must not change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ActiveFault, ClearReason, FaultKind, FaultSeverity, InverterStatus, MaintenanceWindow,
    OperationalStatus, Site, SiteId,
};

/// Instantaneous environmental conditions at a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalSample {
    pub timestamp: DateTime<Utc>,
    /// Plane-of-array irradiance in W/m²
    pub irradiance_wm2: f64,
    pub ambient_temperature_c: f64,
    pub module_temperature_c: f64,
    pub wind_speed_ms: f64,
    pub humidity_percent: f64,
    /// Cloud cover fraction (0.0 = clear, 1.0 = overcast)
    pub cloud_cover: f64,
    pub solar_elevation_deg: f64,
}

impl EnvironmentalSample {
    pub fn is_daylight(&self) -> bool {
        self.irradiance_wm2 > 0.0
    }
}

/// `{ns}/{site_id}/static`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPayload {
    pub site_id: SiteId,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub region: String,
    pub timezone: String,
    pub installation_date: NaiveDate,
    pub system_capacity_kw: f64,
    pub string_count: u32,
    pub inverter_count: u32,
}

impl From<&Site> for StaticPayload {
    fn from(site: &Site) -> Self {
        Self {
            site_id: site.id.clone(),
            site_name: site.name.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            country: site.country.clone(),
            region: site.region.clone(),
            timezone: site.timezone.clone(),
            installation_date: site.installation_date,
            system_capacity_kw: site.capacity_kw,
            string_count: site.string_count,
            inverter_count: site.inverter_count,
        }
    }
}

/// `{ns}/{site_id}/telemetry` — one per site per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub site_id: SiteId,
    pub power_output_kw: f64,
    /// Cumulative totals (kWh)
    pub energy_generated_kwh: f64,
    pub energy_consumed_kwh: f64,
    pub energy_exported_kwh: f64,
    /// Energy over the last interval (kWh)
    pub energy_generated_interval_kwh: f64,
    pub energy_consumed_interval_kwh: f64,
    pub energy_exported_interval_kwh: f64,
    pub irradiance_wm2: f64,
    pub ambient_temperature_c: f64,
    pub module_temperature_c: f64,
    pub wind_speed_ms: f64,
    pub humidity_percent: f64,
    pub inverter_efficiency: f64,
    pub system_efficiency: f64,
    /// Lifetime fault count, never decreases
    pub fault_count: u64,
    pub active_fault_count: u32,
    pub string_faults: u32,
    pub maintenance_mode: bool,
    pub operational_status: OperationalStatus,
    pub inverter_status: InverterStatus,
    pub dc_voltage_v: f64,
    pub ac_voltage_v: f64,
}

/// `{ns}/{site_id}/faults` — emitted when a fault is raised or cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPayload {
    pub timestamp: DateTime<Utc>,
    pub site_id: SiteId,
    pub fault_kind: FaultKind,
    pub severity: FaultSeverity,
    pub active: bool,
    pub onset: DateTime<Utc>,
    pub failed_strings: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_reason: Option<ClearReason>,
}

impl FaultPayload {
    pub fn raised(site_id: &SiteId, fault: &ActiveFault, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            site_id: site_id.clone(),
            fault_kind: fault.kind,
            severity: fault.severity,
            active: true,
            onset: fault.onset,
            failed_strings: fault.failed_strings,
            clear_reason: None,
        }
    }

    pub fn cleared(
        site_id: &SiteId,
        fault: &ActiveFault,
        reason: ClearReason,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            active: false,
            clear_reason: Some(reason),
            ..Self::raised(site_id, fault, at)
        }
    }
}

/// `{ns}/{site_id}/maintenance` — emitted when a window starts or ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenancePayload {
    pub timestamp: DateTime<Utc>,
    pub site_id: SiteId,
    pub active: bool,
    pub start: DateTime<Utc>,
    pub expected_end: DateTime<Utc>,
}

impl MaintenancePayload {
    pub fn new(
        site_id: &SiteId,
        window: &MaintenanceWindow,
        active: bool,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: at,
            site_id: site_id.clone(),
            active,
            start: window.start,
            expected_end: window.expected_end(),
        }
    }
}

/// `{ns}/{site_id}/weather` — every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherPayload {
    pub site_id: SiteId,
    #[serde(flatten)]
    pub sample: EnvironmentalSample,
}
