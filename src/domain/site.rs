use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::SiteId;

/// Rated power of a single PV string (kW)
pub const STRING_RATING_KW: f64 = 20.0;
/// Rated power of a single central inverter (kW)
pub const INVERTER_RATING_KW: f64 = 500.0;

/// Static attributes of a simulated solar farm.
///
/// Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    /// Latitude in degrees (positive = north)
    pub latitude: f64,
    /// Longitude in degrees (positive = east)
    pub longitude: f64,
    pub country: String,
    pub region: String,
    /// IANA timezone label, informational only
    pub timezone: String,
    pub installation_date: NaiveDate,
    /// Installed AC capacity in kW
    pub capacity_kw: f64,
    pub string_count: u32,
    pub inverter_count: u32,
}

impl Site {
    /// Build a site, deriving nameplate string and inverter counts from capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SiteId,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        country: impl Into<String>,
        region: impl Into<String>,
        timezone: impl Into<String>,
        installation_date: NaiveDate,
        capacity_kw: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            latitude,
            longitude,
            country: country.into(),
            region: region.into(),
            timezone: timezone.into(),
            installation_date,
            capacity_kw,
            string_count: nameplate_count(capacity_kw, STRING_RATING_KW),
            inverter_count: nameplate_count(capacity_kw, INVERTER_RATING_KW),
        }
    }

    /// Test/fixture helper: a site at the given coordinates with default metadata.
    pub fn at(id: impl Into<SiteId>, latitude: f64, longitude: f64, capacity_kw: f64) -> Self {
        let id = id.into();
        Self::new(
            id.clone(),
            format!("Fixture Solar Park {id}"),
            latitude,
            longitude,
            "Nowhere",
            "Fixture",
            "UTC",
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            capacity_kw,
        )
    }
}

fn nameplate_count(capacity_kw: f64, unit_kw: f64) -> u32 {
    (capacity_kw / unit_kw).ceil().max(1.0) as u32
}
