//! # Site Registry
//!
//! Deterministic generation of the simulated fleet. Sites are spread over a
//! fixed table of regions with plausible latitude/longitude bands so that
//! both hemispheres (and therefore opposite seasons) are represented.

use std::collections::HashMap;

use chrono::NaiveDate;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::domain::{Site, SiteId};
use crate::error::{Result, SimError};

/// A geographic band sites may be placed in.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub country: &'static str,
    pub name: &'static str,
    pub timezone: &'static str,
    pub lat_range: (f64, f64),
    pub lon_range: (f64, f64),
}

const fn region(
    country: &'static str,
    name: &'static str,
    timezone: &'static str,
    lat_range: (f64, f64),
    lon_range: (f64, f64),
) -> Region {
    Region {
        country,
        name,
        timezone,
        lat_range,
        lon_range,
    }
}

pub const REGIONS: &[Region] = &[
    // North America
    region("United States", "California", "America/Los_Angeles", (32.0, 42.0), (-124.0, -114.0)),
    region("United States", "Texas", "America/Chicago", (25.0, 37.0), (-107.0, -93.0)),
    region("United States", "Arizona", "America/Phoenix", (31.0, 37.0), (-115.0, -109.0)),
    region("United States", "Nevada", "America/Los_Angeles", (35.0, 42.0), (-120.0, -114.0)),
    region("Canada", "Ontario", "America/Toronto", (42.0, 57.0), (-95.0, -74.0)),
    region("Mexico", "Sonora", "America/Hermosillo", (27.0, 32.0), (-115.0, -108.0)),
    // South America
    region("Brazil", "Minas Gerais", "America/Sao_Paulo", (-22.0, -14.0), (-51.0, -39.0)),
    region("Chile", "Atacama", "America/Santiago", (-29.0, -24.0), (-71.0, -68.0)),
    region("Argentina", "Mendoza", "America/Argentina/Mendoza", (-37.0, -32.0), (-70.0, -66.0)),
    // Europe
    region("Spain", "Andalusia", "Europe/Madrid", (36.0, 38.0), (-7.0, -1.0)),
    region("Germany", "Bavaria", "Europe/Berlin", (47.0, 50.0), (9.0, 13.0)),
    region("Italy", "Sicily", "Europe/Rome", (36.0, 38.0), (12.0, 16.0)),
    region("France", "Provence", "Europe/Paris", (43.0, 45.0), (4.0, 7.0)),
    region("Greece", "Crete", "Europe/Athens", (35.0, 36.0), (23.0, 26.0)),
    // Africa
    region("South Africa", "Northern Cape", "Africa/Johannesburg", (-33.0, -28.0), (16.0, 24.0)),
    region("Morocco", "Ouarzazate", "Africa/Casablanca", (30.0, 32.0), (-8.0, -6.0)),
    region("Egypt", "Aswan", "Africa/Cairo", (24.0, 26.0), (32.0, 34.0)),
    // Asia
    region("India", "Rajasthan", "Asia/Kolkata", (24.0, 30.0), (69.0, 78.0)),
    region("China", "Xinjiang", "Asia/Shanghai", (35.0, 49.0), (73.0, 96.0)),
    region("Japan", "Kyushu", "Asia/Tokyo", (31.0, 34.0), (129.0, 132.0)),
    region("Australia", "Queensland", "Australia/Brisbane", (-29.0, -10.0), (138.0, 154.0)),
    // Middle East
    region("United Arab Emirates", "Abu Dhabi", "Asia/Dubai", (22.0, 26.0), (51.0, 56.0)),
    region("Saudi Arabia", "Riyadh", "Asia/Riyadh", (24.0, 27.0), (46.0, 48.0)),
];

/// Installed capacity classes in kW: small, medium, large, utility scale.
pub const CAPACITY_CLASSES_KW: &[(u32, u32)] = &[
    (1_000, 5_000),
    (5_000, 25_000),
    (25_000, 100_000),
    (100_000, 500_000),
];

const NAME_SUFFIXES: &[&str] = &[
    "Solar Park",
    "Energy Farm",
    "Power Station",
    "Solar Plant",
    "Green Energy Hub",
    "Renewable Center",
    "Solar Complex",
    "Energy Station",
    "Power Farm",
    "Solar Field",
    "Clean Energy Park",
    "Photovoltaic Plant",
    "Solar Installation",
    "Energy Complex",
];

/// Aggregate view of the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub total_farms: usize,
    pub total_capacity_kw: f64,
    pub average_capacity_kw: f64,
    pub countries: Vec<String>,
}

/// Ordered, immutable collection of sites.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    sites: Vec<Site>,
    index: HashMap<SiteId, usize>,
}

impl SiteRegistry {
    /// Generate `count` sites. Same `(count, seed)` always yields the same fleet.
    pub fn generate(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sites = (1..=count).map(|n| generate_site(n, &mut rng)).collect();
        Self::build(sites)
    }

    /// Build a registry from explicit sites. Ids must be unique.
    pub fn from_sites(sites: Vec<Site>) -> Result<Self> {
        if let Some(dup) = sites.iter().map(|s| &s.id).duplicates().next() {
            return Err(SimError::Configuration(format!("duplicate site id {dup}")));
        }
        Ok(Self::build(sites))
    }

    fn build(sites: Vec<Site>) -> Self {
        let index = sites
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self { sites, index }
    }

    pub fn lookup(&self, id: &SiteId) -> Result<&Site> {
        self.index
            .get(id)
            .map(|&i| &self.sites[i])
            .ok_or_else(|| SimError::SiteNotFound(id.clone()))
    }

    /// Position of a site in generation order.
    pub fn position(&self, id: &SiteId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn summary(&self) -> FleetSummary {
        let total_capacity_kw: f64 = self.sites.iter().map(|s| s.capacity_kw).sum();
        let average_capacity_kw = if self.sites.is_empty() {
            0.0
        } else {
            total_capacity_kw / self.sites.len() as f64
        };
        FleetSummary {
            total_farms: self.sites.len(),
            total_capacity_kw,
            average_capacity_kw,
            countries: self
                .sites
                .iter()
                .map(|s| s.country.clone())
                .unique()
                .sorted()
                .collect(),
        }
    }
}

fn generate_site(n: usize, rng: &mut StdRng) -> Site {
    let region = REGIONS[rng.gen_range(0..REGIONS.len())];

    let latitude = round6(rng.gen_range(region.lat_range.0..=region.lat_range.1));
    let longitude = round6(rng.gen_range(region.lon_range.0..=region.lon_range.1));

    let installation_date = NaiveDate::from_ymd_opt(
        rng.gen_range(2014..=2024),
        rng.gen_range(1..=12),
        rng.gen_range(1..=28),
    )
    .unwrap_or_default();

    let (lo, hi) = CAPACITY_CLASSES_KW[rng.gen_range(0..CAPACITY_CLASSES_KW.len())];
    let capacity_kw = rng.gen_range(lo..=hi) as f64;

    let suffix = NAME_SUFFIXES.choose(rng).copied().unwrap_or("Solar Park");
    let name = format!("{} {} {:03}", region.name, suffix, n);

    Site::new(
        SiteId::from_index(n),
        name,
        latitude,
        longitude,
        region.country,
        region.name,
        region.timezone,
        installation_date,
        capacity_kw,
    )
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
