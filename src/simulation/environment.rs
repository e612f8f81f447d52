//! # Environmental Model
//!
//! Computes irradiance, temperatures, wind and humidity for a site at a given
//! instant using a clear-sky radiation model, a smooth cloud-cover process and
//! bounded noise.
//!
//! The model holds no mutable state. Everything random comes from the
//! caller-supplied generator and the per-site [`WeatherState`].

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal, Weibull};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use validator::Validate;

use crate::domain::{EnvironmentalSample, Site};

/// Tunable coefficients of the environmental model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EnvironmentParams {
    /// Extraterrestrial irradiance (W/m²)
    pub solar_constant_wm2: f64,
    /// Clear-sky atmospheric transmittance at air mass 1
    #[validate(range(min = 0.0, max = 1.0))]
    pub atmospheric_transmittance: f64,
    /// Maximum irradiance reduction at full overcast
    #[validate(range(min = 0.0, max = 1.0))]
    pub cloud_attenuation: f64,
    /// Exponent of the cloud attenuation curve
    #[validate(range(min = 0.1))]
    pub cloud_exponent: f64,
    /// Half-width of the multiplicative irradiance noise
    #[validate(range(min = 0.0, max = 0.5))]
    pub irradiance_noise: f64,
    /// Long-run mean cloud cover fraction
    #[validate(range(min = 0.0, max = 1.0))]
    pub mean_cloud_cover: f64,
    /// Per-tick mean reversion of the cloud/temperature processes
    #[validate(range(min = 0.0, max = 1.0))]
    pub weather_reversion: f64,
    /// Per-tick standard deviation of the cloud cover random walk
    #[validate(range(min = 0.0))]
    pub cloud_volatility: f64,
    /// Per-tick standard deviation of the temperature anomaly random walk (°C)
    #[validate(range(min = 0.0))]
    pub temperature_volatility_c: f64,
    /// Mean annual temperature at the equator (°C)
    pub equator_temperature_c: f64,
    /// Baseline cooling per degree of latitude (°C/deg)
    pub latitude_gradient_c: f64,
    /// Seasonal swing per degree of latitude (°C/deg)
    pub seasonal_amplitude_per_deg_c: f64,
    /// Day/night temperature half-swing (°C)
    pub diurnal_amplitude_c: f64,
    /// Standard deviation of per-sample temperature noise (°C)
    #[validate(range(min = 0.0))]
    pub temperature_noise_c: f64,
    /// Module heating per W/m² of irradiance (°C per W/m²)
    #[validate(range(min = 0.0))]
    pub thermal_coefficient: f64,
    /// Upper clamp for module temperature (°C)
    pub max_module_temperature_c: f64,
    /// Weibull scale for wind speed (m/s)
    #[validate(range(min = 0.1))]
    pub wind_scale_ms: f64,
    /// Weibull shape for wind speed
    #[validate(range(min = 0.1))]
    pub wind_shape: f64,
    /// Upper clamp for wind speed (m/s)
    #[validate(range(min = 0.0))]
    pub max_wind_speed_ms: f64,
    /// Relative humidity at the reference temperature under clear sky (%)
    pub base_humidity_percent: f64,
    /// Temperature at which humidity equals the base value (°C)
    pub humidity_reference_c: f64,
    /// Humidity drop per °C above the reference (%/°C)
    pub humidity_temperature_slope: f64,
    /// Humidity added at full overcast (%)
    pub humidity_cloud_gain: f64,
    /// Standard deviation of per-sample humidity noise (%)
    #[validate(range(min = 0.0))]
    pub humidity_noise_percent: f64,
    /// Lower clamp for humidity (%)
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_humidity_percent: f64,
}

impl Default for EnvironmentParams {
    fn default() -> Self {
        Self {
            solar_constant_wm2: 1367.0,
            atmospheric_transmittance: 0.75,
            cloud_attenuation: 0.75,
            cloud_exponent: 3.4,
            irradiance_noise: 0.03,
            mean_cloud_cover: 0.3,
            weather_reversion: 0.05,
            cloud_volatility: 0.04,
            temperature_volatility_c: 0.15,
            equator_temperature_c: 28.0,
            latitude_gradient_c: 0.45,
            seasonal_amplitude_per_deg_c: 0.25,
            diurnal_amplitude_c: 6.0,
            temperature_noise_c: 0.5,
            thermal_coefficient: 0.02,
            max_module_temperature_c: 85.0,
            wind_scale_ms: 4.5,
            wind_shape: 2.0,
            max_wind_speed_ms: 40.0,
            base_humidity_percent: 75.0,
            humidity_reference_c: 15.0,
            humidity_temperature_slope: 1.2,
            humidity_cloud_gain: 25.0,
            humidity_noise_percent: 3.0,
            min_humidity_percent: 5.0,
        }
    }
}

/// Slowly varying weather perturbation carried per site between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherState {
    /// Cloud cover fraction (0.0-1.0)
    pub cloud_cover: f64,
    /// Deviation from the climatological temperature (°C)
    pub temperature_anomaly_c: f64,
}

impl WeatherState {
    pub fn clear_sky() -> Self {
        Self {
            cloud_cover: 0.0,
            temperature_anomaly_c: 0.0,
        }
    }

    /// Random initial state around the climatological mean.
    pub fn initial<R: Rng>(params: &EnvironmentParams, rng: &mut R) -> Self {
        Self {
            cloud_cover: rng.gen_range(0.0..=(2.0 * params.mean_cloud_cover).min(1.0)),
            temperature_anomaly_c: rng.gen_range(-2.0..=2.0),
        }
    }

    /// Advance one tick: mean-reverting random walk on both components.
    pub fn advance<R: Rng>(&mut self, params: &EnvironmentParams, rng: &mut R) {
        let k = params.weather_reversion;
        let cloud_step = gaussian(rng, params.cloud_volatility);
        self.cloud_cover = (self.cloud_cover + k * (params.mean_cloud_cover - self.cloud_cover)
            + cloud_step)
            .clamp(0.0, 1.0);

        let temp_step = gaussian(rng, params.temperature_volatility_c);
        self.temperature_anomaly_c = self.temperature_anomaly_c * (1.0 - k) + temp_step;
    }
}

/// Solar geometry for a fixed location, evaluated in local solar time.
pub struct ClearSkyModel {
    latitude_deg: f64,
    longitude_deg: f64,
}

impl ClearSkyModel {
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
        }
    }

    /// Local solar hour (0-24), offset from UTC by longitude.
    pub fn solar_hour(&self, time: DateTime<Utc>) -> f64 {
        let utc_hour =
            time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0;
        (utc_hour + self.longitude_deg / 15.0).rem_euclid(24.0)
    }

    /// Solar elevation above the horizon in degrees.
    pub fn solar_elevation(&self, time: DateTime<Utc>) -> f64 {
        let day_of_year = time.ordinal() as f64;

        // Solar declination, -23.45° (December solstice) to +23.45° (June solstice)
        let declination_rad = (23.45 * (360.0 / 365.0 * (day_of_year + 284.0)).to_radians().sin())
            .to_radians();
        let latitude_rad = self.latitude_deg.to_radians();

        let hour_angle_rad = (15.0 * (self.solar_hour(time) - 12.0)).to_radians();

        let elevation_sin = latitude_rad.sin() * declination_rad.sin()
            + latitude_rad.cos() * declination_rad.cos() * hour_angle_rad.cos();
        elevation_sin.clamp(-1.0, 1.0).asin().to_degrees()
    }

    /// Clear-sky global irradiance in W/m². Zero when the sun is below the horizon.
    pub fn clear_sky_irradiance(&self, time: DateTime<Utc>, params: &EnvironmentParams) -> f64 {
        let elevation_deg = self.solar_elevation(time);
        if elevation_deg <= 0.0 {
            return 0.0;
        }
        let elevation_rad = elevation_deg.to_radians();

        // Linearised below 5° to avoid the 1/sin singularity
        let air_mass = if elevation_deg > 5.0 {
            1.0 / elevation_rad.sin()
        } else {
            12.0 - elevation_deg / 5.0
        };

        let transmittance = params.atmospheric_transmittance.powf(air_mass.powf(0.678));
        params.solar_constant_wm2 * transmittance * elevation_rad.sin()
    }
}

/// Stateless environmental sampler.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentModel {
    params: EnvironmentParams,
}

impl EnvironmentModel {
    pub fn new(params: EnvironmentParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EnvironmentParams {
        &self.params
    }

    /// Irradiance transmission through the given cloud cover (0.0-1.0).
    pub fn cloud_transmission(&self, cloud_cover: f64) -> f64 {
        1.0 - self.params.cloud_attenuation * cloud_cover.clamp(0.0, 1.0).powf(self.params.cloud_exponent)
    }

    /// Climatological ambient temperature without noise or anomaly.
    pub fn baseline_temperature(&self, site: &Site, time: DateTime<Utc>, solar_hour: f64) -> f64 {
        let p = &self.params;
        let abs_lat = site.latitude.abs();

        let baseline = p.equator_temperature_c - p.latitude_gradient_c * abs_lat;

        // Peaks around day 172 in the north, day 355 in the south
        let hemisphere = if site.latitude >= 0.0 { 1.0 } else { -1.0 };
        let season_phase = 2.0 * PI * (time.ordinal() as f64 - 80.0) / 365.0;
        let seasonal = hemisphere * p.seasonal_amplitude_per_deg_c * abs_lat * season_phase.sin();

        // Warmest mid-afternoon
        let diurnal = p.diurnal_amplitude_c * (2.0 * PI * (solar_hour - 15.0) / 24.0).cos();

        baseline + seasonal + diurnal
    }

    /// Sample conditions at `site` for `time`.
    pub fn sample<R: Rng>(
        &self,
        site: &Site,
        time: DateTime<Utc>,
        weather: &WeatherState,
        rng: &mut R,
    ) -> EnvironmentalSample {
        let p = &self.params;
        let sky = ClearSkyModel::new(site.latitude, site.longitude);
        let elevation = sky.solar_elevation(time);
        let solar_hour = sky.solar_hour(time);

        let clear_sky = sky.clear_sky_irradiance(time, p);
        let noise = if p.irradiance_noise > 0.0 {
            rng.gen_range(1.0 - p.irradiance_noise..=1.0 + p.irradiance_noise)
        } else {
            1.0
        };
        let irradiance = (clear_sky * self.cloud_transmission(weather.cloud_cover) * noise).max(0.0);

        let ambient = self.baseline_temperature(site, time, solar_hour)
            + weather.temperature_anomaly_c
            + gaussian(rng, p.temperature_noise_c);

        let module = (ambient + p.thermal_coefficient * irradiance).min(p.max_module_temperature_c);

        let wind = Weibull::new(p.wind_scale_ms, p.wind_shape)
            .map(|d| d.sample(rng))
            .unwrap_or(0.0)
            .clamp(0.0, p.max_wind_speed_ms.max(0.0));

        let humidity = (p.base_humidity_percent
            - p.humidity_temperature_slope * (ambient - p.humidity_reference_c)
            + p.humidity_cloud_gain * weather.cloud_cover
            + gaussian(rng, p.humidity_noise_percent))
        .clamp(p.min_humidity_percent.clamp(0.0, 100.0), 100.0);

        EnvironmentalSample {
            timestamp: time,
            irradiance_wm2: irradiance,
            ambient_temperature_c: ambient,
            module_temperature_c: module,
            wind_speed_ms: wind,
            humidity_percent: humidity,
            cloud_cover: weather.cloud_cover,
            solar_elevation_deg: elevation,
        }
    }
}

fn gaussian<R: Rng>(rng: &mut R, std_dev: f64) -> f64 {
    match Normal::new(0.0, std_dev) {
        Ok(normal) if std_dev > 0.0 => normal.sample(rng),
        _ => 0.0,
    }
}
