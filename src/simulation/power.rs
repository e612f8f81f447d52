//! # Power Model
//!
//! Converts environmental conditions, site capacity and the current
//! fault/maintenance mode into AC output, energy accounting, efficiency
//! ratios and operational status.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::faults::SiteMode;
use super::invariants;
use crate::domain::{EnvironmentalSample, FaultSeverity, InverterStatus, OperationalStatus, Site};

/// Tunable coefficients of the power model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PowerParams {
    /// Irradiance at which the array produces nameplate DC power (W/m²)
    #[validate(range(min = 1.0))]
    pub reference_irradiance_wm2: f64,
    /// Peak inverter conversion efficiency
    #[validate(range(min = 0.0, max = 1.0))]
    pub inverter_peak_efficiency: f64,
    /// Standby loss as a fraction of rated power, shapes the part-load curve
    #[validate(range(min = 0.0, max = 1.0))]
    pub inverter_standby_loss: f64,
    /// Module temperature above which output derates (°C)
    pub derating_threshold_c: f64,
    /// Fractional power loss per °C above the threshold
    #[validate(range(min = 0.0, max = 0.1))]
    pub derating_per_degree: f64,
    /// Output reduction for a minor fault
    #[validate(range(min = 0.0, max = 1.0))]
    pub minor_fault_derate: f64,
    /// Output reduction for a major fault
    #[validate(range(min = 0.0, max = 1.0))]
    pub major_fault_derate: f64,
    /// Share of generated energy consumed on site (trackers, auxiliaries)
    #[validate(range(min = 0.0, max = 1.0))]
    pub parasitic_fraction: f64,
    /// Nominal DC link voltage at 25 °C (V)
    pub nominal_dc_voltage_v: f64,
    /// DC voltage temperature coefficient (1/°C)
    pub dc_voltage_temp_coeff: f64,
    /// Nominal AC output voltage (V)
    pub nominal_ac_voltage_v: f64,
}

impl Default for PowerParams {
    fn default() -> Self {
        Self {
            reference_irradiance_wm2: 1000.0,
            inverter_peak_efficiency: 0.97,
            inverter_standby_loss: 0.01,
            derating_threshold_c: 25.0,
            derating_per_degree: 0.0035,
            minor_fault_derate: 0.15,
            major_fault_derate: 0.5,
            parasitic_fraction: 0.02,
            nominal_dc_voltage_v: 700.0,
            dc_voltage_temp_coeff: -0.0035,
            nominal_ac_voltage_v: 400.0,
        }
    }
}

/// Cumulative energy counters of a site (kWh). Never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyTotals {
    pub generated_kwh: f64,
    pub consumed_kwh: f64,
    pub exported_kwh: f64,
}

impl EnergyTotals {
    /// Opening balance consistent with the parasitic split.
    pub fn opening(generated_kwh: f64, parasitic_fraction: f64) -> Self {
        let consumed_kwh = generated_kwh * parasitic_fraction;
        Self {
            generated_kwh,
            consumed_kwh,
            exported_kwh: generated_kwh - consumed_kwh,
        }
    }
}

/// Output of one power model evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerReading {
    pub dc_power_kw: f64,
    pub power_output_kw: f64,
    pub generated_delta_kwh: f64,
    pub consumed_delta_kwh: f64,
    pub exported_delta_kwh: f64,
    pub totals: EnergyTotals,
    pub inverter_efficiency: f64,
    pub system_efficiency: f64,
    pub operational_status: OperationalStatus,
    pub inverter_status: InverterStatus,
    pub dc_voltage_v: f64,
    pub ac_voltage_v: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PowerModel {
    params: PowerParams,
}

impl PowerModel {
    pub fn new(params: PowerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PowerParams {
        &self.params
    }

    /// Linear temperature derating factor in [0, 1].
    pub fn temperature_derating(&self, module_temperature_c: f64) -> f64 {
        let excess = (module_temperature_c - self.params.derating_threshold_c).max(0.0);
        (1.0 - self.params.derating_per_degree * excess).clamp(0.0, 1.0)
    }

    /// Part-load inverter efficiency for a DC load fraction.
    pub fn inverter_efficiency_at(&self, load_fraction: f64) -> f64 {
        if load_fraction <= 0.0 {
            return 0.0;
        }
        let p = &self.params;
        (p.inverter_peak_efficiency * load_fraction / (load_fraction + p.inverter_standby_loss))
            .clamp(0.0, 1.0)
    }

    /// Fraction of usable capacity left by the current mode (1.0 = unimpaired).
    pub fn capacity_factor(&self, mode: &SiteMode) -> f64 {
        match mode {
            SiteMode::Normal => 1.0,
            SiteMode::Maintenance(_) => 0.0,
            SiteMode::Faulted(fault) => match fault.severity {
                FaultSeverity::Minor => 1.0 - self.params.minor_fault_derate,
                FaultSeverity::Major => 1.0 - self.params.major_fault_derate,
                FaultSeverity::Critical => 0.0,
            },
        }
    }

    pub fn compute(
        &self,
        site: &Site,
        env: &EnvironmentalSample,
        mode: &SiteMode,
        previous: &EnergyTotals,
        interval: Duration,
    ) -> PowerReading {
        let p = &self.params;
        let capacity = site.capacity_kw.max(0.0);
        let irradiance_ratio = env.irradiance_wm2.max(0.0) / p.reference_irradiance_wm2;

        let available_dc =
            capacity * irradiance_ratio * self.temperature_derating(env.module_temperature_c);
        let dc_power_kw = available_dc * self.capacity_factor(mode).clamp(0.0, 1.0);

        let load_fraction = if capacity > 0.0 { dc_power_kw / capacity } else { 0.0 };
        let conversion = self.inverter_efficiency_at(load_fraction);
        // Inverters clip at rated AC power
        let ac = (dc_power_kw * conversion).min(capacity);
        let power_output_kw = invariants::non_negative(&site.id, "power_output_kw", ac);

        let (operational_status, inverter_status) = classify(mode, env);

        let hours = interval.num_milliseconds().max(0) as f64 / 3_600_000.0;
        let generated = invariants::non_negative(
            &site.id,
            "energy_generated_delta_kwh",
            power_output_kw * hours,
        );
        let consumed = generated * p.parasitic_fraction;
        let exported = invariants::non_negative(
            &site.id,
            "energy_exported_delta_kwh",
            generated - consumed,
        );

        let totals = EnergyTotals {
            generated_kwh: previous.generated_kwh + generated,
            consumed_kwh: previous.consumed_kwh + consumed,
            exported_kwh: previous.exported_kwh + exported,
        };

        let inverter_efficiency = invariants::unit_interval(
            &site.id,
            "inverter_efficiency",
            ratio(power_output_kw, dc_power_kw),
        );
        let system_efficiency = invariants::unit_interval(
            &site.id,
            "system_efficiency",
            ratio(power_output_kw, capacity * irradiance_ratio),
        );

        let producing = power_output_kw > 0.0;
        let dc_voltage_v = if producing {
            p.nominal_dc_voltage_v * (1.0 + p.dc_voltage_temp_coeff * (env.module_temperature_c - 25.0))
        } else {
            0.0
        };
        let ac_voltage_v = if producing { p.nominal_ac_voltage_v } else { 0.0 };

        PowerReading {
            dc_power_kw,
            power_output_kw,
            generated_delta_kwh: generated,
            consumed_delta_kwh: consumed,
            exported_delta_kwh: exported,
            totals,
            inverter_efficiency,
            system_efficiency,
            operational_status,
            inverter_status,
            dc_voltage_v,
            ac_voltage_v,
        }
    }
}

fn classify(mode: &SiteMode, env: &EnvironmentalSample) -> (OperationalStatus, InverterStatus) {
    match mode {
        SiteMode::Maintenance(_) => (OperationalStatus::Maintenance, InverterStatus::Maintenance),
        SiteMode::Faulted(fault) if fault.severity.forces_shutdown() => {
            (OperationalStatus::Fault, InverterStatus::Fault)
        }
        SiteMode::Faulted(fault) => {
            let inverter = if fault.kind.is_inverter_fault() {
                InverterStatus::Fault
            } else if env.is_daylight() {
                InverterStatus::Healthy
            } else {
                InverterStatus::Standby
            };
            (OperationalStatus::Degraded, inverter)
        }
        SiteMode::Normal if env.is_daylight() => (OperationalStatus::Online, InverterStatus::Healthy),
        SiteMode::Normal => (OperationalStatus::Offline, InverterStatus::Standby),
    }
}

/// `num / den`, or 0 when the denominator is not positive.
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
