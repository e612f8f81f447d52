//! Properties that must hold for every site on every tick.

mod common;

use chrono::Duration;
use proptest::prelude::*;
use solar_fleet_sim::domain::OperationalStatus;
use solar_fleet_sim::simulation::{
    EnvironmentModel, FaultParams, FaultStateMachine, PowerModel, SimulationEngine, SiteRegistry,
};

fn busy_engine(sites: usize, seed: u64) -> SimulationEngine {
    SimulationEngine::new(
        SiteRegistry::generate(sites, seed),
        EnvironmentModel::default(),
        PowerModel::default(),
        FaultStateMachine::new(FaultParams::default(), 0.05, 0.01).unwrap(),
        seed,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn energy_counters_never_decrease(
        seed in any::<u64>(),
        sites in 1usize..6,
        ticks in 1usize..150,
        interval_min in 1i64..180,
    ) {
        let mut engine = busy_engine(sites, seed);
        let interval = Duration::minutes(interval_min);
        let mut now = common::equinox_noon();
        let mut previous: Vec<_> = engine.state().iter().map(|(_, r)| (r.totals, r.lifetime_fault_count)).collect();

        for _ in 0..ticks {
            let out = engine.tick(now, interval).unwrap();
            for (tick, (totals, faults)) in out.iter().zip(previous.iter_mut()) {
                let s = &tick.snapshot;
                prop_assert!(s.energy_generated_kwh >= totals.generated_kwh);
                prop_assert!(s.energy_consumed_kwh >= totals.consumed_kwh);
                prop_assert!(s.energy_exported_kwh >= totals.exported_kwh);
                prop_assert!(s.fault_count >= *faults);

                prop_assert!(s.energy_generated_interval_kwh >= 0.0);
                prop_assert!(s.energy_exported_interval_kwh >= 0.0);
                let split = s.energy_consumed_interval_kwh + s.energy_exported_interval_kwh;
                prop_assert!((split - s.energy_generated_interval_kwh).abs() <= 1e-9 * s.energy_generated_interval_kwh.max(1.0));

                totals.generated_kwh = s.energy_generated_kwh;
                totals.consumed_kwh = s.energy_consumed_kwh;
                totals.exported_kwh = s.energy_exported_kwh;
                *faults = s.fault_count;
            }
            now += interval;
        }
    }

    #[test]
    fn efficiencies_and_ratios_stay_in_unit_interval(
        seed in any::<u64>(),
        ticks in 1usize..100,
    ) {
        let mut engine = busy_engine(4, seed);
        let interval = Duration::minutes(45);
        let mut now = common::equinox_noon();
        for _ in 0..ticks {
            for tick in engine.tick(now, interval).unwrap() {
                let s = &tick.snapshot;
                prop_assert!((0.0..=1.0).contains(&s.inverter_efficiency));
                prop_assert!((0.0..=1.0).contains(&s.system_efficiency));
                prop_assert!((0.0..=1.0).contains(&tick.environment.cloud_cover));
                prop_assert!((0.0..=100.0).contains(&s.humidity_percent));
                prop_assert!(s.wind_speed_ms >= 0.0);
                prop_assert!(s.power_output_kw >= 0.0);
            }
            now += interval;
        }
    }

    #[test]
    fn no_output_without_sun_or_during_maintenance(
        seed in any::<u64>(),
        ticks in 1usize..100,
    ) {
        let mut engine = busy_engine(5, seed);
        let interval = Duration::minutes(37);
        let mut now = common::equinox_noon();
        for _ in 0..ticks {
            for tick in engine.tick(now, interval).unwrap() {
                let s = &tick.snapshot;
                if tick.environment.irradiance_wm2 == 0.0 || s.maintenance_mode {
                    prop_assert_eq!(s.power_output_kw, 0.0);
                    prop_assert_eq!(s.energy_generated_interval_kwh, 0.0);
                }
                if s.maintenance_mode {
                    prop_assert_eq!(s.operational_status, OperationalStatus::Maintenance);
                    prop_assert_eq!(s.active_fault_count, 0);
                }
                if s.operational_status == OperationalStatus::Fault {
                    prop_assert_eq!(s.power_output_kw, 0.0);
                }
            }
            now += interval;
        }
    }
}
