//! Wire format of published payloads.

mod common;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use solar_fleet_sim::domain::{
    FaultPayload, MaintenancePayload, StaticPayload, TelemetrySnapshot, WeatherPayload,
};
use solar_fleet_sim::simulation::{ModeEvent, SiteRegistry};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

fn assert_close(field: &str, a: f64, b: f64) {
    assert!(close(a, b), "{field}: {a} != {b}");
}

fn assert_snapshot_eq(original: &TelemetrySnapshot, back: &TelemetrySnapshot) {
    // Destructure so a new field cannot be left out of the comparison
    let TelemetrySnapshot {
        timestamp,
        site_id,
        power_output_kw,
        energy_generated_kwh,
        energy_consumed_kwh,
        energy_exported_kwh,
        energy_generated_interval_kwh,
        energy_consumed_interval_kwh,
        energy_exported_interval_kwh,
        irradiance_wm2,
        ambient_temperature_c,
        module_temperature_c,
        wind_speed_ms,
        humidity_percent,
        inverter_efficiency,
        system_efficiency,
        fault_count,
        active_fault_count,
        string_faults,
        maintenance_mode,
        operational_status,
        inverter_status,
        dc_voltage_v,
        ac_voltage_v,
    } = original;

    assert_eq!(&back.timestamp, timestamp);
    assert_eq!(&back.site_id, site_id);
    assert_close("power_output_kw", back.power_output_kw, *power_output_kw);
    assert_close("energy_generated_kwh", back.energy_generated_kwh, *energy_generated_kwh);
    assert_close("energy_consumed_kwh", back.energy_consumed_kwh, *energy_consumed_kwh);
    assert_close("energy_exported_kwh", back.energy_exported_kwh, *energy_exported_kwh);
    assert_close(
        "energy_generated_interval_kwh",
        back.energy_generated_interval_kwh,
        *energy_generated_interval_kwh,
    );
    assert_close(
        "energy_consumed_interval_kwh",
        back.energy_consumed_interval_kwh,
        *energy_consumed_interval_kwh,
    );
    assert_close(
        "energy_exported_interval_kwh",
        back.energy_exported_interval_kwh,
        *energy_exported_interval_kwh,
    );
    assert_close("irradiance_wm2", back.irradiance_wm2, *irradiance_wm2);
    assert_close("ambient_temperature_c", back.ambient_temperature_c, *ambient_temperature_c);
    assert_close("module_temperature_c", back.module_temperature_c, *module_temperature_c);
    assert_close("wind_speed_ms", back.wind_speed_ms, *wind_speed_ms);
    assert_close("humidity_percent", back.humidity_percent, *humidity_percent);
    assert_close("inverter_efficiency", back.inverter_efficiency, *inverter_efficiency);
    assert_close("system_efficiency", back.system_efficiency, *system_efficiency);
    assert_eq!(&back.fault_count, fault_count);
    assert_eq!(&back.active_fault_count, active_fault_count);
    assert_eq!(&back.string_faults, string_faults);
    assert_eq!(&back.maintenance_mode, maintenance_mode);
    assert_eq!(&back.operational_status, operational_status);
    assert_eq!(&back.inverter_status, inverter_status);
    assert_close("dc_voltage_v", back.dc_voltage_v, *dc_voltage_v);
    assert_close("ac_voltage_v", back.ac_voltage_v, *ac_voltage_v);
}

fn roundtrip<T: Serialize + DeserializeOwned>(value: &T) -> T {
    let json = serde_json::to_string(value).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[test]
fn snapshot_survives_json() {
    let registry = SiteRegistry::generate(8, 5);
    let mut engine = common::engine_for(registry.sites().to_vec(), 0.1, Default::default());
    let mut now = common::equinox_noon();
    let in_maintenance = registry.sites()[0].id.clone();
    engine
        .state_mut()
        .begin_maintenance(&in_maintenance, now, Duration::hours(2))
        .unwrap();

    let mut seen_fault_events = 0;
    let mut seen_maintenance_events = 0;
    for _ in 0..24 {
        for tick in engine.tick(now, Duration::minutes(20)).unwrap() {
            assert_snapshot_eq(&tick.snapshot, &roundtrip(&tick.snapshot));

            for event in &tick.events {
                match event {
                    ModeEvent::FaultRaised(fault) => {
                        let payload = FaultPayload::raised(&tick.site_id, fault, now);
                        assert_eq!(roundtrip(&payload), payload);
                        seen_fault_events += 1;
                    }
                    ModeEvent::FaultCleared { fault, reason } => {
                        let payload = FaultPayload::cleared(&tick.site_id, fault, *reason, now);
                        assert_eq!(roundtrip(&payload), payload);
                        seen_fault_events += 1;
                    }
                    ModeEvent::MaintenanceStarted(window) | ModeEvent::MaintenanceEnded(window) => {
                        let active = matches!(event, ModeEvent::MaintenanceStarted(_));
                        let payload = MaintenancePayload::new(&tick.site_id, window, active, now);
                        assert_eq!(roundtrip(&payload), payload);
                        seen_maintenance_events += 1;
                    }
                }
            }
        }
        now += Duration::minutes(20);
    }
    assert!(seen_fault_events > 0);
    assert!(seen_maintenance_events > 0);
}

#[test]
fn static_payload_survives_json() {
    for site in SiteRegistry::generate(25, 11).sites() {
        let original = StaticPayload::from(site);
        let StaticPayload {
            site_id,
            site_name,
            latitude,
            longitude,
            country,
            region,
            timezone,
            installation_date,
            system_capacity_kw,
            string_count,
            inverter_count,
        } = &original;
        let back = roundtrip(&original);

        assert_eq!(&back.site_id, site_id);
        assert_eq!(&back.site_name, site_name);
        assert_close("latitude", back.latitude, *latitude);
        assert_close("longitude", back.longitude, *longitude);
        assert_eq!(&back.country, country);
        assert_eq!(&back.region, region);
        assert_eq!(&back.timezone, timezone);
        assert_eq!(&back.installation_date, installation_date);
        assert_close("system_capacity_kw", back.system_capacity_kw, *system_capacity_kw);
        assert_eq!(&back.string_count, string_count);
        assert_eq!(&back.inverter_count, inverter_count);
    }
}

#[test]
fn telemetry_field_names_are_stable() {
    let mut engine = common::engine_for(vec![common::equator_site()], 0.0, Default::default());
    let tick = engine
        .tick(common::equinox_noon(), Duration::seconds(30))
        .unwrap()
        .remove(0);
    let value = serde_json::to_value(&tick.snapshot).unwrap();
    let object = value.as_object().unwrap();
    for field in [
        "timestamp",
        "site_id",
        "power_output_kw",
        "energy_generated_kwh",
        "energy_consumed_kwh",
        "energy_exported_kwh",
        "irradiance_wm2",
        "ambient_temperature_c",
        "module_temperature_c",
        "wind_speed_ms",
        "humidity_percent",
        "inverter_efficiency",
        "system_efficiency",
        "fault_count",
        "active_fault_count",
        "string_faults",
        "maintenance_mode",
        "operational_status",
        "inverter_status",
        "dc_voltage_v",
        "ac_voltage_v",
    ] {
        assert!(object.contains_key(field), "missing {field}");
    }
    assert_eq!(object["timestamp"], Value::from("2024-03-20T12:00:00Z"));
    assert_eq!(object["site_id"], Value::from("site_001"));
    assert_eq!(object["operational_status"], Value::from("online"));
}

#[test]
fn weather_payload_is_flat() {
    let mut engine = common::engine_for(vec![common::equator_site()], 0.0, Default::default());
    let tick = engine
        .tick(common::equinox_noon(), Duration::seconds(30))
        .unwrap()
        .remove(0);
    let payload = WeatherPayload {
        site_id: tick.site_id.clone(),
        sample: tick.environment.clone(),
    };
    let value = serde_json::to_value(&payload).unwrap();
    assert!(value.get("sample").is_none());
    assert!(value["irradiance_wm2"].as_f64().unwrap() > 0.0);
    assert_eq!(value["timestamp"], Value::from("2024-03-20T12:00:00Z"));

    let back: WeatherPayload = serde_json::from_value(value).unwrap();
    assert_eq!(back, payload);
}
