use chrono::{TimeZone, Utc};
use types::{DeviceSnapshot, PhaseReading, PHASE_COUNT};

#[test]
fn empty_snapshot_has_zeroed_phase_slots() {
    let snapshot = DeviceSnapshot::empty();
    assert_eq!(snapshot.phase.len(), PHASE_COUNT);
    assert!(snapshot.phase.iter().all(|p| *p == PhaseReading::default()));
    assert_eq!(snapshot.active_power_mw, 0.0);
}

#[test]
fn json_field_names_are_preserved() {
    let mut snapshot = DeviceSnapshot::empty()
        .stamped(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("time"));
    snapshot.active_power_mw = 5000.0;
    snapshot.charged_energy_wh = 123.4;
    snapshot.phase[2].voltage_v = 230.0;

    let value = serde_json::to_value(&snapshot).expect("serialize");
    assert_eq!(value["active_power_mW"], 5000.0);
    assert_eq!(value["charged_energy_Wh"], 123.4);
    assert_eq!(value["phase"].as_array().map(Vec::len), Some(3));
    assert_eq!(value["phase"][2]["voltage_V"], 230.0);
    assert_eq!(value["phase"][0]["charging_mAh"], 0.0);
    assert_eq!(value["Timestamp"], "2024-05-01T12:00:00Z");

    for key in [
        "cable_state",
        "charging_state",
        "error_code",
        "firmware_version",
        "max_charging_current_mAh",
        "max_supported_current_mAh",
        "power_factor_percent",
        "product_type_and_features",
        "serial_number",
        "total_energy_counter_Wh",
    ] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
}
