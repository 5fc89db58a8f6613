use std::collections::HashSet;

use keba_registers::{
    aggregate, catalog, decode, lookup, Aggregator, DecodeError, RegisterSpec, Scale,
    ACTIVE_POWER, CHARGED_ENERGY, TOTAL_ENERGY,
};
use types::RegisterValue;

#[test]
fn catalog_matches_wallbox_register_map() {
    let entries = catalog();
    assert_eq!(entries.len(), 18);
    assert_eq!(entries[0].address, 1000);
    assert_eq!(entries[0].name, "charging_state");
    assert_eq!(entries[11].address, 1502);
    assert_eq!(entries[11].name, "charged_energy_Wh");
    assert_eq!(entries[17].address, 1044);
    assert_eq!(entries[17].name, "voltage_phase_3_V");

    let unique: HashSet<u16> = entries.iter().map(|spec| spec.address).collect();
    assert_eq!(unique.len(), entries.len());
}

#[test]
fn only_energy_counters_are_scaled() {
    let scaled: Vec<u16> = catalog()
        .iter()
        .filter(|spec| spec.scale != Scale::UNIT)
        .map(|spec| spec.address)
        .collect();
    assert_eq!(scaled, vec![TOTAL_ENERGY, CHARGED_ENERGY]);
    assert_eq!(lookup(CHARGED_ENERGY).map(|spec| spec.scale), Some(Scale::TENTH));
    assert!(lookup(9_999).is_none());
}

#[test]
fn decode_reads_big_endian_tail() {
    assert_eq!(decode(&[0x00, 0x00, 0x03, 0xE8]), Ok(1000));

    let frame = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x03, 0x04, 0x00, 0x00, 0x13, 0x88,
    ];
    assert_eq!(decode(&frame), Ok(5000));

    assert_eq!(decode(&[0xFF, 0xFF, 0xFF, 0xFF]), Ok(-1));
    assert_eq!(decode(&[0x80, 0x00, 0x00, 0x00]), Ok(i32::MIN));
    assert_eq!(decode(&[0x12, 0x34, 0x56, 0x78]), Ok(0x1234_5678));
}

#[test]
fn decode_rejects_short_frames() {
    for len in 0..4 {
        let frame = vec![0xAB; len];
        assert_eq!(decode(&frame), Err(DecodeError::ShortFrame { len }));
    }
}

#[test]
fn aggregate_applies_tenth_scale() {
    let snapshot = aggregate(&[
        RegisterValue::new(TOTAL_ENERGY, 1234),
        RegisterValue::new(CHARGED_ENERGY, 55),
    ]);
    assert!((snapshot.total_energy_counter_wh - 123.4).abs() < 1e-9);
    assert!((snapshot.charged_energy_wh - 5.5).abs() < 1e-9);
}

#[test]
fn aggregate_places_phases_by_position() {
    let values = [
        RegisterValue::new(1044, 233),
        RegisterValue::new(1012, 16_000),
        RegisterValue::new(1008, 6_000),
        RegisterValue::new(1040, 231),
        RegisterValue::new(1010, 8_000),
        RegisterValue::new(1042, 232),
    ];
    let snapshot = aggregate(&values);
    assert_eq!(snapshot.phase[0].charging_mah, 6_000.0);
    assert_eq!(snapshot.phase[0].voltage_v, 231.0);
    assert_eq!(snapshot.phase[1].charging_mah, 8_000.0);
    assert_eq!(snapshot.phase[1].voltage_v, 232.0);
    assert_eq!(snapshot.phase[2].charging_mah, 16_000.0);
    assert_eq!(snapshot.phase[2].voltage_v, 233.0);
}

#[test]
fn aggregate_ignores_unmapped_addresses() {
    let snapshot = aggregate(&[
        RegisterValue::new(ACTIVE_POWER, 5000),
        RegisterValue::new(4_242, 77),
    ]);
    assert_eq!(snapshot.active_power_mw, 5000.0);
}

#[test]
fn aggregator_uses_supplied_catalog_scale() {
    let custom = [
        RegisterSpec {
            address: ACTIVE_POWER,
            name: "active_power_mW",
            scale: Scale::UNIT,
        },
        RegisterSpec {
            address: CHARGED_ENERGY,
            name: "charged_energy_Wh",
            scale: Scale::TENTH,
        },
    ];
    let snapshot = Aggregator::new(&custom).aggregate(&[
        RegisterValue::new(ACTIVE_POWER, 5000),
        RegisterValue::new(CHARGED_ENERGY, 1234),
    ]);
    assert_eq!(snapshot.active_power_mw, 5000.0);
    assert!((snapshot.charged_energy_wh - 123.4).abs() < 1e-9);
}

#[test]
fn signed_values_survive_scaling() {
    let snapshot = aggregate(&[
        RegisterValue::new(1006, -3),
        RegisterValue::new(TOTAL_ENERGY, -20),
    ]);
    assert_eq!(snapshot.error_code, -3);
    assert_eq!(snapshot.total_energy_counter_wh, -2.0);
}
