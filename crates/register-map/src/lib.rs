#![allow(dead_code)]

use thiserror::Error;
use tracing::debug;
use types::{DeviceSnapshot, RegisterValue};

/// Rational scale applied to a raw register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub numerator: i64,
    pub denominator: i64,
}

impl Scale {
    pub const UNIT: Scale = Scale::new(1, 1);
    /// The wallbox reports energy counters in 0.1 Wh units.
    pub const TENTH: Scale = Scale::new(1, 10);

    pub const fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn apply(&self, raw: i32) -> f64 {
        if self.denominator == 0 {
            return f64::from(raw);
        }
        f64::from(raw) * self.numerator as f64 / self.denominator as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub address: u16,
    pub name: &'static str,
    pub scale: Scale,
}

const fn register(address: u16, name: &'static str, scale: Scale) -> RegisterSpec {
    RegisterSpec {
        address,
        name,
        scale,
    }
}

pub const CHARGING_STATE: u16 = 1000;
pub const CABLE_STATE: u16 = 1004;
pub const ERROR_CODE: u16 = 1006;
pub const CHARGING_CURRENT_PHASE_1: u16 = 1008;
pub const CHARGING_CURRENT_PHASE_2: u16 = 1010;
pub const CHARGING_CURRENT_PHASE_3: u16 = 1012;
pub const SERIAL_NUMBER: u16 = 1014;
pub const PRODUCT_TYPE: u16 = 1016;
pub const FIRMWARE_VERSION: u16 = 1018;
pub const ACTIVE_POWER: u16 = 1020;
pub const TOTAL_ENERGY: u16 = 1036;
pub const VOLTAGE_PHASE_1: u16 = 1040;
pub const VOLTAGE_PHASE_2: u16 = 1042;
pub const VOLTAGE_PHASE_3: u16 = 1044;
pub const POWER_FACTOR: u16 = 1046;
pub const MAX_CHARGING_CURRENT: u16 = 1100;
pub const MAX_SUPPORTED_CURRENT: u16 = 1110;
pub const CHARGED_ENERGY: u16 = 1502;

/// Register map of the wallbox, in the order the poller sweeps it.
static CATALOG: [RegisterSpec; 18] = [
    register(CHARGING_STATE, "charging_state", Scale::UNIT),
    register(CABLE_STATE, "cable_state", Scale::UNIT),
    register(ERROR_CODE, "error_code", Scale::UNIT),
    register(SERIAL_NUMBER, "serial_number", Scale::UNIT),
    register(PRODUCT_TYPE, "product_type_and_features", Scale::UNIT),
    register(FIRMWARE_VERSION, "firmware_version", Scale::UNIT),
    register(ACTIVE_POWER, "active_power_mW", Scale::UNIT),
    register(TOTAL_ENERGY, "total_energy_counter_Wh", Scale::TENTH),
    register(POWER_FACTOR, "power_factor_percent", Scale::UNIT),
    register(MAX_CHARGING_CURRENT, "max_charging_current_mAh", Scale::UNIT),
    register(MAX_SUPPORTED_CURRENT, "max_supported_current_mAh", Scale::UNIT),
    register(CHARGED_ENERGY, "charged_energy_Wh", Scale::TENTH),
    register(CHARGING_CURRENT_PHASE_1, "charging_current_phase_1_mAh", Scale::UNIT),
    register(CHARGING_CURRENT_PHASE_2, "charging_current_phase_2_mAh", Scale::UNIT),
    register(CHARGING_CURRENT_PHASE_3, "charging_current_phase_3_mAh", Scale::UNIT),
    register(VOLTAGE_PHASE_1, "voltage_phase_1_V", Scale::UNIT),
    register(VOLTAGE_PHASE_2, "voltage_phase_2_V", Scale::UNIT),
    register(VOLTAGE_PHASE_3, "voltage_phase_3_V", Scale::UNIT),
];

pub fn catalog() -> &'static [RegisterSpec] {
    &CATALOG
}

pub fn lookup(address: u16) -> Option<&'static RegisterSpec> {
    CATALOG.iter().find(|spec| spec.address == address)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response frame too short: {len} bytes, need at least 4")]
    ShortFrame { len: usize },
}

/// Width of the register payload at the tail of a response frame.
pub const VALUE_LEN: usize = 4;

/// Decodes the big-endian signed value carried in the last four bytes of a response frame.
pub fn decode(frame: &[u8]) -> Result<i32, DecodeError> {
    let tail = frame
        .len()
        .checked_sub(VALUE_LEN)
        .and_then(|start| frame.get(start..))
        .ok_or(DecodeError::ShortFrame { len: frame.len() })?;
    let mut bytes = [0u8; VALUE_LEN];
    bytes.copy_from_slice(tail);
    Ok(i32::from_be_bytes(bytes))
}

type FieldSetter = fn(&mut DeviceSnapshot, f64);

/// Address to snapshot field. Phase registers land in slot `phase - 1`.
static FIELD_TABLE: [(u16, FieldSetter); 18] = [
    (CHARGING_STATE, |s, v| s.charging_state = v),
    (CABLE_STATE, |s, v| s.cable_state = v as i64),
    (ERROR_CODE, |s, v| s.error_code = v as i64),
    (SERIAL_NUMBER, |s, v| s.serial_number = v),
    (PRODUCT_TYPE, |s, v| s.product_type_and_features = v),
    (FIRMWARE_VERSION, |s, v| s.firmware_version = v),
    (ACTIVE_POWER, |s, v| s.active_power_mw = v),
    (TOTAL_ENERGY, |s, v| s.total_energy_counter_wh = v),
    (POWER_FACTOR, |s, v| s.power_factor_percent = v),
    (MAX_CHARGING_CURRENT, |s, v| s.max_charging_current_mah = v),
    (MAX_SUPPORTED_CURRENT, |s, v| s.max_supported_current_mah = v),
    (CHARGED_ENERGY, |s, v| s.charged_energy_wh = v),
    (CHARGING_CURRENT_PHASE_1, |s, v| s.phase[0].charging_mah = v),
    (CHARGING_CURRENT_PHASE_2, |s, v| s.phase[1].charging_mah = v),
    (CHARGING_CURRENT_PHASE_3, |s, v| s.phase[2].charging_mah = v),
    (VOLTAGE_PHASE_1, |s, v| s.phase[0].voltage_v = v),
    (VOLTAGE_PHASE_2, |s, v| s.phase[1].voltage_v = v),
    (VOLTAGE_PHASE_3, |s, v| s.phase[2].voltage_v = v),
];

fn field_setter(address: u16) -> Option<FieldSetter> {
    FIELD_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == address)
        .map(|(_, setter)| *setter)
}

/// Folds one sweep worth of register values into a snapshot.
#[derive(Debug, Clone)]
pub struct Aggregator {
    catalog: Vec<RegisterSpec>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(catalog())
    }
}

impl Aggregator {
    pub fn new(catalog: &[RegisterSpec]) -> Self {
        Self {
            catalog: catalog.to_vec(),
        }
    }

    /// Unmapped addresses are skipped. The returned timestamp is a placeholder;
    /// the poller stamps the snapshot when it publishes it.
    pub fn aggregate(&self, values: &[RegisterValue]) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot::empty();
        for value in values {
            let Some(setter) = field_setter(value.address) else {
                debug!(address = value.address, raw = value.raw, "ignoring unmapped register");
                continue;
            };
            let scale = self.scale_for(value.address);
            setter(&mut snapshot, scale.apply(value.raw));
        }
        snapshot
    }

    fn scale_for(&self, address: u16) -> Scale {
        self.catalog
            .iter()
            .find(|spec| spec.address == address)
            .map(|spec| spec.scale)
            .unwrap_or(Scale::UNIT)
    }
}

/// Aggregates against the built-in catalog.
pub fn aggregate(values: &[RegisterValue]) -> DeviceSnapshot {
    Aggregator::default().aggregate(values)
}
