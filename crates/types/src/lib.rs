#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of electrical phases reported by the wallbox.
pub const PHASE_COUNT: usize = 3;

/// One decoded holding register value before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValue {
    pub address: u16,
    pub raw: i32,
}

impl RegisterValue {
    pub fn new(address: u16, raw: i32) -> Self {
        Self { address, raw }
    }
}

/// Per-phase current and voltage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseReading {
    #[serde(rename = "charging_mAh")]
    pub charging_mah: f64,
    #[serde(rename = "voltage_V")]
    pub voltage_v: f64,
}

/// Complete, internally consistent state of the wallbox at one point in time.
///
/// Field names on the wire are kept verbatim for existing API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "active_power_mW")]
    pub active_power_mw: f64,
    pub cable_state: i64,
    #[serde(rename = "charged_energy_Wh")]
    pub charged_energy_wh: f64,
    pub charging_state: f64,
    pub error_code: i64,
    pub firmware_version: f64,
    #[serde(rename = "max_charging_current_mAh")]
    pub max_charging_current_mah: f64,
    #[serde(rename = "max_supported_current_mAh")]
    pub max_supported_current_mah: f64,
    pub power_factor_percent: f64,
    pub product_type_and_features: f64,
    pub serial_number: f64,
    #[serde(rename = "total_energy_counter_Wh")]
    pub total_energy_counter_wh: f64,
    pub phase: [PhaseReading; PHASE_COUNT],
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// Zero-valued placeholder with all phase slots present.
    pub fn empty() -> Self {
        Self {
            active_power_mw: 0.0,
            cable_state: 0,
            charged_energy_wh: 0.0,
            charging_state: 0.0,
            error_code: 0,
            firmware_version: 0.0,
            max_charging_current_mah: 0.0,
            max_supported_current_mah: 0.0,
            power_factor_percent: 0.0,
            product_type_and_features: 0.0,
            serial_number: 0.0,
            total_energy_counter_wh: 0.0,
            phase: [PhaseReading::default(); PHASE_COUNT],
            timestamp: Utc::now(),
        }
    }

    /// Returns the snapshot with its capture time set to `at`.
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at;
        self
    }
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
