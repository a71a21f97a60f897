//! Photovoltaic status decoded from SolarEdge inverter registers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{RegisterDescriptor, RegisterValue};

/// Registers read on every poll, in the order [`PhotovoltaicStatus::from_registers`] expects.
pub const STATUS_REGISTERS: [RegisterDescriptor; 4] = [
    // AC power (W)
    RegisterDescriptor::new(40083, 1),
    // AC power scale factor
    RegisterDescriptor::new(40084, 1),
    // Battery state of energy (%), float32 with the low word first
    RegisterDescriptor::new(62852, 2),
    // Battery status
    RegisterDescriptor::new(62854, 2),
];

/// Minimum number of register values needed to build a status.
const MIN_STATUS_VALUES: usize = 5;

/// Errors turning register values into a status.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Expected at least {expected} register values, received {actual}")]
    MissingRegisters { expected: usize, actual: usize },
}

/// Battery charge direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryState {
    Charging,
    Discharging,
    Idle,
}

impl BatteryState {
    /// Map the inverter's battery status code.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            4 => BatteryState::Discharging,
            6 | 10 => BatteryState::Idle,
            _ => BatteryState::Charging,
        }
    }
}

impl fmt::Display for BatteryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryState::Charging => write!(f, "charging"),
            BatteryState::Discharging => write!(f, "discharging"),
            BatteryState::Idle => write!(f, "idle"),
        }
    }
}

/// Battery reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryInformation {
    /// State of energy as a fraction (the device reports percent, divided by 100).
    pub percentage: f32,
    /// Derived charge direction.
    pub state: BatteryState,
    /// Raw battery status code the state was derived from.
    #[serde(skip)]
    pub status_code: u16,
}

/// One complete reading of the inverter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotovoltaicStatus {
    /// AC power in watts.
    pub power: f64,
    pub battery: BatteryInformation,
}

impl PhotovoltaicStatus {
    /// Build a status from the values read for [`STATUS_REGISTERS`].
    pub fn from_registers(values: &[RegisterValue]) -> Result<Self, StatusError> {
        let [power, scale_factor, soe_low, soe_high, status_code, ..] = values else {
            return Err(StatusError::MissingRegisters {
                expected: MIN_STATUS_VALUES,
                actual: values.len(),
            });
        };

        let status_code = status_code.as_unsigned();

        Ok(Self {
            power: power.scaled_magnitude(*scale_factor),
            battery: BatteryInformation {
                percentage: soe_high.combine_to_f32(*soe_low) / 100.0,
                state: BatteryState::from_status_code(status_code),
                status_code,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers(raw: &[u16]) -> Vec<RegisterValue> {
        raw.iter().copied().map(RegisterValue::new).collect()
    }

    #[test]
    fn test_battery_state_mapping() {
        assert_eq!(BatteryState::from_status_code(4), BatteryState::Discharging);
        assert_eq!(BatteryState::from_status_code(6), BatteryState::Idle);
        assert_eq!(BatteryState::from_status_code(10), BatteryState::Idle);
        assert_eq!(BatteryState::from_status_code(0), BatteryState::Charging);
        assert_eq!(BatteryState::from_status_code(3), BatteryState::Charging);
        assert_eq!(
            BatteryState::from_status_code(u16::MAX),
            BatteryState::Charging
        );
    }

    #[test]
    fn test_from_registers() {
        let values = registers(&[1500, (-1i16) as u16, 5000, 0x4248, 4, 0]);

        let status = PhotovoltaicStatus::from_registers(&values).unwrap();

        assert_eq!(status.power, 150.0);
        assert!((status.battery.percentage - 0.5).abs() < 0.001);
        assert_eq!(status.battery.state, BatteryState::Discharging);
        assert_eq!(status.battery.status_code, 4);
    }

    #[test]
    fn test_from_registers_too_short() {
        let values = registers(&[1500, 0, 0, 0x4248]);

        let err = PhotovoltaicStatus::from_registers(&values).unwrap_err();
        assert!(matches!(
            err,
            StatusError::MissingRegisters {
                expected: 5,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_status_serialization() {
        let status = PhotovoltaicStatus {
            power: 150.0,
            battery: BatteryInformation {
                percentage: 0.5,
                state: BatteryState::Idle,
                status_code: 6,
            },
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "power": 150.0,
                "battery": { "percentage": 0.5, "state": "idle" }
            })
        );
    }
}
