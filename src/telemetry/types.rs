//! Drive telemetry data types.

use serde::{Deserialize, Serialize};

use crate::error::TelemetryParseWarning;

/// Power state of a drive as exported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Active,
    Standby,
    Sleeping,
    Unknown,
}

impl PowerState {
    pub fn is_spun_down(self) -> bool {
        matches!(self, PowerState::Standby | PowerState::Sleeping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriveKind {
    Hdd,
    Ssd,
    Unknown,
}

/// One drive as seen in a single poll cycle. Built fresh every cycle and never mutated
/// after the reader and enrichment hand it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveRecord {
    /// Stable identity: device name when present, else the serial/model id, else the section name.
    pub id: String,
    /// Array slot name (e.g. "disk1", "parity").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    /// Serial/model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// None = unknown.
    pub temperature: Option<i32>,
    pub power_state: PowerState,
    pub kind: DriveKind,
    pub excluded: bool,
    /// Non-fatal parse problem that left this record degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<TelemetryParseWarning>,
}

impl DriveRecord {
    /// Whether this drive may drive the fan curve.
    pub fn is_eligible(&self) -> bool {
        !self.excluded && !self.power_state.is_spun_down() && self.temperature.is_some()
    }

    /// Eligible temperature, if any.
    pub fn eligible_temperature(&self) -> Option<i32> {
        if self.is_eligible() {
            self.temperature
        } else {
            None
        }
    }
}
