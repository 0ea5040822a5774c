//! Decoded vehicle metric models

use serde::{Deserialize, Serialize};

/// Vehicle metric requested through a mode-01 PID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Vehicle speed in km/h (PID 0x0D)
    Speed,
    /// Engine speed in rpm (PID 0x0C)
    EngineRpm,
    /// Fuel in the tank, in litres (PID 0x2F)
    FuelLevel,
    /// Engine coolant temperature in °C (PID 0x05)
    CoolantTemp,
}

impl MetricKind {
    /// All supported metrics, in PID table order
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Speed,
        MetricKind::EngineRpm,
        MetricKind::FuelLevel,
        MetricKind::CoolantTemp,
    ];

    /// Mode-01 PID byte for this metric
    pub fn pid(&self) -> u8 {
        match self {
            MetricKind::Speed => 0x0D,
            MetricKind::EngineRpm => 0x0C,
            MetricKind::FuelLevel => 0x2F,
            MetricKind::CoolantTemp => 0x05,
        }
    }

    /// Look up the metric for a PID byte
    pub fn from_pid(pid: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.pid() == pid)
    }

    /// Unit of the decoded value
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Speed => "km/h",
            MetricKind::EngineRpm => "rpm",
            MetricKind::FuelLevel => "L",
            MetricKind::CoolantTemp => "°C",
        }
    }

    /// Stable identifier, matches the serialized form
    pub fn id(&self) -> &'static str {
        match self {
            MetricKind::Speed => "speed",
            MetricKind::EngineRpm => "engine_rpm",
            MetricKind::FuelLevel => "fuel_level",
            MetricKind::CoolantTemp => "coolant_temp",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// A decoded `{kind, value}` pair
///
/// Values are integers in the unit of [`MetricKind::unit`]. Coolant
/// temperature is the only signed metric (-40..=215).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub kind: MetricKind,
    pub value: i32,
}

impl Metric {
    pub fn new(kind: MetricKind, value: i32) -> Self {
        Self { kind, value }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={} {}", self.kind, self.value, self.kind.unit())
    }
}
