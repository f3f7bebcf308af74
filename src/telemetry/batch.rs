//! Per-cycle telemetry snapshot handed to the display layer.

use serde::Serialize;

/// One scheduler cycle's worth of decoded telemetry.
///
/// Every group is independent: a failed sub-request leaves its group `None`
/// without affecting the others.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryBatch {
    /// Session generation that produced this batch
    pub generation: u64,
    /// Poll counter value of the producing cycle
    pub sequence: u64,
    pub attitude: Option<Attitude>,
    pub vfr_hud: Option<VfrHud>,
    pub battery: Option<Battery>,
    pub flight: Option<FlightStatus>,
    pub gps: Option<Gps>,
    pub position: Option<Position>,
}

/// Attitude in degrees; rates in degrees per second
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll_rate: f32,
    pub pitch_rate: f32,
    pub yaw_rate: f32,
}

/// Head-up display values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VfrHud {
    /// m/s; no pitot on these craft, mirrors ground speed
    pub airspeed: f32,
    /// m/s
    pub groundspeed: f32,
    /// Degrees, 0..360
    pub heading: f32,
    /// Percent, 0..100
    pub throttle: f32,
    /// Meters above the arming point
    pub altitude: f32,
    /// m/s
    pub climb: f32,
}

/// Battery state. Fields the firmware did not report stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Battery {
    pub voltage: Option<f32>,
    pub current: Option<f32>,
    pub remaining_percent: Option<u8>,
    pub cell_count: Option<u8>,
    pub cell_voltage: Option<f32>,
    pub mah_drawn: Option<u16>,
}

/// Arming and flight-mode state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlightStatus {
    pub mode: String,
    pub mode_flags: u32,
    pub armed: bool,
    /// Reasons arming is blocked; empty when none or not reported
    pub arming_disabled: Vec<String>,
    pub active_sensors: u16,
}

/// GPS receiver state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Gps {
    pub fix_type: u8,
    pub satellites: u8,
    pub hdop: Option<f32>,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above mean sea level
    pub altitude: f32,
}

/// Global position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f32,
    pub relative_altitude: Option<f32>,
    /// Not reported over MSP
    pub velocity: Option<f32>,
}

impl TelemetryBatch {
    pub fn new(generation: u64, sequence: u64) -> Self {
        Self { generation, sequence, ..Self::default() }
    }

    /// True when no sub-request succeeded
    pub fn is_empty(&self) -> bool {
        self.attitude.is_none()
            && self.battery.is_none()
            && self.flight.is_none()
            && self.gps.is_none()
            && self.position.is_none()
    }
}
