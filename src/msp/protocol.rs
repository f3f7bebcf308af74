//! # MSP Protocol Constants and Types
//!
//! Core protocol definitions for MSP (MultiWii Serial Protocol) communication.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FcLinkError, Result};

/// Frame preamble byte shared by both framings
pub const MSP_PREAMBLE: u8 = b'$';

/// Version marker for MSP v1 frames (`$M`)
pub const MSP_V1_MARKER: u8 = b'M';

/// Version marker for MSP v2 frames (`$X`)
pub const MSP_V2_MARKER: u8 = b'X';

/// Largest payload an MSP v1 frame can carry (size is one byte)
pub const MSP_V1_MAX_PAYLOAD: usize = 255;

/// Largest payload accepted from an MSP v2 frame.
///
/// The size field is 16 bits; flight controllers never send anything close,
/// so anything above this is treated as line noise during resync.
pub const MSP_V2_MAX_PAYLOAD: usize = 4096;

/// Largest opcode an MSP v1 frame can carry
pub const MSP_V1_MAX_OPCODE: u16 = 255;

// Opcodes used by the telemetry core
pub const MSP_API_VERSION: u16 = 1;
pub const MSP_RX_MAP: u16 = 64;
pub const MSP_STATUS: u16 = 101;
pub const MSP_RC: u16 = 105;
pub const MSP_RAW_GPS: u16 = 106;
pub const MSP_ATTITUDE: u16 = 108;
pub const MSP_ALTITUDE: u16 = 109;
pub const MSP_ANALOG: u16 = 110;
pub const MSP_BOXNAMES: u16 = 116;
pub const MSP_BATTERY_STATE: u16 = 130;
pub const MSP_STATUS_EX: u16 = 150;
pub const MSP_SET_RAW_RC: u16 = 200;
pub const MSP2_SENSOR_GPS: u16 = 0x1F03;

/// Payload size of `MSP_ATTITUDE`
pub const MSP_ATTITUDE_PAYLOAD_SIZE: usize = 6;

/// Payload size of `MSP_ALTITUDE`
pub const MSP_ALTITUDE_PAYLOAD_SIZE: usize = 6;

/// Minimum payload size of `MSP_ANALOG` (legacy layout without precise voltage)
pub const MSP_ANALOG_MIN_PAYLOAD_SIZE: usize = 7;

/// Payload size of `MSP_BATTERY_STATE`
pub const MSP_BATTERY_STATE_PAYLOAD_SIZE: usize = 11;

/// Minimum payload size of `MSP_STATUS` / `MSP_STATUS_EX`
pub const MSP_STATUS_MIN_PAYLOAD_SIZE: usize = 11;

/// Minimum payload size of `MSP_RAW_GPS` (without HDOP)
pub const MSP_RAW_GPS_MIN_PAYLOAD_SIZE: usize = 16;

/// Payload size of `MSP2_SENSOR_GPS`
pub const MSP2_SENSOR_GPS_PAYLOAD_SIZE: usize = 52;

/// RC channel count limits accepted by `MSP_SET_RAW_RC`
pub const RC_CHANNELS_MIN: usize = 8;
pub const RC_CHANNELS_MAX: usize = 16;

/// RC pulse range in microseconds
pub const RC_VALUE_MIN: u16 = 1000;
pub const RC_VALUE_MAX: u16 = 2000;

/// Wire framing variant.
///
/// Both coexist on the same link. V2 is required for opcodes above 255 and
/// for responses that can exceed the v1 frame-size ceiling (e.g. box names on
/// modern firmware).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    V1,
    V2,
}

impl ProtocolVariant {
    /// Pick the smallest framing that can carry `opcode` and `payload_len`.
    pub fn for_request(opcode: u16, payload_len: usize) -> Self {
        if opcode > MSP_V1_MAX_OPCODE || payload_len > MSP_V1_MAX_PAYLOAD {
            ProtocolVariant::V2
        } else {
            ProtocolVariant::V1
        }
    }
}

/// Direction byte of an MSP frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `<` host to flight controller
    Request,
    /// `>` flight controller to host
    Response,
    /// `!` flight controller rejected the request
    Error,
}

impl Direction {
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Error => b'!',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }
}

/// One logical request: opcode, payload, timeout and framing.
///
/// Created per call and discarded once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub opcode: u16,
    pub payload: Vec<u8>,
    pub timeout: Duration,
    pub variant: ProtocolVariant,
}

impl CommandRequest {
    /// Request without payload, framed with the smallest variant that fits.
    pub fn new(opcode: u16, timeout: Duration) -> Self {
        Self {
            opcode,
            payload: Vec::new(),
            timeout,
            variant: ProtocolVariant::for_request(opcode, 0),
        }
    }

    /// Attach a payload, upgrading to V2 if it does not fit a v1 frame.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        if ProtocolVariant::for_request(self.opcode, payload.len()) == ProtocolVariant::V2 {
            self.variant = ProtocolVariant::V2;
        }
        self.payload = payload;
        self
    }

    /// Force a framing variant.
    pub fn with_variant(mut self, variant: ProtocolVariant) -> Self {
        self.variant = variant;
        self
    }
}

/// A decoded MSP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspFrame {
    pub variant: ProtocolVariant,
    pub direction: Direction,
    pub opcode: u16,
    pub payload: Vec<u8>,
}

impl MspFrame {
    /// Build a frame, checking the payload fits the chosen variant.
    pub fn new(
        variant: ProtocolVariant,
        direction: Direction,
        opcode: u16,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if variant == ProtocolVariant::V1 {
            if opcode > MSP_V1_MAX_OPCODE {
                return Err(FcLinkError::Validation(format!(
                    "opcode {} does not fit an MSP v1 frame",
                    opcode
                )));
            }
            if payload.len() > MSP_V1_MAX_PAYLOAD {
                return Err(FcLinkError::Validation(format!(
                    "payload size {} exceeds MSP v1 maximum {}",
                    payload.len(),
                    MSP_V1_MAX_PAYLOAD
                )));
            }
        } else if payload.len() > u16::MAX as usize {
            return Err(FcLinkError::Validation(format!(
                "payload size {} exceeds MSP v2 maximum",
                payload.len()
            )));
        }

        Ok(Self { variant, direction, opcode, payload })
    }
}

/// `MSP_ATTITUDE` reading, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeReading {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// `MSP_ALTITUDE` reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeReading {
    /// Estimated altitude above arming point in meters
    pub altitude: f32,
    /// Vertical speed in m/s
    pub vario: f32,
}

/// `MSP_ANALOG` reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalogReading {
    /// Battery voltage in volts
    pub voltage: f32,
    /// Consumed capacity in mAh
    pub mah_drawn: u16,
    /// Raw RSSI (0-1023)
    pub rssi: u16,
    /// Current draw in amperes
    pub amperage: f32,
}

/// `MSP_BATTERY_STATE` reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStateReading {
    pub cell_count: u8,
    pub capacity_mah: u16,
    /// Pack voltage in volts
    pub voltage: f32,
    pub mah_drawn: u16,
    /// Current draw in amperes
    pub amperage: f32,
    /// Firmware battery state (0 = OK, 1 = warning, 2 = critical, ...)
    pub state: u8,
}

/// `MSP_STATUS_EX` reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReading {
    pub cycle_time_us: u16,
    pub i2c_errors: u16,
    /// Active sensor bitmask (acc, baro, mag, gps, rangefinder, gyro)
    pub sensors: u16,
    /// First 32 box (mode) flags; bit 0 is ARM
    pub mode_flags: u32,
    pub pid_profile: u8,
    pub cpu_load: Option<u16>,
    /// Arming-disable bitmask, only present on newer firmware
    pub arming_disable_flags: Option<u32>,
}

/// `MSP_RAW_GPS` reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawGpsReading {
    pub fix_type: u8,
    pub satellites: u8,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f32,
    /// Ground speed in m/s
    pub ground_speed: f32,
    /// Ground course in degrees
    pub ground_course: f32,
    /// Horizontal dilution of precision, when the firmware reports it
    pub hdop: Option<f32>,
}

/// Position fed into the flight controller as a GPS sensor
/// (`MSP2_SENSOR_GPS`), already in wire units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorGpsPayload {
    pub fix_type: u8,
    pub satellites: u8,
    pub hdop: u16,
    /// Degrees × 10^7
    pub latitude: i32,
    /// Degrees × 10^7
    pub longitude: i32,
    /// Centimeters above mean sea level
    pub msl_altitude_cm: i32,
    /// NED velocity in cm/s
    pub vel_north_cms: i32,
    pub vel_east_cms: i32,
    pub vel_down_cms: i32,
    /// Degrees × 100
    pub ground_course: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}
