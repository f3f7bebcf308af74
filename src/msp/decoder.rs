//! # MSP Frame Decoder
//!
//! Streaming parser for MSP v1/v2 frames and decoders for the telemetry
//! payloads the scheduler requests.

use bytes::{Buf, BytesMut};

use super::crc::{crc8_dvb_s2, xor_checksum};
use super::protocol::*;
use crate::error::{FcLinkError, Result};

/// Incremental MSP frame parser
///
/// Bytes read from the link are pushed with [`MspParser::feed`]; complete
/// frames are pulled with [`MspParser::next_frame`]. Garbage before a
/// preamble is dropped, so the parser resynchronizes after line noise or a
/// frame cut in half by a timeout.
///
/// # Examples
///
/// ```
/// use fc_link::msp::decoder::MspParser;
/// use fc_link::msp::encoder::encode_frame;
/// use fc_link::msp::protocol::{Direction, MspFrame, ProtocolVariant, MSP_RC};
///
/// let frame = MspFrame::new(ProtocolVariant::V1, Direction::Response, MSP_RC, vec![0xDC, 0x05])?;
/// let mut parser = MspParser::new();
/// parser.feed(&encode_frame(&frame));
/// assert_eq!(parser.next_frame().unwrap()?, frame);
/// # Ok::<(), fc_link::error::FcLinkError>(())
/// ```
#[derive(Debug, Default)]
pub struct MspParser {
    buf: BytesMut,
}

impl MspParser {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(512) }
    }

    /// Append raw bytes read from the link
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop any partially buffered frame
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Extract the next complete frame, if any
    ///
    /// Returns `None` when more bytes are needed, `Some(Err(_))` for a frame
    /// that failed its checksum (the frame is consumed), `Some(Ok(_))` otherwise.
    pub fn next_frame(&mut self) -> Option<Result<MspFrame>> {
        loop {
            match self.buf.iter().position(|&b| b == MSP_PREAMBLE) {
                Some(0) => {}
                Some(skip) => self.buf.advance(skip),
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < 3 {
                return None;
            }

            let direction = match Direction::from_byte(self.buf[2]) {
                Some(direction) => direction,
                None => {
                    self.buf.advance(1);
                    continue;
                }
            };

            match self.buf[1] {
                MSP_V1_MARKER => return self.take_v1(direction),
                MSP_V2_MARKER => {
                    if self.buf.len() >= 8 {
                        let size = u16::from_le_bytes([self.buf[6], self.buf[7]]) as usize;
                        if size > MSP_V2_MAX_PAYLOAD {
                            self.buf.advance(1);
                            continue;
                        }
                    }
                    return self.take_v2(direction);
                }
                _ => {
                    self.buf.advance(1);
                    continue;
                }
            }
        }
    }

    fn take_v1(&mut self, direction: Direction) -> Option<Result<MspFrame>> {
        // $ M dir size cmd payload checksum
        if self.buf.len() < 5 {
            return None;
        }
        let size = self.buf[3] as usize;
        let total = 6 + size;
        if self.buf.len() < total {
            return None;
        }

        let raw = self.buf.split_to(total);
        let expected = xor_checksum(&raw[3..total - 1]);
        if expected != raw[total - 1] {
            return Some(Err(FcLinkError::Protocol(format!(
                "MSP v1 checksum mismatch for opcode {}: expected 0x{:02X}, got 0x{:02X}",
                raw[4],
                expected,
                raw[total - 1]
            ))));
        }

        Some(Ok(MspFrame {
            variant: ProtocolVariant::V1,
            direction,
            opcode: raw[4] as u16,
            payload: raw[5..total - 1].to_vec(),
        }))
    }

    fn take_v2(&mut self, direction: Direction) -> Option<Result<MspFrame>> {
        // $ X dir flag cmd(2) size(2) payload crc
        if self.buf.len() < 8 {
            return None;
        }
        let size = u16::from_le_bytes([self.buf[6], self.buf[7]]) as usize;
        let total = 9 + size;
        if self.buf.len() < total {
            return None;
        }

        let raw = self.buf.split_to(total);
        let opcode = u16::from_le_bytes([raw[4], raw[5]]);
        let expected = crc8_dvb_s2(&raw[3..total - 1]);
        if expected != raw[total - 1] {
            return Some(Err(FcLinkError::Protocol(format!(
                "MSP v2 CRC mismatch for opcode {}: expected 0x{:02X}, got 0x{:02X}",
                opcode,
                expected,
                raw[total - 1]
            ))));
        }

        Some(Ok(MspFrame {
            variant: ProtocolVariant::V2,
            direction,
            opcode,
            payload: raw[8..total - 1].to_vec(),
        }))
    }
}

fn ensure_len(payload: &[u8], min: usize, what: &str) -> Result<()> {
    if payload.len() < min {
        return Err(FcLinkError::Protocol(format!(
            "{} payload too short: {} bytes (need {})",
            what,
            payload.len(),
            min
        )));
    }
    Ok(())
}

/// Decode `MSP_ATTITUDE`: roll/pitch in decidegrees, yaw in degrees
pub fn decode_attitude(payload: &[u8]) -> Result<AttitudeReading> {
    ensure_len(payload, MSP_ATTITUDE_PAYLOAD_SIZE, "Attitude")?;
    let mut buf = payload;

    let roll = buf.get_i16_le() as f32 / 10.0;
    let pitch = buf.get_i16_le() as f32 / 10.0;
    let yaw = buf.get_i16_le() as f32;

    Ok(AttitudeReading { roll, pitch, yaw })
}

/// Decode `MSP_ALTITUDE`: altitude in cm (i32), vario in cm/s (i16)
pub fn decode_altitude(payload: &[u8]) -> Result<AltitudeReading> {
    ensure_len(payload, MSP_ALTITUDE_PAYLOAD_SIZE, "Altitude")?;
    let mut buf = payload;

    let altitude = buf.get_i32_le() as f32 / 100.0;
    let vario = buf.get_i16_le() as f32 / 100.0;

    Ok(AltitudeReading { altitude, vario })
}

/// Decode `MSP_ANALOG`
///
/// The legacy layout carries voltage in 0.1 V steps; newer firmware appends
/// a 0.01 V precision voltage which wins when present.
pub fn decode_analog(payload: &[u8]) -> Result<AnalogReading> {
    ensure_len(payload, MSP_ANALOG_MIN_PAYLOAD_SIZE, "Analog")?;
    let mut buf = payload;

    let legacy_voltage = buf.get_u8() as f32 / 10.0;
    let mah_drawn = buf.get_u16_le();
    let rssi = buf.get_u16_le();
    let amperage = buf.get_i16_le() as f32 / 100.0;
    let voltage = if buf.remaining() >= 2 {
        buf.get_u16_le() as f32 / 100.0
    } else {
        legacy_voltage
    };

    Ok(AnalogReading { voltage, mah_drawn, rssi, amperage })
}

/// Decode `MSP_BATTERY_STATE`
pub fn decode_battery_state(payload: &[u8]) -> Result<BatteryStateReading> {
    ensure_len(payload, MSP_BATTERY_STATE_PAYLOAD_SIZE, "Battery state")?;
    let mut buf = payload;

    let cell_count = buf.get_u8();
    let capacity_mah = buf.get_u16_le();
    let _legacy_voltage = buf.get_u8();
    let mah_drawn = buf.get_u16_le();
    let amperage = buf.get_u16_le() as f32 / 100.0;
    let state = buf.get_u8();
    let voltage = buf.get_u16_le() as f32 / 100.0;

    Ok(BatteryStateReading { cell_count, capacity_mah, voltage, mah_drawn, amperage, state })
}

/// Decode `MSP_STATUS` / `MSP_STATUS_EX`
///
/// Layout: cycle time, i2c errors, sensors, mode flags (u32), pid profile,
/// then on newer firmware: cpu load, profile count, rate profile, a byte
/// count of extended mode flags followed by those bytes, the arming-disable
/// flag count and the arming-disable flags (u32).
pub fn decode_status(payload: &[u8]) -> Result<StatusReading> {
    ensure_len(payload, MSP_STATUS_MIN_PAYLOAD_SIZE, "Status")?;
    let mut buf = payload;

    let cycle_time_us = buf.get_u16_le();
    let i2c_errors = buf.get_u16_le();
    let sensors = buf.get_u16_le();
    let mode_flags = buf.get_u32_le();
    let pid_profile = buf.get_u8();

    let cpu_load = if buf.remaining() >= 2 { Some(buf.get_u16_le()) } else { None };

    let mut arming_disable_flags = None;
    // profile count + rate profile + extended flag byte count
    if buf.remaining() >= 3 {
        buf.advance(2);
        let extra = buf.get_u8() as usize;
        if buf.remaining() >= extra + 5 {
            buf.advance(extra);
            let _count = buf.get_u8();
            arming_disable_flags = Some(buf.get_u32_le());
        }
    }

    Ok(StatusReading {
        cycle_time_us,
        i2c_errors,
        sensors,
        mode_flags,
        pid_profile,
        cpu_load,
        arming_disable_flags,
    })
}

/// Decode `MSP_RAW_GPS`
///
/// HDOP is sent in centi-units and only by firmware that appends it.
pub fn decode_raw_gps(payload: &[u8]) -> Result<RawGpsReading> {
    ensure_len(payload, MSP_RAW_GPS_MIN_PAYLOAD_SIZE, "GPS")?;
    let mut buf = payload;

    let fix_type = buf.get_u8();
    let satellites = buf.get_u8();
    let latitude = buf.get_i32_le() as f64 / 10_000_000.0;
    let longitude = buf.get_i32_le() as f64 / 10_000_000.0;
    let altitude = buf.get_u16_le() as f32;
    let ground_speed = buf.get_u16_le() as f32 / 100.0;
    let ground_course = buf.get_u16_le() as f32 / 10.0;
    let hdop = if buf.remaining() >= 2 {
        Some(buf.get_u16_le() as f32 / 100.0)
    } else {
        None
    };

    Ok(RawGpsReading {
        fix_type,
        satellites,
        latitude,
        longitude,
        altitude,
        ground_speed,
        ground_course,
        hdop,
    })
}

/// Decode `MSP_RC`: a list of u16 little-endian pulse widths
pub fn decode_rc(payload: &[u8]) -> Result<Vec<u16>> {
    if payload.len() % 2 != 0 {
        return Err(FcLinkError::Protocol(format!(
            "RC payload has odd length {}",
            payload.len()
        )));
    }
    let mut buf = payload;
    let mut channels = Vec::with_capacity(payload.len() / 2);
    while buf.has_remaining() {
        channels.push(buf.get_u16_le());
    }
    Ok(channels)
}

/// Decode `MSP_RX_MAP`: for each logical function (roll, pitch, yaw,
/// throttle, aux...), the raw channel index carrying it
pub fn decode_rx_map(payload: &[u8]) -> Result<Vec<u8>> {
    ensure_len(payload, 4, "RX map")?;
    Ok(payload.to_vec())
}

/// Decode `MSP_BOXNAMES`: `;`-separated names in box order
pub fn decode_box_names(payload: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| FcLinkError::Protocol(format!("Box names are not UTF-8: {}", e)))?;

    let mut names: Vec<String> = text.split(';').map(|name| name.trim().to_string()).collect();
    // trailing separator
    while names.last().is_some_and(|name| name.is_empty()) {
        names.pop();
    }
    Ok(names)
}
