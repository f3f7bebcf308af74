//! # MSP Frame Encoder
//!
//! Encodes MSP v1 and v2 frames and the payloads the host writes.

use bytes::{BufMut, BytesMut};

use super::crc::{crc8_dvb_s2, xor_checksum};
use super::protocol::*;
use crate::error::Result;

/// Encode a request into a complete wire frame
///
/// # Arguments
///
/// * `request` - Opcode, payload and framing variant
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Complete frame, or error if the payload does not fit
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fc_link::msp::encoder::encode_request;
/// use fc_link::msp::protocol::{CommandRequest, MSP_ATTITUDE};
///
/// let req = CommandRequest::new(MSP_ATTITUDE, Duration::from_millis(200));
/// let frame = encode_request(&req)?;
/// assert_eq!(&frame[..3], b"$M<");
/// # Ok::<(), fc_link::error::FcLinkError>(())
/// ```
pub fn encode_request(request: &CommandRequest) -> Result<Vec<u8>> {
    let frame = MspFrame::new(
        request.variant,
        Direction::Request,
        request.opcode,
        request.payload.clone(),
    )?;
    Ok(encode_frame(&frame))
}

/// Encode a frame in either framing
///
/// v1: `$ M dir size cmd payload xor(size, cmd, payload)`
///
/// v2: `$ X dir flag cmd_lo cmd_hi size_lo size_hi payload crc8(flag..payload)`
pub fn encode_frame(frame: &MspFrame) -> Vec<u8> {
    match frame.variant {
        ProtocolVariant::V1 => encode_v1(frame),
        ProtocolVariant::V2 => encode_v2(frame),
    }
}

fn encode_v1(frame: &MspFrame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6 + frame.payload.len());
    buf.put_u8(MSP_PREAMBLE);
    buf.put_u8(MSP_V1_MARKER);
    buf.put_u8(frame.direction.as_byte());
    buf.put_u8(frame.payload.len() as u8);
    buf.put_u8(frame.opcode as u8);
    buf.put_slice(&frame.payload);

    let checksum = xor_checksum(&buf[3..]);
    buf.put_u8(checksum);
    buf.to_vec()
}

fn encode_v2(frame: &MspFrame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(9 + frame.payload.len());
    buf.put_u8(MSP_PREAMBLE);
    buf.put_u8(MSP_V2_MARKER);
    buf.put_u8(frame.direction.as_byte());
    buf.put_u8(0); // flag
    buf.put_u16_le(frame.opcode);
    buf.put_u16_le(frame.payload.len() as u16);
    buf.put_slice(&frame.payload);

    let crc = crc8_dvb_s2(&buf[3..]);
    buf.put_u8(crc);
    buf.to_vec()
}

/// Encode RC channel values for `MSP_SET_RAW_RC`
///
/// Each channel is an unsigned 16-bit little-endian pulse width. Callers are
/// expected to have validated count and range already.
pub fn encode_set_raw_rc(channels: &[u16]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(channels.len() * 2);
    for &value in channels {
        buf.put_u16_le(value);
    }
    buf.to_vec()
}

/// Encode an `MSP2_SENSOR_GPS` payload (52 bytes)
pub fn encode_sensor_gps(gps: &SensorGpsPayload) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(MSP2_SENSOR_GPS_PAYLOAD_SIZE);
    buf.put_u8(0); // instance
    buf.put_u16_le(0xFFFF); // gps week unknown
    buf.put_u32_le(0); // time of week
    buf.put_u8(gps.fix_type);
    buf.put_u8(gps.satellites);
    buf.put_u16_le(100); // horizontal position accuracy, cm
    buf.put_u16_le(100); // vertical position accuracy, cm
    buf.put_u16_le(100); // horizontal velocity accuracy, cm/s
    buf.put_u16_le(gps.hdop);
    buf.put_i32_le(gps.longitude);
    buf.put_i32_le(gps.latitude);
    buf.put_i32_le(gps.msl_altitude_cm);
    buf.put_i32_le(gps.vel_north_cms);
    buf.put_i32_le(gps.vel_east_cms);
    buf.put_i32_le(gps.vel_down_cms);
    buf.put_u16_le(gps.ground_course);
    buf.put_u16_le(0xFFFF); // true yaw unavailable
    buf.put_u16_le(gps.year);
    buf.put_u8(gps.month);
    buf.put_u8(gps.day);
    buf.put_u8(gps.hour);
    buf.put_u8(gps.minute);
    buf.put_u8(gps.second);
    buf.to_vec()
}
