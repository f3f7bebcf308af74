//! # MSP Protocol Module
//!
//! Implementation of the MultiWii Serial Protocol used to query and command
//! Betaflight/INAV-style flight controllers.
//!
//! This module handles:
//! - v1 (`$M`) and v2 (`$X`) request framing
//! - Streaming response parsing with resynchronization
//! - Telemetry payload decoding (attitude, altitude, analog, battery, status, GPS, RC)
//! - Command payload encoding (raw RC override, sensor GPS injection)

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
