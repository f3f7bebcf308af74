//! # FC Link Library
//!
//! Telemetry polling and command transport for MSP flight controllers.
//!
//! Every producer (telemetry scheduler, RC poller, GPS pusher, RC override
//! writer) shares one half-duplex serial link. The transport serializes them,
//! the scheduler assembles a telemetry snapshot per cycle, and the session
//! controller ties their lifetimes to a generation token.

pub mod config;
pub mod error;
pub mod msp;
pub mod serial;
pub mod session;
pub mod telemetry;
pub mod throttle;
pub mod transport;

#[cfg(test)]
mod testing;
