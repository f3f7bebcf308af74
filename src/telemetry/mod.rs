//! # Telemetry Module
//!
//! Turns MSP polling into a stream of telemetry snapshots.
//!
//! This module handles:
//! - Polling the flight controller at a fixed rate ([`scheduler`])
//! - Deriving display values from raw readings ([`decode`])
//! - The per-cycle snapshot type ([`batch`])
//! - Writing snapshots to rotating JSONL files ([`recorder`])

pub mod batch;
pub mod decode;
pub mod recorder;
pub mod scheduler;

pub use batch::TelemetryBatch;
pub use recorder::TelemetryRecorder;
pub use scheduler::{TelemetryScheduler, TickOutcome};
