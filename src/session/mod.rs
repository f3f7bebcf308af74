//! # Session Module
//!
//! State shared by everything that runs while a telemetry session is live.
//!
//! - [`Session`]: counters, cached reference data and derived throttle state
//! - [`SessionShared`]: the generation token, gate flags and batch channel
//! - [`bootstrap`], [`pollers`], [`writer`], [`controller`]: the producers
//!   that run against it

pub mod bootstrap;
pub mod controller;
pub mod pollers;
pub mod writer;

pub use controller::SessionController;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::telemetry::TelemetryBatch;
use crate::transport::MspTransport;

/// Logical function order in `MSP_RX_MAP`: roll, pitch, yaw, throttle, aux...
const RX_MAP_THROTTLE: usize = 3;

/// Raw channel order `AETR1234`
const DEFAULT_RX_MAP: [u8; 8] = [0, 1, 3, 2, 4, 5, 6, 7];

/// Which raw RC channel carries each logical function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    map: Vec<u8>,
}

impl ChannelMap {
    pub fn from_rx_map(map: Vec<u8>) -> Self {
        Self { map }
    }

    /// Index of the throttle channel in a raw (`MSP_SET_RAW_RC`) vector
    pub fn throttle_index(&self) -> usize {
        self.map
            .get(RX_MAP_THROTTLE)
            .map(|&raw| raw as usize)
            .unwrap_or(DEFAULT_RX_MAP[RX_MAP_THROTTLE] as usize)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self { map: DEFAULT_RX_MAP.to_vec() }
    }
}

/// Last values shown on the HUD, republished when a cycle cannot refresh them
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HudMemory {
    pub heading: f32,
    pub altitude: f32,
    pub climb: f32,
    pub groundspeed: f32,
}

/// One live telemetry session
#[derive(Debug, Clone)]
pub struct Session {
    pub generation: u64,
    /// Cycles started
    pub poll_count: u64,
    /// Consecutive ticks skipped because a cycle was still running
    pub skip_count: u64,
    pub last_poll_start: Option<Instant>,
    /// Id of the cycle currently running, if any
    pub in_progress: Option<u64>,
    /// Box names indexed by mode-flag bit; empty until fetched
    pub mode_names: Vec<String>,
    pub channel_map: ChannelMap,
    /// Throttle % read back from the RC poller
    pub observed_throttle: Option<f32>,
    /// Throttle % last written by the command writer
    pub commanded_throttle: Option<(f32, Instant)>,
    pub hud: HudMemory,
}

impl Session {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            poll_count: 0,
            skip_count: 0,
            last_poll_start: None,
            in_progress: None,
            mode_names: Vec::new(),
            channel_map: ChannelMap::default(),
            observed_throttle: None,
            commanded_throttle: None,
            hud: HudMemory::default(),
        }
    }

    /// Throttle to display: a recent command wins over the read-back value
    pub fn display_throttle(&self, now: Instant, hold: Duration) -> Option<f32> {
        match self.commanded_throttle {
            Some((value, at)) if now.saturating_duration_since(at) <= hold => Some(value),
            _ => self.observed_throttle,
        }
    }
}

/// Why a producer declined to touch the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    TransportClosed,
    ConfigLocked,
    CliMode,
}

/// State shared between the controller and every spawned producer.
///
/// The session mutex is a plain `std::sync::Mutex` and is never held across
/// an `.await`. Producers capture the generation when they start and compare
/// it before committing anything; a mismatch means they were superseded.
pub struct SessionShared {
    generation: AtomicU64,
    session: Mutex<Session>,
    next_cycle_id: AtomicU64,
    cli_mode: AtomicBool,
    config_lock: AtomicBool,
    rc_in_flight: AtomicBool,
    batches: broadcast::Sender<TelemetryBatch>,
}

impl SessionShared {
    /// `capacity` is the broadcast buffer depth per subscriber
    pub fn new(capacity: usize) -> Self {
        let (batches, _) = broadcast::channel(capacity.max(1));
        Self {
            generation: AtomicU64::new(0),
            session: Mutex::new(Session::new(0)),
            next_cycle_id: AtomicU64::new(1),
            cli_mode: AtomicBool::new(false),
            config_lock: AtomicBool::new(false),
            rc_in_flight: AtomicBool::new(false),
            batches,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Invalidate every running producer and start from a fresh session.
    /// Returns the new generation.
    pub fn advance_generation(&self) -> u64 {
        let mut session = self.lock_session();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *session = Session::new(generation);
        generation
    }

    /// Run `f` with the session locked
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.lock_session())
    }

    /// Run `f` only if the session still belongs to `generation`
    pub fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut Session)) -> bool {
        let mut session = self.lock_session();
        if session.generation != generation {
            return false;
        }
        f(&mut session);
        true
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        // A panicking producer must not take the whole session down with it
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn allocate_cycle_id(&self) -> u64 {
        self.next_cycle_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Reason the link must be left alone right now, if any
    pub fn gate(&self, transport: &dyn MspTransport) -> Option<GateReason> {
        if !transport.is_open() {
            Some(GateReason::TransportClosed)
        } else if self.config_lock.load(Ordering::SeqCst) {
            Some(GateReason::ConfigLocked)
        } else if self.cli_mode.load(Ordering::SeqCst) {
            Some(GateReason::CliMode)
        } else {
            None
        }
    }

    pub fn set_cli_mode(&self, active: bool) {
        self.cli_mode.store(active, Ordering::SeqCst);
    }

    pub fn is_cli_mode(&self) -> bool {
        self.cli_mode.load(Ordering::SeqCst)
    }

    pub fn set_config_lock(&self, held: bool) {
        self.config_lock.store(held, Ordering::SeqCst);
    }

    pub(crate) fn rc_in_flight(&self) -> &AtomicBool {
        &self.rc_in_flight
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryBatch> {
        self.batches.subscribe()
    }

    /// Hand a batch to every subscriber; returns how many received it
    pub fn publish(&self, batch: TelemetryBatch) -> usize {
        self.batches.send(batch).unwrap_or(0)
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new(16)
    }
}
