//! Auxiliary periodic producers: RC input polling and simulated GPS push.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SessionShared;
use crate::config::{period_from_hz, GpsPushConfig, RcConfig};
use crate::msp::decoder::decode_rc;
use crate::msp::encoder::encode_sensor_gps;
use crate::msp::protocol::{
    CommandRequest, ProtocolVariant, SensorGpsPayload, MSP2_SENSOR_GPS, MSP_RC,
};
use crate::telemetry::decode::{normalize_heading, throttle_percent};
use crate::throttle::LogThrottle;
use crate::transport::MspTransport;

const FEET_TO_METERS: f64 = 0.3048;
const KNOTS_TO_MPS: f64 = 0.514444;
const FPM_TO_MPS: f64 = 0.00508;

/// `MSP2_SENSOR_GPS` fix type for a 3D fix
const GPS_FIX_3D: u8 = 2;

/// Holds a single-flight flag for as long as it lives
struct SingleFlight<'a>(&'a AtomicBool);

impl<'a> SingleFlight<'a> {
    fn try_claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reads the RC input channels and derives the observed throttle
pub struct RcPoller {
    transport: Arc<dyn MspTransport>,
    shared: Arc<SessionShared>,
    config: RcConfig,
    generation: u64,
}

impl RcPoller {
    pub fn new(
        transport: Arc<dyn MspTransport>,
        shared: Arc<SessionShared>,
        config: RcConfig,
        generation: u64,
    ) -> Self {
        Self { transport, shared, config, generation }
    }

    /// Poll at the configured rate until the session generation changes
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(period_from_hz(self.config.poll_rate_hz));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("RC poller started at {} Hz", self.config.poll_rate_hz);

        loop {
            ticker.tick().await;
            if !self.shared.is_current(self.generation) {
                break;
            }
            let poller = Arc::clone(&self);
            tokio::spawn(async move {
                poller.poll_once().await;
            });
        }

        debug!("RC poller stopped (generation {})", self.generation);
    }

    /// Read the RC channels once.
    ///
    /// Returns `None` when gated, when a read is already outstanding, or on
    /// failure. Failures only log at debug level.
    pub async fn poll_once(&self) -> Option<Vec<u16>> {
        if self.shared.gate(self.transport.as_ref()).is_some() {
            return None;
        }
        let Some(_flight) = SingleFlight::try_claim(self.shared.rc_in_flight()) else {
            debug!("RC read still outstanding, skipping");
            return None;
        };

        let request = CommandRequest::new(MSP_RC, self.config.timeout());
        let channels = match self.transport.exchange(&request).await.and_then(|p| decode_rc(&p)) {
            Ok(channels) => channels,
            Err(e) => {
                debug!("RC read failed: {}", e);
                return None;
            }
        };

        if let Some(&pulse) = channels.get(self.config.throttle_channel) {
            let throttle =
                throttle_percent(pulse, self.config.throttle_min, self.config.throttle_max);
            self.shared
                .update_if_current(self.generation, |s| s.observed_throttle = Some(throttle));
        }
        Some(channels)
    }
}

/// A position bridged in from the simulator or ground station
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: f64,
    pub ground_speed_kt: f64,
    pub heading_deg: f64,
    pub vertical_speed_fpm: f64,
}

/// Convert a bridged position into the `MSP2_SENSOR_GPS` wire form
pub fn sensor_gps_from_sample(
    sample: &PositionSample,
    satellites: u8,
    hdop: u16,
    now: DateTime<Utc>,
) -> SensorGpsPayload {
    let heading = normalize_heading(sample.heading_deg as f32) as f64;
    let speed = sample.ground_speed_kt * KNOTS_TO_MPS;
    let course = heading.to_radians();
    let climb = sample.vertical_speed_fpm * FPM_TO_MPS;

    SensorGpsPayload {
        fix_type: GPS_FIX_3D,
        satellites,
        hdop,
        latitude: (sample.latitude * 1e7).round() as i32,
        longitude: (sample.longitude * 1e7).round() as i32,
        msl_altitude_cm: (sample.altitude_ft * FEET_TO_METERS * 100.0).round() as i32,
        vel_north_cms: (speed * course.cos() * 100.0).round() as i32,
        vel_east_cms: (speed * course.sin() * 100.0).round() as i32,
        // NED: climbing is negative down-velocity
        vel_down_cms: (-climb * 100.0).round() as i32,
        ground_course: (heading * 100.0).round() as u16,
        year: now.year() as u16,
        month: now.month() as u8,
        day: now.day() as u8,
        hour: now.hour() as u8,
        minute: now.minute() as u8,
        second: now.second() as u8,
    }
}

/// Feeds the latest bridged position to the flight controller as a GPS
/// sensor, for as long as its push epoch is current
pub struct GpsPusher {
    transport: Arc<dyn MspTransport>,
    shared: Arc<SessionShared>,
    config: GpsPushConfig,
    position: watch::Receiver<Option<PositionSample>>,
    epoch: Arc<AtomicU64>,
    own_epoch: u64,
    failures: LogThrottle,
}

impl GpsPusher {
    pub fn new(
        transport: Arc<dyn MspTransport>,
        shared: Arc<SessionShared>,
        config: GpsPushConfig,
        position: watch::Receiver<Option<PositionSample>>,
        epoch: Arc<AtomicU64>,
    ) -> Self {
        let own_epoch = epoch.load(Ordering::SeqCst);
        Self {
            transport,
            shared,
            config,
            position,
            epoch,
            own_epoch,
            failures: LogThrottle::new(50),
        }
    }

    fn is_enabled(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.own_epoch
    }

    pub async fn run(mut self) {
        let mut ticker = interval(period_from_hz(self.config.rate_hz));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("GPS push started at {} Hz", self.config.rate_hz);

        loop {
            ticker.tick().await;
            if !self.is_enabled() {
                break;
            }
            self.push_once().await;
        }

        info!("GPS push stopped");
    }

    /// Send the latest position once; returns true if it was written
    pub async fn push_once(&mut self) -> bool {
        if self.shared.gate(self.transport.as_ref()).is_some() {
            return false;
        }
        let latest = *self.position.borrow();
        let Some(sample) = latest else {
            return false;
        };

        let gps =
            sensor_gps_from_sample(&sample, self.config.satellites, self.config.hdop, Utc::now());
        let request = CommandRequest::new(MSP2_SENSOR_GPS, self.config.timeout())
            .with_payload(encode_sensor_gps(&gps))
            .with_variant(ProtocolVariant::V2);

        match self.transport.send(&request).await {
            Ok(()) => true,
            Err(e) => {
                if self.failures.should_log() {
                    warn!("GPS push failed ({} so far): {}", self.failures.seen(), e);
                }
                false
            }
        }
    }
}
