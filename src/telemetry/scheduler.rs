//! Fixed-rate telemetry polling.

use std::sync::{Arc, Mutex};

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::batch::{Attitude, Battery, FlightStatus, Gps, Position, TelemetryBatch, VfrHud};
use super::decode::{
    arming_disable_reasons, battery_percent, flight_mode_name, is_armed, normalize_heading,
};
use crate::config::{period_from_hz, BatteryConfig, TelemetryConfig};
use crate::error::Result;
use crate::msp::decoder::{
    decode_altitude, decode_analog, decode_attitude, decode_battery_state, decode_box_names,
    decode_raw_gps, decode_status,
};
use crate::msp::protocol::*;
use crate::session::{GateReason, HudMemory, SessionShared};
use crate::throttle::LogThrottle;
use crate::transport::MspTransport;

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Link unavailable; nothing attempted
    Gated(GateReason),
    /// Previous cycle still running
    Skipped,
    /// Session was stopped or restarted
    Stale,
    /// A cycle ran; `recovered` is set when it replaced a stuck one
    Ran { recovered: bool },
}

/// Sub-request groups, each with its own failure log throttle
#[derive(Debug, Clone, Copy)]
enum Group {
    Attitude,
    Altitude,
    Analog,
    Battery,
    Status,
    Gps,
}

impl Group {
    const COUNT: usize = 6;

    fn name(self) -> &'static str {
        match self {
            Group::Attitude => "attitude",
            Group::Altitude => "altitude",
            Group::Analog => "analog",
            Group::Battery => "battery state",
            Group::Status => "status",
            Group::Gps => "GPS",
        }
    }
}

struct Throttles {
    skips: LogThrottle,
    failures: [LogThrottle; Group::COUNT],
}

/// Marks a cycle as running; clears the mark on drop if it is still ours
pub struct CycleGuard {
    shared: Arc<SessionShared>,
    id: u64,
    generation: u64,
    sequence: u64,
    recovered: bool,
}

impl CycleGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Poll counter value when the cycle started
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this cycle force-cleared a stuck predecessor
    pub fn recovered(&self) -> bool {
        self.recovered
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.shared.update_if_current(self.generation, |session| {
            if session.in_progress == Some(id) {
                session.in_progress = None;
            }
        });
    }
}

/// Raw results of one cycle's sub-requests
#[derive(Default)]
struct Readings {
    attitude: Option<AttitudeReading>,
    altitude: Option<AltitudeReading>,
    analog: Option<AnalogReading>,
    battery: Option<BatteryStateReading>,
    status: Option<StatusReading>,
    gps: Option<RawGpsReading>,
}

/// Polls the flight controller once per period and publishes a
/// [`TelemetryBatch`] per cycle.
///
/// Each tick spawns its cycle so ticks keep firing while a cycle is slow. A
/// tick that finds the previous cycle still running is skipped, unless that
/// cycle has been running longer than the stuck timeout, in which case it is
/// abandoned and a fresh cycle starts.
pub struct TelemetryScheduler {
    transport: Arc<dyn MspTransport>,
    shared: Arc<SessionShared>,
    config: TelemetryConfig,
    battery: BatteryConfig,
    generation: u64,
    throttles: Mutex<Throttles>,
}

impl TelemetryScheduler {
    pub fn new(
        transport: Arc<dyn MspTransport>,
        shared: Arc<SessionShared>,
        config: TelemetryConfig,
        battery: BatteryConfig,
        generation: u64,
    ) -> Self {
        let throttles = Throttles {
            skips: LogThrottle::every_nth(config.skip_log_every),
            failures: std::array::from_fn(|_| LogThrottle::new(config.failure_log_every)),
        };
        Self {
            transport,
            shared,
            config,
            battery,
            generation,
            throttles: Mutex::new(throttles),
        }
    }

    /// Tick at the configured rate until the session generation changes
    pub async fn run(self: Arc<Self>) {
        let period = period_from_hz(self.config.rate_hz);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Telemetry scheduler started at {} Hz", self.config.rate_hz);

        loop {
            ticker.tick().await;
            match self.begin_cycle() {
                Ok(cycle) => {
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.run_cycle(cycle).await;
                    });
                }
                Err(TickOutcome::Stale) => break,
                Err(_) => {}
            }
        }

        info!("Telemetry scheduler stopped (generation {})", self.generation);
    }

    /// Run one tick to completion
    pub async fn tick(&self) -> TickOutcome {
        match self.begin_cycle() {
            Ok(cycle) => {
                let recovered = cycle.recovered();
                self.run_cycle(cycle).await;
                TickOutcome::Ran { recovered }
            }
            Err(outcome) => outcome,
        }
    }

    /// Decide whether this tick starts a cycle
    pub fn begin_cycle(&self) -> std::result::Result<CycleGuard, TickOutcome> {
        if !self.shared.is_current(self.generation) {
            return Err(TickOutcome::Stale);
        }
        if let Some(reason) = self.shared.gate(self.transport.as_ref()) {
            return Err(TickOutcome::Gated(reason));
        }

        let now = Instant::now();
        let stuck_timeout = self.config.stuck_timeout();
        let id = self.shared.allocate_cycle_id();
        let mut stuck_for = None;
        let mut skipped = 0;
        let mut sequence = 0;

        let current = self.shared.update_if_current(self.generation, |session| {
            if session.in_progress.is_some() {
                let elapsed = session
                    .last_poll_start
                    .map(|start| now.saturating_duration_since(start))
                    .unwrap_or_default();
                if elapsed <= stuck_timeout {
                    session.skip_count += 1;
                    skipped = session.skip_count;
                    return;
                }
                stuck_for = Some(elapsed);
            }
            session.in_progress = Some(id);
            session.last_poll_start = Some(now);
            session.skip_count = 0;
            session.poll_count += 1;
            sequence = session.poll_count;
        });

        if !current {
            return Err(TickOutcome::Stale);
        }
        if skipped > 0 {
            if self.lock_throttles().skips.should_log() {
                warn!("Telemetry cycle still running, skipped {} tick(s)", skipped);
            }
            return Err(TickOutcome::Skipped);
        }
        // Skip warnings count consecutive skips only
        self.lock_throttles().skips.reset();
        if let Some(elapsed) = stuck_for {
            warn!("Telemetry cycle stuck for {:?}, starting a fresh one", elapsed);
        }

        Ok(CycleGuard {
            shared: Arc::clone(&self.shared),
            id,
            generation: self.generation,
            sequence,
            recovered: stuck_for.is_some(),
        })
    }

    /// Issue the cycle's sub-requests and publish the batch.
    ///
    /// Returns the batch if it was published.
    pub async fn run_cycle(&self, cycle: CycleGuard) -> Option<TelemetryBatch> {
        // Every step bails out once the session is stopped or restarted
        self.refresh_mode_names(cycle.sequence()).await?;

        let mut readings = Readings::default();
        self.still_current()?;
        readings.attitude = self.request(Group::Attitude, MSP_ATTITUDE, decode_attitude).await;
        self.pause().await?;
        readings.altitude = self.request(Group::Altitude, MSP_ALTITUDE, decode_altitude).await;
        self.pause().await?;
        readings.analog = self.request(Group::Analog, MSP_ANALOG, decode_analog).await;
        self.pause().await?;
        readings.battery =
            self.request(Group::Battery, MSP_BATTERY_STATE, decode_battery_state).await;
        self.pause().await?;
        readings.status = self.request(Group::Status, MSP_STATUS_EX, decode_status).await;
        self.pause().await?;
        readings.gps = self.request(Group::Gps, MSP_RAW_GPS, decode_raw_gps).await;

        let mut batch = None;
        self.shared.update_if_current(self.generation, |session| {
            let throttle = session
                .display_throttle(Instant::now(), self.config.commanded_throttle_hold())
                .unwrap_or(0.0);
            batch = Some(self.assemble(
                cycle.sequence(),
                &readings,
                &session.mode_names,
                &mut session.hud,
                throttle,
            ));
        });

        // Stopped or restarted mid-cycle
        let batch = batch?;
        self.shared.publish(batch.clone());
        drop(cycle);
        Some(batch)
    }

    /// Re-fetch box names while the table is empty, every Nth cycle
    async fn refresh_mode_names(&self, sequence: u64) -> Option<()> {
        self.still_current()?;
        let every = self.config.mode_refetch_every.max(1);
        if sequence % every != 0 || !self.shared.with_session(|s| s.mode_names.is_empty()) {
            return Some(());
        }

        let request = CommandRequest::new(MSP_BOXNAMES, self.config.request_timeout())
            .with_variant(ProtocolVariant::V2);
        match self.transport.exchange(&request).await.and_then(|p| decode_box_names(&p)) {
            Ok(names) if !names.is_empty() => {
                debug!("Fetched {} mode names", names.len());
                self.shared.update_if_current(self.generation, |s| s.mode_names = names);
            }
            Ok(_) => {}
            Err(e) => debug!("Mode name refresh failed: {}", e),
        }
        self.pause().await
    }

    async fn request<T>(
        &self,
        group: Group,
        opcode: u16,
        decode: fn(&[u8]) -> Result<T>,
    ) -> Option<T> {
        let request = CommandRequest::new(opcode, self.config.request_timeout());
        match self.transport.exchange(&request).await.and_then(|p| decode(&p)) {
            Ok(reading) => Some(reading),
            Err(e) => {
                let mut throttles = self.lock_throttles();
                let throttle = &mut throttles.failures[group as usize];
                if throttle.should_log() {
                    let what = if e.is_timeout() { "timed out" } else { "failed" };
                    warn!(
                        "Telemetry {} request {} ({} so far): {}",
                        group.name(),
                        what,
                        throttle.seen(),
                        e
                    );
                }
                None
            }
        }
    }

    fn still_current(&self) -> Option<()> {
        self.shared.is_current(self.generation).then_some(())
    }

    /// Inter-command gap; `None` if the session went stale around it
    async fn pause(&self) -> Option<()> {
        self.still_current()?;
        let delay = self.config.inter_command_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.still_current()
    }

    fn assemble(
        &self,
        sequence: u64,
        readings: &Readings,
        mode_names: &[String],
        hud: &mut HudMemory,
        throttle: f32,
    ) -> TelemetryBatch {
        let mut batch = TelemetryBatch::new(self.generation, sequence);

        if let Some(att) = readings.attitude {
            // MSP_ATTITUDE carries no body rates
            batch.attitude = Some(Attitude {
                roll: att.roll,
                pitch: att.pitch,
                yaw: att.yaw,
                ..Attitude::default()
            });
            hud.heading = normalize_heading(att.yaw);
        }

        if let Some(alt) = readings.altitude {
            hud.altitude = alt.altitude;
            hud.climb = alt.vario;
        }

        if readings.analog.is_some() || readings.battery.is_some() {
            batch.battery = Some(self.battery_group(readings.analog, readings.battery));
        }

        if let Some(status) = &readings.status {
            batch.flight = Some(FlightStatus {
                mode: flight_mode_name(status.mode_flags, mode_names),
                mode_flags: status.mode_flags,
                armed: is_armed(status.mode_flags),
                arming_disabled: status
                    .arming_disable_flags
                    .map(arming_disable_reasons)
                    .unwrap_or_default(),
                active_sensors: status.sensors,
            });
        }

        if let Some(gps) = readings.gps {
            hud.groundspeed = gps.ground_speed;
            batch.gps = Some(Gps {
                fix_type: gps.fix_type,
                satellites: gps.satellites,
                hdop: gps.hdop,
                latitude: gps.latitude,
                longitude: gps.longitude,
                altitude: gps.altitude,
            });
            batch.position = Some(Position {
                latitude: gps.latitude,
                longitude: gps.longitude,
                altitude: gps.altitude,
                relative_altitude: readings.altitude.map(|alt| alt.altitude),
                velocity: None,
            });
        }

        batch.vfr_hud = Some(VfrHud {
            airspeed: hud.groundspeed,
            groundspeed: hud.groundspeed,
            heading: hud.heading,
            throttle,
            altitude: hud.altitude,
            climb: hud.climb,
        });

        batch
    }

    fn battery_group(
        &self,
        analog: Option<AnalogReading>,
        state: Option<BatteryStateReading>,
    ) -> Battery {
        let mut battery = Battery::default();

        if let Some(analog) = analog {
            battery.voltage = Some(analog.voltage);
            battery.current = Some(analog.amperage);
            battery.mah_drawn = Some(analog.mah_drawn);
        }

        if let Some(state) = state {
            if state.voltage > 0.0 {
                battery.voltage = Some(state.voltage);
            }
            battery.current.get_or_insert(state.amperage);
            battery.mah_drawn.get_or_insert(state.mah_drawn);

            if state.cell_count > 0 {
                let voltage = battery.voltage.unwrap_or(state.voltage);
                let cell_voltage = voltage / state.cell_count as f32;
                battery.cell_count = Some(state.cell_count);
                battery.cell_voltage = Some(cell_voltage);
                battery.remaining_percent = Some(battery_percent(
                    cell_voltage,
                    self.battery.min_cell_voltage,
                    self.battery.max_cell_voltage,
                ));
            }
        }

        battery
    }

    fn lock_throttles(&self) -> std::sync::MutexGuard<'_, Throttles> {
        self.throttles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{payloads, FakeFc, Reply};
    use std::time::Duration;

    fn healthy_fc() -> FakeFc {
        FakeFc::new()
            .respond(MSP_ATTITUDE, payloads::attitude(125, -40, 270))
            .respond(MSP_ALTITUDE, payloads::altitude(1520, -35))
            .respond(MSP_ANALOG, payloads::analog(150, 320, 1250))
            .respond(MSP_BATTERY_STATE, payloads::battery_state(4, 150, 320))
            .respond(MSP_STATUS_EX, payloads::status_ex(0b101, 1 << 7))
            .respond(MSP_RAW_GPS, payloads::raw_gps(2, 14, 47.3977, 8.5456, 95))
            .respond(MSP_BOXNAMES, payloads::box_names(&["ARM", "ANGLE", "AUTO"]))
    }

    fn scheduler_for(fc: &FakeFc) -> (Arc<SessionShared>, TelemetryScheduler) {
        let shared = Arc::new(SessionShared::default());
        let generation = shared.advance_generation();
        let scheduler = TelemetryScheduler::new(
            Arc::new(fc.clone()),
            Arc::clone(&shared),
            TelemetryConfig::default(),
            BatteryConfig::default(),
            generation,
        );
        (shared, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_requests_in_order() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);
        shared.with_session(|s| s.mode_names = vec!["ARM".to_string()]);

        assert_eq!(scheduler.tick().await, TickOutcome::Ran { recovered: false });
        assert_eq!(
            fc.exchanged(),
            vec![
                MSP_ATTITUDE,
                MSP_ALTITUDE,
                MSP_ANALOG,
                MSP_BATTERY_STATE,
                MSP_STATUS_EX,
                MSP_RAW_GPS
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);
        shared.with_session(|s| s.mode_names = vec!["ARM".into(), "ANGLE".into(), "AUTO".into()]);
        let mut rx = shared.subscribe();

        scheduler.tick().await;
        let batch = rx.try_recv().unwrap();

        let attitude = batch.attitude.unwrap();
        assert!((attitude.roll - 12.5).abs() < 1e-4);
        assert_eq!(attitude.yaw, 270.0);
        assert_eq!(attitude.roll_rate, 0.0);

        let battery = batch.battery.unwrap();
        assert_eq!(battery.cell_count, Some(4));
        assert_eq!(battery.remaining_percent, Some(50));

        let flight = batch.flight.unwrap();
        assert!(flight.armed);
        assert_eq!(flight.mode, "AUTO");
        assert_eq!(flight.arming_disabled, vec!["THROTTLE"]);

        let gps = batch.gps.unwrap();
        assert_eq!(gps.satellites, 14);
        assert_eq!(gps.hdop, Some(0.95));

        let position = batch.position.unwrap();
        assert_eq!(position.velocity, None);
        assert_eq!(position.relative_altitude, Some(15.2));

        let hud = batch.vfr_hud.unwrap();
        assert_eq!(hud.heading, 270.0);
        assert_eq!(hud.groundspeed, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_degrades_only_that_group() {
        let fc = healthy_fc()
            .reply(MSP_BATTERY_STATE, Reply::Timeout)
            .reply(MSP_ANALOG, Reply::Rejected);
        let (shared, scheduler) = scheduler_for(&fc);
        let mut rx = shared.subscribe();

        scheduler.tick().await;
        let batch = rx.try_recv().unwrap();

        assert!(batch.battery.is_none());
        assert!(batch.attitude.is_some());
        assert!(batch.flight.is_some());
        assert!(batch.gps.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attitude_failure_still_publishes_rest() {
        let fc = healthy_fc().reply(MSP_ATTITUDE, Reply::Timeout);
        let (shared, scheduler) = scheduler_for(&fc);
        let mut rx = shared.subscribe();

        scheduler.tick().await;
        let batch = rx.try_recv().unwrap();

        assert!(batch.attitude.is_none());
        assert!(batch.battery.is_some());
        assert!(batch.gps.is_some());
        assert!(batch.flight.is_some());
        assert!(batch.vfr_hud.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_failure_keeps_hud_values() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);
        let mut rx = shared.subscribe();
        scheduler.tick().await;
        let first = rx.try_recv().unwrap().vfr_hud.unwrap();

        let fc = fc
            .reply(MSP_RAW_GPS, Reply::Timeout)
            .reply(MSP_ATTITUDE, Reply::Timeout)
            .reply(MSP_ALTITUDE, Reply::Timeout);
        scheduler.tick().await;
        let batch = rx.try_recv().unwrap();

        assert!(batch.gps.is_none());
        let hud = batch.vfr_hud.unwrap();
        assert_eq!(hud.heading, first.heading);
        assert_eq!(hud.altitude, first.altitude);
        assert_eq!(hud.climb, first.climb);
        assert_eq!(hud.groundspeed, first.groundspeed);
        assert!(fc.exchange_count(MSP_RAW_GPS) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gated_tick_does_nothing() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);

        shared.set_config_lock(true);
        assert_eq!(scheduler.tick().await, TickOutcome::Gated(GateReason::ConfigLocked));
        shared.set_config_lock(false);

        shared.set_cli_mode(true);
        assert_eq!(scheduler.tick().await, TickOutcome::Gated(GateReason::CliMode));
        shared.set_cli_mode(false);

        fc.set_open(false);
        assert_eq!(scheduler.tick().await, TickOutcome::Gated(GateReason::TransportClosed));

        assert!(fc.exchanged().is_empty());
        assert_eq!(shared.with_session(|s| s.poll_count), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_while_cycle_running() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);

        let running = scheduler.begin_cycle().unwrap();
        assert!(matches!(scheduler.begin_cycle(), Err(TickOutcome::Skipped)));
        assert!(matches!(scheduler.begin_cycle(), Err(TickOutcome::Skipped)));
        assert_eq!(shared.with_session(|s| s.skip_count), 2);

        drop(running);
        assert_eq!(shared.with_session(|s| s.in_progress), None);
        assert!(scheduler.begin_cycle().is_ok());
        assert_eq!(shared.with_session(|s| s.skip_count), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_cycle_is_recovered() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);

        let stuck = scheduler.begin_cycle().unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(scheduler.begin_cycle(), Err(TickOutcome::Skipped)));

        tokio::time::advance(Duration::from_secs(5)).await;
        let fresh = scheduler.begin_cycle().unwrap();
        assert!(fresh.recovered());
        assert_eq!(shared.with_session(|s| s.skip_count), 0);

        // The abandoned cycle finishing late must not clear the new one
        drop(stuck);
        assert_eq!(shared.with_session(|s| s.in_progress), Some(fresh.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_exchange_recovers_through_run_loop() {
        let fc = healthy_fc().reply(MSP_ATTITUDE, Reply::Hang);
        let (shared, scheduler) = scheduler_for(&fc);
        let scheduler = Arc::new(scheduler);

        let handle = tokio::spawn(Arc::clone(&scheduler).run());
        tokio::time::sleep(Duration::from_secs(7)).await;

        // Cycle 1 hung; cycle 2 started once the stuck timeout passed
        assert_eq!(shared.with_session(|s| s.poll_count), 2);

        shared.advance_generation();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cycle_does_not_publish() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);
        let mut rx = shared.subscribe();

        let cycle = scheduler.begin_cycle().unwrap();
        shared.advance_generation();
        assert!(scheduler.run_cycle(cycle).await.is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.tick().await, TickOutcome::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_cycle_stops_remaining_requests() {
        let fc = healthy_fc().delay(MSP_ATTITUDE, Duration::from_millis(100));
        let (shared, scheduler) = scheduler_for(&fc);
        shared.with_session(|s| s.mode_names = vec!["ARM".to_string()]);
        let mut rx = shared.subscribe();

        let restart = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                shared.advance_generation();
            })
        };

        let cycle = scheduler.begin_cycle().unwrap();
        assert!(scheduler.run_cycle(cycle).await.is_none());
        restart.await.unwrap();

        assert_eq!(fc.exchanged(), vec![MSP_ATTITUDE]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_warning_only_on_every_nth_consecutive_skip() {
        let fc = healthy_fc();
        let shared = Arc::new(SessionShared::default());
        let generation = shared.advance_generation();
        let config = TelemetryConfig { skip_log_every: 3, ..TelemetryConfig::default() };
        let scheduler = TelemetryScheduler::new(
            Arc::new(fc.clone()),
            Arc::clone(&shared),
            config,
            BatteryConfig::default(),
            generation,
        );

        let running = scheduler.begin_cycle().unwrap();
        for _ in 0..2 {
            assert!(matches!(scheduler.begin_cycle(), Err(TickOutcome::Skipped)));
        }
        // Nothing logged yet: both skips are still suppressed
        assert_eq!(scheduler.lock_throttles().skips.suppressed(), 2);

        assert!(matches!(scheduler.begin_cycle(), Err(TickOutcome::Skipped)));
        assert_eq!(scheduler.lock_throttles().skips.suppressed(), 0);

        // A cycle that starts normally restarts the count
        drop(running);
        let _next = scheduler.begin_cycle().unwrap();
        assert_eq!(scheduler.lock_throttles().skips.seen(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_names_refetched_when_empty() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);
        shared.with_session(|s| s.poll_count = 49);

        scheduler.tick().await;
        assert_eq!(fc.exchanged()[0], MSP_BOXNAMES);
        assert_eq!(shared.with_session(|s| s.mode_names.len()), 3);

        // Table present: no further refresh
        shared.with_session(|s| s.poll_count = 99);
        scheduler.tick().await;
        assert_eq!(fc.exchange_count(MSP_BOXNAMES), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_refetch_failure_is_silent() {
        let fc = healthy_fc().reply(MSP_BOXNAMES, Reply::Timeout);
        let (shared, scheduler) = scheduler_for(&fc);
        shared.with_session(|s| s.poll_count = 49);
        let mut rx = shared.subscribe();

        scheduler.tick().await;
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.flight.unwrap().mode, "ACRO");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_prefers_recent_command() {
        let fc = healthy_fc();
        let (shared, scheduler) = scheduler_for(&fc);
        let mut rx = shared.subscribe();
        shared.with_session(|s| {
            s.observed_throttle = Some(10.0);
            s.commanded_throttle = Some((60.0, Instant::now()));
        });

        scheduler.tick().await;
        assert_eq!(rx.try_recv().unwrap().vfr_hud.unwrap().throttle, 60.0);

        tokio::time::advance(Duration::from_secs(2)).await;
        scheduler.tick().await;
        assert_eq!(rx.try_recv().unwrap().vfr_hud.unwrap().throttle, 10.0);
    }
}
