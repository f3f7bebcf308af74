//! Session lifecycle: start, stop, restart and the external control surface.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use super::bootstrap::{BootstrapOutcome, BootstrapSequencer};
use super::pollers::{GpsPusher, PositionSample, RcPoller};
use super::writer::CommandWriter;
use super::SessionShared;
use crate::config::{rate_in_range, Config, MAX_RATE_HZ, MIN_RATE_HZ};
use crate::error::{FcLinkError, Result};
use crate::telemetry::{TelemetryBatch, TelemetryScheduler};
use crate::transport::MspTransport;

/// Broadcast depth for telemetry batches
const BATCH_CHANNEL_CAPACITY: usize = 32;

/// Owns the session generation and everything spawned for it.
///
/// `stop` and `start` never cancel in-flight exchanges. They advance the
/// generation; every spawned loop and cycle checks it and drops its results
/// once superseded. Spawning requires a Tokio runtime.
pub struct SessionController {
    transport: Arc<dyn MspTransport>,
    shared: Arc<SessionShared>,
    config: Config,
    writer: CommandWriter,
    running: AtomicBool,
    position: watch::Sender<Option<PositionSample>>,
    gps_epoch: Arc<AtomicU64>,
    gps_enabled: AtomicBool,
}

impl SessionController {
    pub fn new(transport: Arc<dyn MspTransport>, config: Config) -> Self {
        let shared = Arc::new(SessionShared::new(BATCH_CHANNEL_CAPACITY));
        let writer =
            CommandWriter::new(Arc::clone(&transport), Arc::clone(&shared), config.rc.clone());
        let (position, _) = watch::channel(None);
        Self {
            transport,
            shared,
            config,
            writer,
            running: AtomicBool::new(false),
            position,
            gps_epoch: Arc::new(AtomicU64::new(0)),
            gps_enabled: AtomicBool::new(false),
        }
    }

    /// Start polling at `rate_hz`, restarting if a session is already live.
    ///
    /// Returns the new session generation. A rate outside
    /// [`MIN_RATE_HZ`]..=[`MAX_RATE_HZ`] is rejected and leaves any live
    /// session untouched.
    pub fn start(&self, rate_hz: f32) -> Result<u64> {
        if !rate_in_range(rate_hz) {
            return Err(FcLinkError::Validation(format!(
                "telemetry rate {} Hz must be between {} and {}",
                rate_hz, MIN_RATE_HZ, MAX_RATE_HZ
            )));
        }
        if self.is_running() {
            info!("Restarting telemetry session");
            self.stop();
        }

        let generation = self.shared.advance_generation();
        self.running.store(true, Ordering::SeqCst);
        info!("Starting telemetry session {} at {} Hz", generation, rate_hz);

        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let bootstrap = self.config.bootstrap.clone();
        let mut telemetry = self.config.telemetry.clone();
        telemetry.rate_hz = rate_hz;
        let battery = self.config.battery.clone();
        let rc = self.config.rc.clone();

        tokio::spawn(async move {
            let sequencer = BootstrapSequencer::new(
                Arc::clone(&transport),
                Arc::clone(&shared),
                &bootstrap,
                generation,
            );
            if sequencer.run().await == BootstrapOutcome::Superseded {
                return;
            }

            let poller =
                RcPoller::new(Arc::clone(&transport), Arc::clone(&shared), rc, generation);
            tokio::spawn(Arc::new(poller).run());

            let scheduler =
                TelemetryScheduler::new(transport, shared, telemetry, battery, generation);
            Arc::new(scheduler).run().await;
        });

        Ok(generation)
    }

    /// Stop the live session; a no-op when nothing is running
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Stop requested with no session running");
            return;
        }
        let generation = self.shared.advance_generation();
        info!("Telemetry session stopped (now generation {})", generation);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryBatch> {
        self.shared.subscribe()
    }

    /// Start injecting bridged positions as a GPS sensor
    pub fn enable_gps_push(&self) {
        if self.gps_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gps_epoch.fetch_add(1, Ordering::SeqCst);
        let pusher = GpsPusher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            self.config.gps_push.clone(),
            self.position.subscribe(),
            Arc::clone(&self.gps_epoch),
        );
        tokio::spawn(pusher.run());
    }

    pub fn disable_gps_push(&self) {
        if self.gps_enabled.swap(false, Ordering::SeqCst) {
            self.gps_epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn is_gps_push_enabled(&self) -> bool {
        self.gps_enabled.load(Ordering::SeqCst)
    }

    /// Latest bridged position, picked up by the GPS pusher on its next tick
    pub fn update_position(&self, sample: PositionSample) {
        self.position.send_replace(Some(sample));
    }

    pub fn set_cli_mode(&self, active: bool) {
        info!("CLI mode {}", if active { "entered" } else { "left" });
        self.shared.set_cli_mode(active);
    }

    pub fn set_config_lock(&self, held: bool) {
        debug!("Config lock {}", if held { "held" } else { "released" });
        self.shared.set_config_lock(held);
    }

    /// Read the RC channels once; `None` if busy, gated or failed
    pub async fn read_rc_channels(&self) -> Option<Vec<u16>> {
        RcPoller::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            self.config.rc.clone(),
            self.shared.generation(),
        )
        .poll_once()
        .await
    }

    /// Override the RC channels; see [`CommandWriter::set_channels`]
    pub async fn write_rc_channels(&self, values: &[u16]) -> bool {
        self.writer.set_channels(values).await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disable_gps_push();
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::protocol::*;
    use crate::testing::{payloads, FakeFc};
    use std::time::Duration;

    fn healthy_fc() -> FakeFc {
        FakeFc::new()
            .respond(MSP_RX_MAP, vec![0, 1, 3, 2, 4, 5, 6, 7])
            .respond(MSP_BOXNAMES, payloads::box_names(&["ARM", "ANGLE"]))
            .respond(MSP_ATTITUDE, payloads::attitude(0, 0, 90))
            .respond(MSP_ALTITUDE, payloads::altitude(500, 0))
            .respond(MSP_ANALOG, payloads::analog(160, 100, 300))
            .respond(MSP_BATTERY_STATE, payloads::battery_state(4, 160, 100))
            .respond(MSP_STATUS_EX, payloads::status(0b11, 0))
            .respond(MSP_RAW_GPS, payloads::raw_gps(2, 10, 1.0, 2.0, 120))
            .respond(MSP_RC, payloads::rc(&[1500, 1500, 1500, 1200, 1000, 1000, 1000, 1000]))
    }

    fn controller(fc: &FakeFc) -> SessionController {
        SessionController::new(Arc::new(fc.clone()), Config::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_publishes_batches() {
        let fc = healthy_fc();
        let controller = controller(&fc);
        let mut rx = controller.subscribe();

        let generation = controller.start(10.0).unwrap();
        assert!(controller.is_running());

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.generation, generation);
        assert_eq!(batch.flight.unwrap().mode, "ANGLE");
        assert_eq!(fc.exchanged()[..2], [MSP_RX_MAP, MSP_BOXNAMES]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let controller = controller(&healthy_fc());
        let before = controller.generation();

        controller.stop();
        controller.stop();
        assert_eq!(controller.generation(), before);
        assert!(!controller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let fc = healthy_fc();
        let controller = controller(&fc);

        controller.start(10.0).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        controller.stop();
        assert!(!controller.is_running());

        // Let in-flight cycles drain
        tokio::time::sleep(Duration::from_millis(500)).await;
        let settled = fc.exchanged().len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fc.exchanged().len(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_unusable_rate() {
        let fc = healthy_fc();
        let controller = controller(&fc);
        let before = controller.generation();

        for rate in [0.0, -1.0, f32::NAN, 1000.0] {
            assert!(matches!(controller.start(rate), Err(FcLinkError::Validation(_))));
        }
        assert!(!controller.is_running());
        assert_eq!(controller.generation(), before);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fc.exchanged().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_rate_leaves_live_session_running() {
        let fc = healthy_fc();
        let controller = controller(&fc);
        let generation = controller.start(10.0).unwrap();

        assert!(controller.start(0.0).is_err());
        assert!(controller.is_running());
        assert_eq!(controller.generation(), generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_restarts() {
        let fc = healthy_fc();
        let controller = controller(&fc);

        let first = controller.start(10.0).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = controller.start(10.0).unwrap();
        assert!(second > first);
        assert!(controller.is_running());

        let mut rx = controller.subscribe();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut received = 0;
        while let Ok(batch) = rx.try_recv() {
            assert_eq!(batch.generation, second);
            received += 1;
        }
        assert!(received > 0);
        // A single scheduler remains: one poll per tick, not two
        assert!(received <= 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_push_enable_disable() {
        let fc = healthy_fc();
        let controller = controller(&fc);
        controller.update_position(PositionSample { latitude: 1.0, ..PositionSample::default() });

        controller.enable_gps_push();
        controller.enable_gps_push();
        assert!(controller.is_gps_push_enabled());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let pushed = fc.sent().len();
        // A second enable did not spawn a second pusher
        assert!((3..=4).contains(&pushed));

        controller.disable_gps_push();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fc.sent().len() <= pushed + 1);
        assert!(fc.sent().iter().all(|req| req.opcode == MSP2_SENSOR_GPS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rc_read_and_write() {
        let fc = healthy_fc();
        let controller = controller(&fc);

        let channels = controller.read_rc_channels().await.unwrap();
        assert_eq!(channels[3], 1200);

        assert!(controller.write_rc_channels(&[1500; 8]).await);
        assert!(!controller.write_rc_channels(&[1500; 4]).await);

        controller.set_cli_mode(true);
        assert!(controller.read_rc_channels().await.is_none());
        assert!(!controller.write_rc_channels(&[1500; 8]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_lock_gates_polling() {
        let fc = healthy_fc();
        let controller = controller(&fc);
        controller.set_config_lock(true);
        controller.start(10.0).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Bootstrap is not gated, polling is
        assert_eq!(fc.exchanged(), vec![MSP_RX_MAP, MSP_BOXNAMES]);
    }
}
