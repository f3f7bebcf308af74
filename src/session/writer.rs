//! Raw RC channel override.

use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::{debug, warn};

use super::SessionShared;
use crate::config::RcConfig;
use crate::msp::encoder::encode_set_raw_rc;
use crate::msp::protocol::{
    CommandRequest, MSP_SET_RAW_RC, RC_CHANNELS_MAX, RC_CHANNELS_MIN, RC_VALUE_MAX, RC_VALUE_MIN,
};
use crate::telemetry::decode::throttle_percent;
use crate::throttle::LogThrottle;
use crate::transport::MspTransport;

/// Validated, clamped one-shot writes of `MSP_SET_RAW_RC`
pub struct CommandWriter {
    transport: Arc<dyn MspTransport>,
    shared: Arc<SessionShared>,
    config: RcConfig,
    clamp_log: Mutex<LogThrottle>,
    failure_log: Mutex<LogThrottle>,
}

impl CommandWriter {
    pub fn new(
        transport: Arc<dyn MspTransport>,
        shared: Arc<SessionShared>,
        config: RcConfig,
    ) -> Self {
        let every = config.log_every;
        Self {
            transport,
            shared,
            config,
            clamp_log: Mutex::new(LogThrottle::new(every)),
            failure_log: Mutex::new(LogThrottle::new(every)),
        }
    }

    /// Override the RC channels.
    ///
    /// Rejects when the link is closed, CLI mode is active, or the channel
    /// count is outside 8..=16. Out-of-range values are clamped, not
    /// rejected. The commanded throttle is recorded before transmitting so
    /// the HUD reflects it even if the write fails. Never errors: any
    /// failure returns `false`.
    pub async fn set_channels(&self, values: &[u16]) -> bool {
        if !self.transport.is_open() {
            self.log_failure("link not open");
            return false;
        }
        if self.shared.is_cli_mode() {
            self.log_failure("CLI mode active");
            return false;
        }
        if !(RC_CHANNELS_MIN..=RC_CHANNELS_MAX).contains(&values.len()) {
            self.log_failure(&format!(
                "{} channels (need {}-{})",
                values.len(),
                RC_CHANNELS_MIN,
                RC_CHANNELS_MAX
            ));
            return false;
        }

        let channels = self.clamp(values);
        self.record_commanded_throttle(&channels);

        let request = CommandRequest::new(MSP_SET_RAW_RC, self.config.timeout())
            .with_payload(encode_set_raw_rc(&channels));
        match self.transport.send(&request).await {
            Ok(()) => true,
            Err(e) => {
                self.log_failure(&e.to_string());
                false
            }
        }
    }

    fn clamp(&self, values: &[u16]) -> Vec<u16> {
        let channels: Vec<u16> =
            values.iter().map(|v| (*v).clamp(RC_VALUE_MIN, RC_VALUE_MAX)).collect();
        if channels != values {
            let mut log = lock(&self.clamp_log);
            if log.should_log() {
                warn!("Clamped RC values {:?} to {:?}", values, channels);
            }
        }
        channels
    }

    fn record_commanded_throttle(&self, channels: &[u16]) {
        let now = Instant::now();
        self.shared.with_session(|session| {
            let index = session.channel_map.throttle_index();
            if let Some(&pulse) = channels.get(index) {
                let throttle = throttle_percent(pulse, RC_VALUE_MIN, RC_VALUE_MAX);
                session.commanded_throttle = Some((throttle, now));
            }
        });
    }

    fn log_failure(&self, reason: &str) {
        let mut log = lock(&self.failure_log);
        if log.should_log() {
            warn!("RC override rejected: {}", reason);
        } else {
            debug!("RC override rejected: {}", reason);
        }
    }
}

fn lock(throttle: &Mutex<LogThrottle>) -> std::sync::MutexGuard<'_, LogThrottle> {
    throttle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
