//! One-time reference data fetch at session start.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ChannelMap, SessionShared};
use crate::config::BootstrapConfig;
use crate::msp::decoder::{decode_box_names, decode_rx_map};
use crate::msp::protocol::{CommandRequest, ProtocolVariant, MSP_BOXNAMES, MSP_RX_MAP};
use crate::transport::MspTransport;

/// Attempts for a retried request: one protocol variant per attempt, with a
/// fixed backoff between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub variants: Vec<ProtocolVariant>,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(variants: Vec<ProtocolVariant>, backoff: Duration) -> Self {
        Self { variants, backoff }
    }

    pub fn attempts(&self) -> usize {
        self.variants.len()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            variants: vec![ProtocolVariant::V2, ProtocolVariant::V2, ProtocolVariant::V1],
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&BootstrapConfig> for RetryPolicy {
    fn from(config: &BootstrapConfig) -> Self {
        Self::new(config.mode_name_variants.clone(), Duration::from_millis(config.retry_backoff_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Reference data loaded (or defaulted); pollers may start
    Ready,
    /// The session was stopped or restarted meanwhile
    Superseded,
}

/// Loads the RX channel map and mode-name table for one session generation
pub struct BootstrapSequencer {
    transport: Arc<dyn MspTransport>,
    shared: Arc<SessionShared>,
    policy: RetryPolicy,
    timeout: Duration,
    generation: u64,
}

impl BootstrapSequencer {
    pub fn new(
        transport: Arc<dyn MspTransport>,
        shared: Arc<SessionShared>,
        config: &BootstrapConfig,
        generation: u64,
    ) -> Self {
        Self {
            transport,
            shared,
            policy: RetryPolicy::from(config),
            timeout: Duration::from_millis(config.timeout_ms),
            generation,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch reference data; failures fall back to defaults and never abort
    pub async fn run(&self) -> BootstrapOutcome {
        self.load_channel_map().await;
        self.load_mode_names().await;

        if !self.shared.is_current(self.generation) {
            debug!("Bootstrap for generation {} superseded", self.generation);
            return BootstrapOutcome::Superseded;
        }
        BootstrapOutcome::Ready
    }

    async fn load_channel_map(&self) {
        let request = CommandRequest::new(MSP_RX_MAP, self.timeout);
        match self.transport.exchange(&request).await.and_then(|p| decode_rx_map(&p)) {
            Ok(map) => {
                debug!("RX map: {:?}", map);
                let map = ChannelMap::from_rx_map(map);
                self.shared.update_if_current(self.generation, |s| s.channel_map = map);
            }
            Err(e) => warn!("Could not read RX map, assuming AETR: {}", e),
        }
    }

    async fn load_mode_names(&self) {
        let attempts = self.policy.attempts();
        for (attempt, &variant) in self.policy.variants.iter().enumerate() {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff).await;
            }
            if !self.shared.is_current(self.generation) {
                return;
            }

            let request = CommandRequest::new(MSP_BOXNAMES, self.timeout).with_variant(variant);
            match self.transport.exchange(&request).await.and_then(|p| decode_box_names(&p)) {
                Ok(names) => {
                    info!("Loaded {} flight mode names", names.len());
                    self.shared.update_if_current(self.generation, |s| s.mode_names = names);
                    return;
                }
                Err(e) => debug!(
                    "Mode names attempt {}/{} ({:?}) failed: {}",
                    attempt + 1,
                    attempts,
                    variant,
                    e
                ),
            }
        }

        warn!("Could not load flight mode names after {} attempts", attempts);
        self.shared.update_if_current(self.generation, |s| s.mode_names.clear());
    }
}
