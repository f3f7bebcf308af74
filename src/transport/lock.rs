//! Mutual exclusion for the single serial link.

use tokio::sync::{Mutex, MutexGuard};

use crate::msp::decoder::MspParser;
use crate::serial::SerialPortIO;

/// Everything that must only be touched by the current lock holder
pub struct LinkState {
    /// Attached port, `None` while the link is closed
    pub port: Option<Box<dyn SerialPortIO>>,
    /// Receive-side parser; partial frames survive between holders
    pub parser: MspParser,
}

/// Guards the physical link.
///
/// At most one holder at a time. Waiters are served in arrival order
/// (`tokio::sync::Mutex` is fair), so a burst of writes cannot starve the
/// telemetry scheduler. Release happens when the [`TransportGuard`] drops,
/// which covers error paths and cancelled futures alike.
pub struct TransportLock {
    inner: Mutex<LinkState>,
}

/// Scoped ownership of the link
pub type TransportGuard<'a> = MutexGuard<'a, LinkState>;

impl TransportLock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LinkState { port: None, parser: MspParser::new() }),
        }
    }

    /// Wait for exclusive access to the link
    pub async fn acquire(&self) -> TransportGuard<'_> {
        self.inner.lock().await
    }

    /// Take the link only if nobody holds it
    pub fn try_acquire(&self) -> Option<TransportGuard<'_>> {
        self.inner.try_lock().ok()
    }
}

impl Default for TransportLock {
    fn default() -> Self {
        Self::new()
    }
}
