//! # Transport Module
//!
//! Serializes every producer onto the single half-duplex link.
//!
//! - [`lock::TransportLock`]: FIFO mutual exclusion over the port
//! - [`exchanger::Exchanger`]: request/response with timeouts
//! - [`MspTransport`]: the seam the scheduler, pollers and writer depend on

pub mod lock;
pub mod exchanger;

pub use exchanger::Exchanger;
pub use lock::{TransportGuard, TransportLock};

use async_trait::async_trait;

use crate::error::Result;
use crate::msp::protocol::CommandRequest;

/// Access to the flight controller link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MspTransport: Send + Sync {
    /// Whether a port is currently attached
    fn is_open(&self) -> bool;

    /// Send `request` and wait for the reply payload
    ///
    /// Resolves to `Timeout` if nothing matching arrives within
    /// `request.timeout`, `Protocol` for a malformed or rejected reply.
    async fn exchange(&self, request: &CommandRequest) -> Result<Vec<u8>>;

    /// Write `request` without waiting for a reply
    async fn send(&self, request: &CommandRequest) -> Result<()>;
}
