//! Request/response over the shared link.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info};

use super::lock::{LinkState, TransportLock};
use super::MspTransport;
use crate::error::{FcLinkError, Result};
use crate::msp::encoder::encode_request;
use crate::msp::protocol::{CommandRequest, Direction};
use crate::serial::SerialPortIO;

/// Read chunk size; MSP responses are small
const READ_CHUNK: usize = 256;

/// Issues MSP requests on the link and waits for the matching reply.
///
/// Every interaction holds the [`TransportLock`] from the first written byte
/// until the reply (or timeout), so one logical request is never interleaved
/// with another producer's bytes. A request's timeout covers the wait for the
/// lock as well as the round trip. Replies are correlated by opcode; a late
/// reply to an earlier, timed-out request is discarded. There is no retry
/// here: each call site owns its retry policy.
pub struct Exchanger {
    lock: TransportLock,
    open: AtomicBool,
}

impl Exchanger {
    /// Create an exchanger with no port attached
    pub fn new() -> Self {
        Self {
            lock: TransportLock::new(),
            open: AtomicBool::new(false),
        }
    }

    /// Create an exchanger with `port` already attached
    pub fn with_port(port: Box<dyn SerialPortIO>) -> Self {
        let exchanger = Self::new();
        if let Some(mut link) = exchanger.lock.try_acquire() {
            link.port = Some(port);
            link.parser.reset();
            exchanger.open.store(true, Ordering::SeqCst);
        }
        exchanger
    }

    /// Attach a freshly opened port, replacing any previous one
    pub async fn attach(&self, port: Box<dyn SerialPortIO>) {
        let mut link = self.lock.acquire().await;
        link.port = Some(port);
        link.parser.reset();
        self.open.store(true, Ordering::SeqCst);
        info!("Transport attached");
    }

    /// Detach the port; in-flight and later requests fail with `NotOpen`
    pub async fn detach(&self) -> Option<Box<dyn SerialPortIO>> {
        self.open.store(false, Ordering::SeqCst);
        let mut link = self.lock.acquire().await;
        link.parser.reset();
        let port = link.port.take();
        if port.is_some() {
            info!("Transport detached");
        }
        port
    }

    async fn round_trip(link: &mut LinkState, frame: &[u8], opcode: u16) -> Result<Vec<u8>> {
        let LinkState { port, parser } = link;
        let port = port.as_mut().ok_or(FcLinkError::NotOpen)?;

        port.write_all(frame).await?;
        port.flush().await?;

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(next) = parser.next_frame() {
                let reply = next?;
                if reply.opcode != opcode {
                    debug!("Discarding stale reply for opcode {}", reply.opcode);
                    continue;
                }
                match reply.direction {
                    Direction::Response => return Ok(reply.payload),
                    Direction::Error => {
                        return Err(FcLinkError::Protocol(format!(
                            "flight controller rejected opcode {}",
                            opcode
                        )))
                    }
                    // Echo of our own request on a loopback adapter
                    Direction::Request => continue,
                }
            }

            let n = port.read(&mut chunk).await?;
            if n == 0 {
                return Err(FcLinkError::Protocol("link closed while awaiting reply".to_string()));
            }
            parser.feed(&chunk[..n]);
        }
    }
}

impl Default for Exchanger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MspTransport for Exchanger {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn exchange(&self, request: &CommandRequest) -> Result<Vec<u8>> {
        let frame = encode_request(request)?;
        // Queueing for the lock counts against the request's timeout
        let exchange = async {
            let mut link = self.lock.acquire().await;
            Self::round_trip(&mut link, &frame, request.opcode).await
        };

        match timeout(request.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(FcLinkError::Timeout {
                opcode: request.opcode,
                timeout: request.timeout,
            }),
        }
    }

    async fn send(&self, request: &CommandRequest) -> Result<()> {
        let frame = encode_request(request)?;
        let write = async {
            let mut link = self.lock.acquire().await;
            // The link may have closed while we queued for it
            let port = link.port.as_mut().ok_or(FcLinkError::NotOpen)?;
            port.write_all(&frame).await?;
            port.flush().await?;
            Ok::<(), FcLinkError>(())
        };
        match timeout(request.timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(FcLinkError::Timeout {
                opcode: request.opcode,
                timeout: request.timeout,
            }),
        }
    }
}
