//! Scripted flight controller for multi-request tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BufMut;

use crate::error::{FcLinkError, Result};
use crate::msp::protocol::{CommandRequest, ProtocolVariant};
use crate::transport::MspTransport;

/// How the fake answers one opcode
#[derive(Debug, Clone)]
pub enum Reply {
    Payload(Vec<u8>),
    /// Wait out the request's timeout, then fail with `Timeout`
    Timeout,
    /// Never answer and ignore the timeout
    Hang,
    /// MSP error-direction reply
    Rejected,
}

#[derive(Default)]
struct Script {
    replies: HashMap<u16, Reply>,
    /// Remaining forced timeouts per opcode before the scripted reply applies
    fail_first: HashMap<u16, usize>,
    delays: HashMap<u16, Duration>,
    exchanges: Vec<(u16, ProtocolVariant)>,
    sends: Vec<CommandRequest>,
}

/// In-memory [`MspTransport`] with per-opcode canned replies.
///
/// Unscripted opcodes time out. Cloning shares the script and the call log.
#[derive(Clone)]
pub struct FakeFc {
    script: Arc<Mutex<Script>>,
    open: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeFc {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            open: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reply(self, opcode: u16, reply: Reply) -> Self {
        self.script.lock().unwrap().replies.insert(opcode, reply);
        self
    }

    pub fn respond(self, opcode: u16, payload: Vec<u8>) -> Self {
        self.reply(opcode, Reply::Payload(payload))
    }

    /// Time out the first `count` requests for `opcode`
    pub fn fail_first(self, opcode: u16, count: usize) -> Self {
        self.script.lock().unwrap().fail_first.insert(opcode, count);
        self
    }

    /// Take `delay` before answering `opcode`
    pub fn delay(self, opcode: u16, delay: Duration) -> Self {
        self.script.lock().unwrap().delays.insert(opcode, delay);
        self
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Opcodes exchanged, in order
    pub fn exchanged(&self) -> Vec<u16> {
        self.script.lock().unwrap().exchanges.iter().map(|(op, _)| *op).collect()
    }

    pub fn exchanged_with_variant(&self) -> Vec<(u16, ProtocolVariant)> {
        self.script.lock().unwrap().exchanges.clone()
    }

    pub fn exchange_count(&self, opcode: u16) -> usize {
        self.exchanged().iter().filter(|&&op| op == opcode).count()
    }

    pub fn sent(&self) -> Vec<CommandRequest> {
        self.script.lock().unwrap().sends.clone()
    }

    /// Highest number of requests observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &CommandRequest) -> (Reply, Option<Duration>) {
        let mut script = self.script.lock().unwrap();
        script.exchanges.push((request.opcode, request.variant));
        let delay = script.delays.get(&request.opcode).copied();
        if let Some(remaining) = script.fail_first.get_mut(&request.opcode) {
            if *remaining > 0 {
                *remaining -= 1;
                return (Reply::Timeout, delay);
            }
        }
        let reply = script.replies.get(&request.opcode).cloned().unwrap_or(Reply::Timeout);
        (reply, delay)
    }
}

impl Default for FakeFc {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MspTransport for FakeFc {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn exchange(&self, request: &CommandRequest) -> Result<Vec<u8>> {
        if !self.is_open() {
            return Err(FcLinkError::NotOpen);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let (reply, delay) = self.next_reply(request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Reply::Payload(payload) => Ok(payload),
            Reply::Timeout => {
                tokio::time::sleep(request.timeout).await;
                Err(FcLinkError::Timeout { opcode: request.opcode, timeout: request.timeout })
            }
            Reply::Hang => std::future::pending().await,
            Reply::Rejected => Err(FcLinkError::Protocol(format!(
                "flight controller rejected opcode {}",
                request.opcode
            ))),
        }
    }

    async fn send(&self, request: &CommandRequest) -> Result<()> {
        if !self.is_open() {
            return Err(FcLinkError::NotOpen);
        }
        self.script.lock().unwrap().sends.push(request.clone());
        Ok(())
    }
}

/// Canned reply payloads
pub mod payloads {
    use super::*;

    pub fn attitude(roll_decideg: i16, pitch_decideg: i16, yaw_deg: i16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_i16_le(roll_decideg);
        buf.put_i16_le(pitch_decideg);
        buf.put_i16_le(yaw_deg);
        buf
    }

    pub fn altitude(altitude_cm: i32, vario_cms: i16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_i32_le(altitude_cm);
        buf.put_i16_le(vario_cms);
        buf
    }

    /// Legacy layout only: decivolts, mAh, rssi, centiamps
    pub fn analog(decivolts: u8, mah_drawn: u16, amperage_ca: i16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(decivolts);
        buf.put_u16_le(mah_drawn);
        buf.put_u16_le(0);
        buf.put_i16_le(amperage_ca);
        buf
    }

    pub fn battery_state(cell_count: u8, decivolts: u8, mah_drawn: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(cell_count);
        buf.put_u16_le(1500);
        buf.put_u8(decivolts);
        buf.put_u16_le(mah_drawn);
        buf.put_u16_le(0);
        buf.put_u8(0);
        buf.put_u16_le(decivolts as u16 * 10);
        buf
    }

    /// Status without the extended arming-disable section
    pub fn status(mode_flags: u32, sensors: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u16_le(125);
        buf.put_u16_le(0);
        buf.put_u16_le(sensors);
        buf.put_u32_le(mode_flags);
        buf.put_u8(0);
        buf
    }

    /// Status including cpu load and arming-disable flags
    pub fn status_ex(mode_flags: u32, arming_disable_flags: u32) -> Vec<u8> {
        let mut buf = status(mode_flags, 0b1111);
        buf.put_u16_le(20); // cpu load
        buf.put_u8(3); // profile count
        buf.put_u8(0); // rate profile
        buf.put_u8(0); // extended mode flag bytes
        buf.put_u8(26); // arming disable flag count
        buf.put_u32_le(arming_disable_flags);
        buf
    }

    pub fn raw_gps(fix_type: u8, satellites: u8, lat: f64, lon: f64, hdop_centi: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(fix_type);
        buf.put_u8(satellites);
        buf.put_i32_le((lat * 10_000_000.0).round() as i32);
        buf.put_i32_le((lon * 10_000_000.0).round() as i32);
        buf.put_u16_le(120); // altitude m
        buf.put_u16_le(500); // ground speed cm/s
        buf.put_u16_le(900); // course decidegrees
        buf.put_u16_le(hdop_centi);
        buf
    }

    pub fn rc(channels: &[u16]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &value in channels {
            buf.put_u16_le(value);
        }
        buf
    }

    pub fn box_names(names: &[&str]) -> Vec<u8> {
        let mut text = names.join(";");
        text.push(';');
        text.into_bytes()
    }
}
