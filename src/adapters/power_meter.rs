//! Mains power meter over Modbus RTU (PZEM-004T v3 register map).
//!
//! [`ModbusPowerMeter`] runs a request/response cycle over any
//! [`Transport`] without ever waiting on the wire: each poll either sends
//! the read request, collects whatever bytes have arrived, or gives up
//! once the response timeout has passed.  The last good reading is served
//! until it is older than [`READING_MAX_AGE_MS`].
//!
//! ```text
//!   Idle ──(poll interval)──▶ request sent ──(25 bytes, CRC ok)──▶ Idle
//!                                  └──────(500 ms, no answer)────▶ Idle
//! ```
//!
//! [`SimPowerMeter`] stands in for the meter on host builds and in tests.

use heapless::Vec;
use log::{debug, info, warn};

use crate::app::ports::{PowerMeterPort, PowerReading};
use crate::rpc::transport::Transport;

/// PZEM general-purpose slave address.
pub const PZEM_ADDR: u8 = 0xF8;

const FC_READ_INPUT_REGS: u8 = 0x04;
const EXCEPTION_BIT: u8 = 0x80;
/// Voltage through the alarm status register.
const REGISTER_COUNT: u8 = 10;
/// addr, function, byte count, register data, CRC.
pub const RESPONSE_LEN: usize = 3 + 2 * REGISTER_COUNT as usize + 2;
const EXCEPTION_LEN: usize = 5;

const POLL_INTERVAL_MS: u64 = 1_000;
const RESPONSE_TIMEOUT_MS: u64 = 500;
/// A reading older than this is no longer reported.
pub const READING_MAX_AGE_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterError {
    Truncated,
    BadCrc,
    /// Wrong address, function code or byte count.
    BadHeader,
    /// The meter answered with a Modbus exception code.
    Exception(u8),
}

impl core::fmt::Display for MeterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated response"),
            Self::BadCrc => write!(f, "CRC mismatch"),
            Self::BadHeader => write!(f, "unexpected response header"),
            Self::Exception(code) => write!(f, "exception 0x{:02X}", code),
        }
    }
}

/// Modbus CRC-16: reflected polynomial 0xA001, initial value 0xFFFF.
pub fn modbus_crc16(data: &[u8]) -> u16 {
    let mut crc = 0xFFFF_u16;
    for &b in data {
        crc ^= u16::from(b);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

/// Read-input-registers request for the whole measurement block.
pub fn read_request(addr: u8) -> [u8; 8] {
    let mut req = [addr, FC_READ_INPUT_REGS, 0x00, 0x00, 0x00, REGISTER_COUNT, 0, 0];
    let crc = modbus_crc16(&req[..6]);
    req[6..].copy_from_slice(&crc.to_le_bytes());
    req
}

/// Decode one complete response frame from `addr`.
pub fn parse_response(addr: u8, frame: &[u8]) -> Result<PowerReading, MeterError> {
    if frame.len() < EXCEPTION_LEN {
        return Err(MeterError::Truncated);
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    if modbus_crc16(body) != u16::from_le_bytes([crc[0], crc[1]]) {
        return Err(MeterError::BadCrc);
    }
    if body[0] != addr {
        return Err(MeterError::BadHeader);
    }
    if body[1] == FC_READ_INPUT_REGS | EXCEPTION_BIT {
        return Err(MeterError::Exception(body[2]));
    }
    let data_len = 2 * usize::from(REGISTER_COUNT);
    if body[1] != FC_READ_INPUT_REGS || usize::from(body[2]) != data_len {
        return Err(MeterError::BadHeader);
    }
    if body.len() != 3 + data_len {
        return Err(MeterError::Truncated);
    }

    let reg = |i: usize| u16::from_be_bytes([body[3 + 2 * i], body[4 + 2 * i]]);
    // 32-bit quantities arrive low word first.
    let wide = |i: usize| u32::from(reg(i)) | (u32::from(reg(i + 1)) << 16);
    Ok(PowerReading {
        voltage_v: f32::from(reg(0)) * 0.1,
        current_a: wide(1) as f32 * 0.001,
        power_w: wide(3) as f32 * 0.1,
        energy_wh: wide(5),
        frequency_hz: f32::from(reg(7)) * 0.1,
        power_factor: f32::from(reg(8)) * 0.01,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle { next_at_ms: u64 },
    Awaiting { sent_at_ms: u64 },
}

/// Polls a Modbus meter over `T` once per [`POLL_INTERVAL_MS`].
pub struct ModbusPowerMeter<T: Transport> {
    link: T,
    addr: u8,
    phase: Phase,
    rx: Vec<u8, RESPONSE_LEN>,
    last: Option<(PowerReading, u64)>,
    online: bool,
}

impl<T: Transport> ModbusPowerMeter<T> {
    pub fn new(link: T, addr: u8) -> Self {
        Self {
            link,
            addr,
            phase: Phase::Idle { next_at_ms: 0 },
            rx: Vec::new(),
            last: None,
            online: false,
        }
    }

    /// The last exchange succeeded.
    pub fn is_online(&self) -> bool {
        self.online
    }

    fn send(&mut self, now_ms: u64) {
        // Discard anything left over from an abandoned exchange.
        let mut scratch = [0u8; RESPONSE_LEN];
        while matches!(self.link.read(&mut scratch), Ok(n) if n > 0) {}
        self.rx.clear();

        match self.link.write(&read_request(self.addr)) {
            Ok(_) => {
                let _ = self.link.flush();
                self.phase = Phase::Awaiting { sent_at_ms: now_ms };
            }
            Err(e) => {
                warn!("METER: request not sent: {:?}", e);
                self.phase = Phase::Idle {
                    next_at_ms: now_ms + POLL_INTERVAL_MS,
                };
            }
        }
    }

    fn receive(&mut self, now_ms: u64, sent_at_ms: u64) {
        let mut buf = [0u8; RESPONSE_LEN];
        let room = RESPONSE_LEN - self.rx.len();
        match self.link.read(&mut buf[..room]) {
            // `room` bounds the read, so the bytes always fit.
            Ok(n) => {
                let _ = self.rx.extend_from_slice(&buf[..n]);
            }
            Err(e) => debug!("METER: read failed: {:?}", e),
        }

        let is_exception = self.rx.len() >= EXCEPTION_LEN && self.rx[1] & EXCEPTION_BIT != 0;
        let complete = if is_exception {
            Some(&self.rx[..EXCEPTION_LEN])
        } else if self.rx.len() == RESPONSE_LEN {
            Some(&self.rx[..])
        } else {
            None
        };

        let next = Phase::Idle {
            next_at_ms: sent_at_ms + POLL_INTERVAL_MS,
        };
        match complete.map(|frame| parse_response(self.addr, frame)) {
            Some(Ok(reading)) => {
                if !self.online {
                    info!(
                        "METER: online ({:.1} V, {:.2} A)",
                        reading.voltage_v, reading.current_a
                    );
                }
                self.online = true;
                self.last = Some((reading, now_ms));
                self.phase = next;
            }
            Some(Err(e)) => {
                warn!("METER: {}", e);
                self.online = false;
                self.phase = next;
            }
            None if now_ms.saturating_sub(sent_at_ms) >= RESPONSE_TIMEOUT_MS => {
                if self.online {
                    warn!("METER: no response");
                }
                self.online = false;
                self.phase = next;
            }
            None => {}
        }
    }
}

impl<T: Transport> PowerMeterPort for ModbusPowerMeter<T> {
    fn poll(&mut self, now_ms: u64) -> Option<PowerReading> {
        match self.phase {
            Phase::Idle { next_at_ms } if now_ms >= next_at_ms => self.send(now_ms),
            Phase::Idle { .. } => {}
            Phase::Awaiting { sent_at_ms } => self.receive(now_ms, sent_at_ms),
        }
        self.last
            .filter(|&(_, at)| now_ms.saturating_sub(at) <= READING_MAX_AGE_MS)
            .map(|(reading, _)| reading)
    }
}

/// Meter whose reading the caller sets directly.
#[derive(Debug, Default)]
pub struct SimPowerMeter {
    reading: Option<PowerReading>,
}

impl SimPowerMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `reading` from now on; `None` simulates a silent meter.
    pub fn set(&mut self, reading: Option<PowerReading>) {
        self.reading = reading;
    }
}

impl PowerMeterPort for SimPowerMeter {
    fn poll(&mut self, _now_ms: u64) -> Option<PowerReading> {
        self.reading
    }
}
