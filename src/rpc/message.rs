//! Typed message catalogue for the hub link.
//!
//! [`InboundMessage::decode`] turns a CRC-checked [`Frame`] into a typed
//! command; [`OutboundMessage::encode`] does the reverse for responses and
//! telemetry.  Multi-byte fields are little-endian, temperatures travel
//! as signed deci-degrees and pressure as centibar.

use heapless::Vec;

use crate::alarms::AlarmRecord;
use crate::app::events::StatusReport;
use crate::config::PidGains;
use crate::control::boiler::BoilerId;
use crate::error::{LinkError, RejectReason};
use crate::fsm::StopReason;
use crate::fsm::context::BrewSummary;
use crate::rpc::codec::{Frame, MAX_PAYLOAD};

/// Largest OTA data slice per chunk frame (payload minus seq and offset).
pub const OTA_CHUNK_MAX: usize = 224;

/// Wire type codes.
pub mod msg_type {
    pub const SET_SETPOINT: u8 = 0x01;
    pub const START_BREW: u8 = 0x02;
    pub const STOP_BREW: u8 = 0x03;
    pub const START_STEAM: u8 = 0x04;
    pub const STOP_STEAM: u8 = 0x05;
    pub const REQUEST_STATUS: u8 = 0x06;
    pub const ALARM_ACK: u8 = 0x07;
    pub const POWER_ON: u8 = 0x08;
    pub const POWER_OFF: u8 = 0x09;
    pub const WAKE: u8 = 0x0A;
    pub const START_BACKFLUSH: u8 = 0x0B;
    pub const STOP_BACKFLUSH: u8 = 0x0C;
    pub const MAINTENANCE_DONE: u8 = 0x0D;
    pub const SET_PID_GAINS: u8 = 0x0E;
    pub const OTA_BEGIN: u8 = 0x20;
    pub const OTA_CHUNK: u8 = 0x21;
    pub const OTA_COMPLETE: u8 = 0x22;
    pub const OTA_ABORT: u8 = 0x23;

    pub const ACK: u8 = 0x80;
    pub const REJECTED: u8 = 0x81;
    pub const UNSUPPORTED: u8 = 0x82;
    pub const STATUS: u8 = 0x83;
    pub const BREW_COMPLETED: u8 = 0x84;
    pub const ALARM: u8 = 0x85;
    pub const OTA_PROGRESS: u8 = 0x86;
}

/// Temperature sentinel for "no valid reading".
pub const TEMP_INVALID_DECI: i16 = i16::MIN;
/// Pressure sentinel for "no valid reading".
pub const PRESSURE_INVALID_CBAR: u16 = u16::MAX;
/// Mains fields sentinel when no meter reading is available.
pub const POWER_INVALID: u16 = u16::MAX;

// ---------------------------------------------------------------------------
// Unit conversion
// ---------------------------------------------------------------------------

pub fn celsius_to_deci(c: f32) -> i16 {
    (c * 10.0).round().clamp(f32::from(i16::MIN + 1), f32::from(i16::MAX)) as i16
}

pub fn deci_to_celsius(deci: i16) -> f32 {
    f32::from(deci) / 10.0
}

pub fn bar_to_cbar(bar: f32) -> u16 {
    (bar * 100.0).round().clamp(0.0, f32::from(u16::MAX - 1)) as u16
}

fn saturate_u16(v: u32) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

/// Scale a non-negative quantity into a u16, keeping `u16::MAX` free.
fn scaled_u16(v: f32, scale: f32) -> u16 {
    (v * scale).round().clamp(0.0, f32::from(u16::MAX - 1)) as u16
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Commands from the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SetSetpoint { boiler: BoilerId, deci_c: i16 },
    StartBrew,
    StopBrew(StopReason),
    StartSteam,
    StopSteam,
    RequestStatus,
    /// Raw code; unknown codes are rejected by the dispatcher.
    AlarmAck(u8),
    PowerOn,
    PowerOff,
    Wake,
    StartBackflush,
    StopBackflush,
    /// Raw kind; 0xFF resets every counter.
    MaintenanceDone(u8),
    SetPidGains { boiler: BoilerId, gains: PidGains },
    OtaBegin { image_size: u32 },
    OtaChunk { seq: u16, offset: u32, data: Vec<u8, OTA_CHUNK_MAX> },
    OtaComplete { sha256: [u8; 32] },
    OtaAbort,
}

/// Little-endian cursor over a payload.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LinkError> {
        if self.buf.len() < n {
            return Err(LinkError::Malformed);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], LinkError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, LinkError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, LinkError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, LinkError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, LinkError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, LinkError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn rest(&mut self) -> &'a [u8] {
        core::mem::take(&mut self.buf)
    }

    /// Fixed-size messages must not carry trailing bytes.
    fn finish(&self) -> Result<(), LinkError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(LinkError::Malformed)
        }
    }
}

impl InboundMessage {
    /// Decode a frame.  Unknown types yield [`LinkError::UnsupportedType`];
    /// payloads of the wrong shape yield [`LinkError::Malformed`].
    pub fn decode(frame: &Frame) -> Result<Self, LinkError> {
        use msg_type as t;

        let mut r = Reader::new(&frame.payload);
        let msg = match frame.msg_type {
            t::SET_SETPOINT => Self::SetSetpoint {
                boiler: BoilerId(r.u8()?),
                deci_c: r.i16()?,
            },
            t::START_BREW => Self::StartBrew,
            t::STOP_BREW => Self::StopBrew(match r.u8()? {
                0 => StopReason::User,
                1 => StopReason::TargetWeight,
                2 => StopReason::HubTimeout,
                _ => return Err(LinkError::Malformed),
            }),
            t::START_STEAM => Self::StartSteam,
            t::STOP_STEAM => Self::StopSteam,
            t::REQUEST_STATUS => Self::RequestStatus,
            t::ALARM_ACK => Self::AlarmAck(r.u8()?),
            t::POWER_ON => Self::PowerOn,
            t::POWER_OFF => Self::PowerOff,
            t::WAKE => Self::Wake,
            t::START_BACKFLUSH => Self::StartBackflush,
            t::STOP_BACKFLUSH => Self::StopBackflush,
            t::MAINTENANCE_DONE => Self::MaintenanceDone(r.u8()?),
            t::SET_PID_GAINS => Self::SetPidGains {
                boiler: BoilerId(r.u8()?),
                gains: PidGains {
                    kp: r.f32()?,
                    ki: r.f32()?,
                    kd: r.f32()?,
                },
            },
            t::OTA_BEGIN => Self::OtaBegin {
                image_size: r.u32()?,
            },
            t::OTA_CHUNK => {
                let seq = r.u16()?;
                let offset = r.u32()?;
                let data = Vec::from_slice(r.rest()).map_err(|()| LinkError::Malformed)?;
                Self::OtaChunk { seq, offset, data }
            }
            t::OTA_COMPLETE => Self::OtaComplete { sha256: r.array()? },
            t::OTA_ABORT => Self::OtaAbort,
            other => return Err(LinkError::UnsupportedType(other)),
        };
        r.finish()?;
        Ok(msg)
    }

    /// Encode to a frame (the hub's side of the link; used by tests and
    /// the fuzz harness).
    pub fn encode(&self) -> Result<Frame, LinkError> {
        use msg_type as t;

        let mut w = Writer::default();
        let ty = match self {
            Self::SetSetpoint { boiler, deci_c } => {
                w.u8(boiler.0)?;
                w.i16(*deci_c)?;
                t::SET_SETPOINT
            }
            Self::StartBrew => t::START_BREW,
            Self::StopBrew(reason) => {
                w.u8(match reason {
                    StopReason::User => 0,
                    StopReason::TargetWeight => 1,
                    StopReason::HubTimeout => 2,
                })?;
                t::STOP_BREW
            }
            Self::StartSteam => t::START_STEAM,
            Self::StopSteam => t::STOP_STEAM,
            Self::RequestStatus => t::REQUEST_STATUS,
            Self::AlarmAck(code) => {
                w.u8(*code)?;
                t::ALARM_ACK
            }
            Self::PowerOn => t::POWER_ON,
            Self::PowerOff => t::POWER_OFF,
            Self::Wake => t::WAKE,
            Self::StartBackflush => t::START_BACKFLUSH,
            Self::StopBackflush => t::STOP_BACKFLUSH,
            Self::MaintenanceDone(kind) => {
                w.u8(*kind)?;
                t::MAINTENANCE_DONE
            }
            Self::SetPidGains { boiler, gains } => {
                w.u8(boiler.0)?;
                w.f32(gains.kp)?;
                w.f32(gains.ki)?;
                w.f32(gains.kd)?;
                t::SET_PID_GAINS
            }
            Self::OtaBegin { image_size } => {
                w.u32(*image_size)?;
                t::OTA_BEGIN
            }
            Self::OtaChunk { seq, offset, data } => {
                w.u16(*seq)?;
                w.u32(*offset)?;
                w.bytes(data)?;
                t::OTA_CHUNK
            }
            Self::OtaComplete { sha256 } => {
                w.bytes(sha256)?;
                t::OTA_COMPLETE
            }
            Self::OtaAbort => t::OTA_ABORT,
        };
        Ok(Frame {
            msg_type: ty,
            payload: w.buf,
        })
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Responses and telemetry to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Ack { ref_type: u8 },
    Rejected { ref_type: u8, reason: RejectReason },
    Unsupported { ref_type: u8 },
    Status(StatusReport),
    BrewCompleted(BrewSummary),
    Alarm(AlarmRecord),
    OtaProgress { next_seq: u16, bytes_received: u32 },
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8, MAX_PAYLOAD>,
}

impl Writer {
    fn bytes(&mut self, b: &[u8]) -> Result<(), LinkError> {
        self.buf.extend_from_slice(b).map_err(|()| LinkError::Oversize)
    }

    fn u8(&mut self, v: u8) -> Result<(), LinkError> {
        self.bytes(&[v])
    }

    fn u16(&mut self, v: u16) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn i16(&mut self, v: i16) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn u32(&mut self, v: u32) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn f32(&mut self, v: f32) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }
}

/// Status flag bits.
pub mod status_flags {
    pub const TANK_OK: u8 = 1 << 0;
    pub const LEVEL_OK: u8 = 1 << 1;
    pub const BACKFLUSH_DUE: u8 = 1 << 2;
    pub const GROUP_CLEAN_DUE: u8 = 1 << 3;
    pub const DESCALE_DUE: u8 = 1 << 4;
    pub const OTA_ACTIVE: u8 = 1 << 5;
}

impl OutboundMessage {
    pub fn msg_type(&self) -> u8 {
        use msg_type as t;
        match self {
            Self::Ack { .. } => t::ACK,
            Self::Rejected { .. } => t::REJECTED,
            Self::Unsupported { .. } => t::UNSUPPORTED,
            Self::Status(_) => t::STATUS,
            Self::BrewCompleted(_) => t::BREW_COMPLETED,
            Self::Alarm(_) => t::ALARM,
            Self::OtaProgress { .. } => t::OTA_PROGRESS,
        }
    }

    /// Alarms jump the outbound queue.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::Alarm(_))
    }

    pub fn encode(&self) -> Result<Frame, LinkError> {
        let mut w = Writer::default();
        match self {
            Self::Ack { ref_type } | Self::Unsupported { ref_type } => w.u8(*ref_type)?,
            Self::Rejected { ref_type, reason } => {
                w.u8(*ref_type)?;
                w.u8(reason.code())?;
            }
            Self::Status(report) => encode_status(&mut w, report)?,
            Self::BrewCompleted(b) => {
                w.u32(b.duration_ms)?;
                w.u16(bar_to_cbar(b.peak_pressure_bar))?;
                w.i16(celsius_to_deci(b.peak_temp_c))?;
                w.u16((b.volume_ml.max(0.0).round() as u32).min(u32::from(u16::MAX)) as u16)?;
            }
            Self::Alarm(a) => {
                w.u8(a.code.code())?;
                w.u8(a.severity as u8)?;
                w.u8(u8::from(a.active))?;
                w.u32(a.duration_ms)?;
            }
            Self::OtaProgress {
                next_seq,
                bytes_received,
            } => {
                w.u16(*next_seq)?;
                w.u32(*bytes_received)?;
            }
        }
        Ok(Frame {
            msg_type: self.msg_type(),
            payload: w.buf,
        })
    }
}

fn encode_status(w: &mut Writer, s: &StatusReport) -> Result<(), LinkError> {
    use status_flags as f;

    w.u8(s.state.code())?;
    w.u8(s.boilers.len() as u8)?;
    for b in &s.boilers {
        w.u8(b.id.0)?;
        w.i16(b.temp_c.map_or(TEMP_INVALID_DECI, celsius_to_deci))?;
        w.i16(celsius_to_deci(b.setpoint_c))?;
        w.u8((b.duty.clamp(0.0, 1.0) * 100.0).round() as u8)?;
    }
    w.u16(s.pressure_bar.map_or(PRESSURE_INVALID_CBAR, bar_to_cbar))?;

    let mut flags = 0u8;
    for (set, bit) in [
        (s.tank_ok, f::TANK_OK),
        (s.level_ok, f::LEVEL_OK),
        (s.backflush_due, f::BACKFLUSH_DUE),
        (s.group_clean_due, f::GROUP_CLEAN_DUE),
        (s.descale_due, f::DESCALE_DUE),
        (s.ota_active, f::OTA_ACTIVE),
    ] {
        if set {
            flags |= bit;
        }
    }
    w.u8(flags)?;

    w.u16(saturate_u16(s.counters.shots_since_backflush))?;
    w.u16(saturate_u16(s.counters.shots_since_group_clean))?;
    w.u16(saturate_u16(s.counters.shots_since_descale))?;

    match s.power {
        Some(p) => {
            w.u16(scaled_u16(p.voltage_v, 10.0))?;
            w.u16(scaled_u16(p.current_a, 1000.0))?;
            w.u16(scaled_u16(p.power_w, 1.0))?;
        }
        None => {
            for _ in 0..3 {
                w.u16(POWER_INVALID)?;
            }
        }
    }

    w.u8(s.active_alarms.len() as u8)?;
    for code in &s.active_alarms {
        w.u8(code.code())?;
    }
    Ok(())
}
