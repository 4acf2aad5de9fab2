//! Unified error types for the crema firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! dispatcher and control loop handle failures uniformly.  All variants
//! are `Copy` so they pass through the tick path without allocation.

use core::fmt;

pub use crate::rpc::ota::OtaError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sensor could not be read or returned implausible data.
    Sensor(SensorError),
    /// Bad CRC, malformed frame, or unknown message type on the link.
    Link(LinkError),
    /// A command was refused; the machine state is unchanged.
    Rejected(RejectReason),
    /// A firmware update failed and was aborted.
    Ota(OtaError),
    /// Persistent storage could not be read or written.
    Storage(PersistError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Rejected(e) => write!(f, "rejected: {e}"),
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// ADC read returned an error or timed out.
    AdcReadFailed,
    /// Thermistor reads as open circuit.
    OpenCircuit,
    /// Thermistor reads as short circuit.
    ShortCircuit,
    /// Reading is outside the physically plausible range.
    OutOfRange,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdcReadFailed => write!(f, "ADC read failed"),
            Self::OpenCircuit => write!(f, "open circuit"),
            Self::ShortCircuit => write!(f, "short circuit"),
            Self::OutOfRange => write!(f, "reading out of range"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Frame checksum did not match.
    BadCrc,
    /// Declared length exceeds the maximum payload.
    Oversize,
    /// Payload length does not fit the message type.
    Malformed,
    /// Message type is not known to this firmware.
    UnsupportedType(u8),
    /// Outbound queue is full.
    QueueFull,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadCrc => write!(f, "CRC mismatch"),
            Self::Oversize => write!(f, "frame too long"),
            Self::Malformed => write!(f, "malformed payload"),
            Self::UnsupportedType(t) => write!(f, "unsupported message type 0x{t:02X}"),
            Self::QueueFull => write!(f, "outbound queue full"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Command rejection reasons (wire codes)
// ---------------------------------------------------------------------------

/// Why a command was refused.  The discriminant is the wire code carried
/// in the `Rejected` response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    InvalidState = 1,
    Malformed = 2,
    OutOfRange = 3,
    UnknownBoiler = 4,
    UnknownAlarm = 5,
    OtaSequence = 6,
    OtaChecksum = 7,
    OtaNotActive = 8,
    OtaBusy = 9,
    Interlock = 10,
    Storage = 11,
}

impl RejectReason {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => write!(f, "not allowed in current state"),
            Self::Malformed => write!(f, "malformed payload"),
            Self::OutOfRange => write!(f, "value out of range"),
            Self::UnknownBoiler => write!(f, "unknown boiler"),
            Self::UnknownAlarm => write!(f, "unknown alarm code"),
            Self::OtaSequence => write!(f, "OTA chunk out of sequence"),
            Self::OtaChecksum => write!(f, "OTA checksum mismatch"),
            Self::OtaNotActive => write!(f, "no OTA transfer active"),
            Self::OtaBusy => write!(f, "OTA transfer already active"),
            Self::Interlock => write!(f, "safety interlock"),
            Self::Storage => write!(f, "storage failure"),
        }
    }
}

impl From<RejectReason> for Error {
    fn from(e: RejectReason) -> Self {
        Self::Rejected(e)
    }
}

impl From<OtaError> for Error {
    fn from(e: OtaError) -> Self {
        Self::Ota(e)
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistError {
    /// Record does not fit the slot buffer.
    Encode,
    /// Slot payload failed to deserialize.
    Decode,
    /// Backing store rejected the read or write.
    Io,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => write!(f, "record encode failed"),
            Self::Decode => write!(f, "record decode failed"),
            Self::Io => write!(f, "storage I/O error"),
        }
    }
}

impl From<PersistError> for Error {
    fn from(e: PersistError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
