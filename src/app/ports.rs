//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (sensors, actuators, event sinks, storage, firmware
//! staging) implement these traits.  The [`AppService`](super::service::AppService)
//! and the [`ControlLoop`](super::control_loop::ControlLoop) consume them via
//! generics, so the domain core never touches hardware directly.

use crate::config::SystemConfig;
use crate::control::boiler::BoilerId;
use crate::fsm::context::SensorSnapshot;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the domain calls this once per tick.
pub trait SensorPort {
    /// Sample every sensor and stamp fresh readings with `now_ms`.
    fn read_all(&mut self, now_ms: u64) -> SensorSnapshot;
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port: the domain calls this to command outputs.
pub trait ActuatorPort {
    /// Heater duty fraction `[0, 1]` for one boiler.
    fn set_heater(&mut self, id: BoilerId, duty: f32);

    /// Pump duty fraction `[0, 1]`; 0 stops the pump.
    fn set_pump(&mut self, duty: f32);

    /// Open or close the three-way brew valve.
    fn set_brew_valve(&mut self, open: bool);

    /// Heaters, pump and valve off.
    fn all_off(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Power meter port (driven adapter: mains meter → domain)
// ───────────────────────────────────────────────────────────────

/// One mains measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub voltage_v: f32,
    pub current_a: f32,
    pub power_w: f32,
    /// Energy imported since the meter was last reset.
    pub energy_wh: u32,
    pub frequency_hz: f32,
    pub power_factor: f32,
}

/// Mains power meter.  Polled once per tick; must never block.
pub trait PowerMeterPort {
    /// Latest valid reading, or `None` when no meter answered recently.
    fn poll(&mut self, now_ms: u64) -> Option<PowerReading>;
}

/// A machine built without a meter never has a reading.
impl<M: PowerMeterPort> PowerMeterPort for Option<M> {
    fn poll(&mut self, now_ms: u64) -> Option<PowerReading> {
        self.as_mut().and_then(|m| m.poll(now_ms))
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / hub link)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log,
/// outbound frame queue, both).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

/// Fan one event stream out to two sinks.
pub struct Tee<'a, A: EventSink, B: EventSink>(pub &'a mut A, pub &'a mut B);

impl<A: EventSink, B: EventSink> EventSink for Tee<'_, A, B> {
    fn emit(&mut self, event: &super::events::AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate before persisting and reject out-of-range
/// values with [`ConfigError::ValidationFailed`] rather than clamping.  A
/// ceiling above the firmware limit must never reach flash.
pub trait ConfigPort {
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Namespaced key/blob storage.
///
/// A single `write` need not survive power loss intact;
/// [`RecordStore`](crate::persist::RecordStore) layers atomic replacement
/// on top.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Firmware staging port (driven adapter: OTA → flash partition)
// ───────────────────────────────────────────────────────────────

/// Staging area for a firmware image.
///
/// Nothing written here becomes bootable until [`commit`](Self::commit);
/// [`abort`](Self::abort) discards whatever was staged.
pub trait FirmwarePort {
    /// Prepare to receive `image_size` bytes.
    fn begin(&mut self, image_size: u32) -> Result<(), FirmwareError>;

    /// Write `data` at byte `offset` of the staged image.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FirmwareError>;

    /// Mark the staged image as the next boot image.
    fn commit(&mut self) -> Result<(), FirmwareError>;

    /// Discard the staged image.
    fn abort(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples the wake schedule from the FSM)
// ───────────────────────────────────────────────────────────────

/// Callback the [`Scheduler`](crate::scheduler::Scheduler) invokes when a
/// wake-up time is reached.
pub trait SchedulerDelegate {
    /// * `label`: the human-readable label of the schedule that fired.
    fn on_schedule_fired(&mut self, label: &str);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    StorageFull,
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
}

/// Errors from [`FirmwarePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    /// No update partition is available.
    NoPartition,
    /// Image larger than the update partition.
    TooLarge,
    Write,
    Commit,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no update partition"),
            Self::TooLarge => write!(f, "image too large"),
            Self::Write => write!(f, "staging write failed"),
            Self::Commit => write!(f, "commit failed"),
        }
    }
}
