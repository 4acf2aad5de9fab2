//! Alarm records and the fixed-capacity alarm table.
//!
//! ## Lifecycle
//!
//! 1. A monitor raises a code; a new record is created (or an existing
//!    one refreshed: duration grows, severity may only escalate).
//! 2. When the condition resolves the record goes inactive.
//! 3. Warning and Info records are removed on resolution.  Critical
//!    records stay until they are both resolved and acknowledged, in
//!    either order.
//!
//! The table is keyed by [`AlarmCode`]; a code never appears twice.

use core::fmt;

use log::{error, info, warn};

use crate::error::RejectReason;

/// Maximum simultaneously tracked alarms.
pub const ALARM_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warning = 1,
    Critical = 2,
}

/// Alarm identifiers.  The discriminant is the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlarmCode {
    BrewTempSensor = 0x10,
    SteamTempSensor = 0x11,
    BrewOverTemp = 0x20,
    SteamOverTemp = 0x21,
    WaterTankEmpty = 0x30,
    BoilerLevelLow = 0x31,
    PressureSensor = 0x40,
    OverPressure = 0x41,
    LinkDegraded = 0x50,
    OtaFailed = 0x60,
    StorageFault = 0x70,
    BackflushDue = 0x80,
    GroupCleanDue = 0x81,
    DescaleDue = 0x82,
    PowerOverBudget = 0x90,
}

impl AlarmCode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x10 => Self::BrewTempSensor,
            0x11 => Self::SteamTempSensor,
            0x20 => Self::BrewOverTemp,
            0x21 => Self::SteamOverTemp,
            0x30 => Self::WaterTankEmpty,
            0x31 => Self::BoilerLevelLow,
            0x40 => Self::PressureSensor,
            0x41 => Self::OverPressure,
            0x50 => Self::LinkDegraded,
            0x60 => Self::OtaFailed,
            0x70 => Self::StorageFault,
            0x80 => Self::BackflushDue,
            0x81 => Self::GroupCleanDue,
            0x82 => Self::DescaleDue,
            0x90 => Self::PowerOverBudget,
            _ => return None,
        })
    }
}

impl fmt::Display for AlarmCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BrewTempSensor => "brew temperature sensor",
            Self::SteamTempSensor => "steam temperature sensor",
            Self::BrewOverTemp => "brew boiler over temperature",
            Self::SteamOverTemp => "steam boiler over temperature",
            Self::WaterTankEmpty => "water tank empty",
            Self::BoilerLevelLow => "boiler level low",
            Self::PressureSensor => "pressure sensor",
            Self::OverPressure => "over pressure",
            Self::LinkDegraded => "hub link degraded",
            Self::OtaFailed => "firmware update failed",
            Self::StorageFault => "storage fault",
            Self::BackflushDue => "backflush due",
            Self::GroupCleanDue => "group clean due",
            Self::DescaleDue => "descale due",
            Self::PowerOverBudget => "mains current over budget",
        };
        write!(f, "{name} (0x{:02X})", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmRecord {
    pub code: AlarmCode,
    pub severity: Severity,
    pub active: bool,
    pub raised_at_ms: u64,
    pub duration_ms: u32,
    pub acknowledged: bool,
}

impl AlarmRecord {
    fn refresh_duration(&mut self, now_ms: u64) {
        self.duration_ms = now_ms.saturating_sub(self.raised_at_ms).min(u32::MAX as u64) as u32;
    }

    fn removable(&self) -> bool {
        !self.active && (self.severity != Severity::Critical || self.acknowledged)
    }
}

/// Fixed array of alarm slots keyed by code.
#[derive(Debug, Clone)]
pub struct AlarmTable {
    slots: [Option<AlarmRecord>; ALARM_CAPACITY],
}

impl AlarmTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; ALARM_CAPACITY],
        }
    }

    /// Raise `code`, or refresh it if already present.
    ///
    /// Returns the record when the hub should hear about it: on first
    /// raise, on reactivation, or when the severity escalates.
    pub fn raise(&mut self, code: AlarmCode, severity: Severity, now_ms: u64) -> Option<AlarmRecord> {
        if let Some(rec) = self.find_mut(code) {
            let mut notify = false;
            if !rec.active {
                rec.active = true;
                rec.acknowledged = false;
                rec.raised_at_ms = now_ms;
                notify = true;
            }
            if severity > rec.severity {
                rec.severity = severity;
                notify = true;
            }
            rec.refresh_duration(now_ms);
            if notify {
                warn!("ALARM RAISED: {} ({:?})", rec.code, rec.severity);
                return Some(*rec);
            }
            return None;
        }

        let record = AlarmRecord {
            code,
            severity,
            active: true,
            raised_at_ms: now_ms,
            duration_ms: 0,
            acknowledged: false,
        };
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(record);
                if severity == Severity::Critical {
                    error!("ALARM RAISED: {code} (Critical)");
                } else {
                    warn!("ALARM RAISED: {code} ({severity:?})");
                }
                Some(record)
            }
            None => {
                error!("Alarm table full, dropping {code}");
                None
            }
        }
    }

    /// Mark `code` resolved.  Returns the final record when it was active.
    pub fn resolve(&mut self, code: AlarmCode, now_ms: u64) -> Option<AlarmRecord> {
        let idx = self.index_of(code)?;
        let rec = self.slots[idx].as_mut()?;
        if !rec.active {
            return None;
        }
        rec.active = false;
        rec.refresh_duration(now_ms);
        let snapshot = *rec;
        info!("ALARM CLEARED: {} after {} ms", snapshot.code, snapshot.duration_ms);
        if snapshot.removable() {
            self.slots[idx] = None;
        }
        Some(snapshot)
    }

    /// Acknowledge `code`.  Unknown codes are rejected.
    pub fn acknowledge(&mut self, code: AlarmCode) -> Result<(), RejectReason> {
        let idx = self.index_of(code).ok_or(RejectReason::UnknownAlarm)?;
        if let Some(rec) = self.slots[idx].as_mut() {
            rec.acknowledged = true;
            info!("ALARM ACKNOWLEDGED: {}", rec.code);
            if rec.removable() {
                self.slots[idx] = None;
            }
        }
        Ok(())
    }

    /// True while any Critical record is still held (active or unacknowledged).
    pub fn critical_outstanding(&self) -> bool {
        self.iter().any(|r| r.severity == Severity::Critical)
    }

    pub fn is_active(&self, code: AlarmCode) -> bool {
        self.get(code).is_some_and(|r| r.active)
    }

    pub fn get(&self, code: AlarmCode) -> Option<&AlarmRecord> {
        self.iter().find(|r| r.code == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlarmRecord> {
        self.slots.iter().flatten()
    }

    pub fn active_codes(&self) -> impl Iterator<Item = AlarmCode> + '_ {
        self.iter().filter(|r| r.active).map(|r| r.code)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index_of(&self, code: AlarmCode) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.is_some_and(|r| r.code == code))
    }

    fn find_mut(&mut self, code: AlarmCode) -> Option<&mut AlarmRecord> {
        self.slots.iter_mut().flatten().find(|r| r.code == code)
    }
}

impl Default for AlarmTable {
    fn default() -> Self {
        Self::new()
    }
}
