//! Shot counters and cleaning reminders.
//!
//! Counters increment when a counted shot finishes and reset only when the
//! hub reports the matching job done.  Each counter has a reminder
//! threshold; at or above it an Info alarm stays active.

use serde::{Deserialize, Serialize};

use crate::alarms::AlarmCode;
use crate::config::SystemConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceKind {
    Backflush,
    GroupClean,
    Descale,
}

impl MaintenanceKind {
    pub const ALL: [MaintenanceKind; 3] = [Self::Backflush, Self::GroupClean, Self::Descale];

    /// Reminder alarm raised when this job is due.
    pub const fn alarm(self) -> AlarmCode {
        match self {
            Self::Backflush => AlarmCode::BackflushDue,
            Self::GroupClean => AlarmCode::GroupCleanDue,
            Self::Descale => AlarmCode::DescaleDue,
        }
    }

    pub fn threshold(self, cfg: &SystemConfig) -> u32 {
        u32::from(match self {
            Self::Backflush => cfg.backflush_threshold,
            Self::GroupClean => cfg.group_clean_threshold,
            Self::Descale => cfg.descale_threshold,
        })
    }
}

/// Which counters a `MaintenanceDone` resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTarget {
    One(MaintenanceKind),
    All,
}

impl MaintenanceTarget {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::One(MaintenanceKind::Backflush),
            1 => Self::One(MaintenanceKind::GroupClean),
            2 => Self::One(MaintenanceKind::Descale),
            0xFF => Self::All,
            _ => return None,
        })
    }

    pub fn covers(self, kind: MaintenanceKind) -> bool {
        match self {
            Self::One(k) => k == kind,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaintenanceCounters {
    pub shots_since_backflush: u32,
    pub shots_since_group_clean: u32,
    pub shots_since_descale: u32,
}

impl MaintenanceCounters {
    /// Count one finished shot on every counter.
    pub fn record_shot(&mut self) {
        self.shots_since_backflush = self.shots_since_backflush.saturating_add(1);
        self.shots_since_group_clean = self.shots_since_group_clean.saturating_add(1);
        self.shots_since_descale = self.shots_since_descale.saturating_add(1);
    }

    pub fn reset(&mut self, target: MaintenanceTarget) {
        for kind in MaintenanceKind::ALL {
            if target.covers(kind) {
                *self.counter_mut(kind) = 0;
            }
        }
    }

    pub fn get(&self, kind: MaintenanceKind) -> u32 {
        match kind {
            MaintenanceKind::Backflush => self.shots_since_backflush,
            MaintenanceKind::GroupClean => self.shots_since_group_clean,
            MaintenanceKind::Descale => self.shots_since_descale,
        }
    }

    pub fn is_due(&self, kind: MaintenanceKind, cfg: &SystemConfig) -> bool {
        self.get(kind) >= kind.threshold(cfg)
    }

    fn counter_mut(&mut self, kind: MaintenanceKind) -> &mut u32 {
        match kind {
            MaintenanceKind::Backflush => &mut self.shots_since_backflush,
            MaintenanceKind::GroupClean => &mut self.shots_since_group_clean,
            MaintenanceKind::Descale => &mut self.shots_since_descale,
        }
    }
}
