//! Daily wake schedule.
//!
//! Up to four heat-up times, keyed on hour of day.  Each fires at most
//! once per calendar day, and only while the wall clock is synced.  The
//! scheduler notifies a [`SchedulerDelegate`] when a wake time is reached;
//! the service turns that into a `ScheduleTrigger` on its next tick.
//!
//! ```text
//!  SystemClock ──(day, hour)──▶ Scheduler ──▶ SchedulerDelegate
//!                                               │
//!                                               ▼
//!                                   AppService: ScheduleTrigger
//!                                   (Idle / Sleep → Heating)
//! ```

use crate::app::ports::SchedulerDelegate;
use crate::config::{MAX_WAKE_TIMES, SystemConfig};
use log::{info, warn};

/// Synced wall-clock reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    /// Days since the epoch; distinguishes one morning from the next.
    pub day: u32,
    /// Hour of day, 0-23.
    pub hour: u8,
}

/// A single wake-up entry.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    /// Human-readable label (e.g., "Morning").
    pub label: &'static str,
    /// Hour of day (0-23) at which to heat up.
    pub hour: u8,
    pub enabled: bool,
}

const LABELS: [&str; MAX_WAKE_TIMES] = ["wake 1", "wake 2", "wake 3", "wake 4"];

#[derive(Debug, Clone, Copy)]
struct ScheduleEntry {
    schedule: Schedule,
    last_fired_day: Option<u32>,
}

pub struct Scheduler {
    schedules: [Option<ScheduleEntry>; MAX_WAKE_TIMES],
    /// Global enable flag.
    enabled: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: [None; MAX_WAKE_TIMES],
            enabled: true,
        }
    }

    /// One entry per configured wake hour.
    pub fn from_config(cfg: &SystemConfig) -> Self {
        let mut sched = Self::new();
        for (&hour, label) in cfg.wake_hours.iter().zip(LABELS) {
            if sched
                .add(Schedule {
                    label,
                    hour,
                    enabled: true,
                })
                .is_none()
            {
                warn!("Scheduler: ignoring wake hour {}", hour);
            }
        }
        sched
    }

    /// Add a schedule.  Returns the slot index, or `None` if full or the
    /// hour is not a valid hour of day.
    pub fn add(&mut self, schedule: Schedule) -> Option<usize> {
        if schedule.hour > 23 {
            return None;
        }
        let (i, slot) = self
            .schedules
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())?;
        info!(
            "Scheduler: added '{}' at {:02}:00 (slot {})",
            schedule.label, schedule.hour, i
        );
        *slot = Some(ScheduleEntry {
            schedule,
            last_fired_day: None,
        });
        Some(i)
    }

    /// Remove a schedule by slot index.
    pub fn remove(&mut self, slot: usize) {
        if let Some(entry) = self.schedules.get_mut(slot) {
            if let Some(e) = entry.take() {
                info!("Scheduler: removed '{}'", e.schedule.label);
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Check every entry against the wall clock.
    ///
    /// * `now`: `None` while the clock is not synced; nothing fires then.
    pub fn tick(&mut self, now: Option<WallTime>, delegate: &mut impl SchedulerDelegate) {
        let Some(now) = now else {
            return;
        };
        if !self.enabled {
            return;
        }
        for entry in self.schedules.iter_mut().flatten() {
            let s = entry.schedule;
            if s.enabled && s.hour == now.hour && entry.last_fired_day != Some(now.day) {
                entry.last_fired_day = Some(now.day);
                info!("Scheduler: '{}' fired", s.label);
                delegate.on_schedule_fired(s.label);
            }
        }
    }

    /// Number of enabled entries.
    pub fn active_count(&self) -> usize {
        self.schedules
            .iter()
            .flatten()
            .filter(|e| e.schedule.enabled)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test delegate that records fire events.
    struct RecordingDelegate {
        fires: Vec<String>,
    }

    impl RecordingDelegate {
        fn new() -> Self {
            Self { fires: Vec::new() }
        }
    }

    impl SchedulerDelegate for RecordingDelegate {
        fn on_schedule_fired(&mut self, label: &str) {
            self.fires.push(label.to_string());
        }
    }

    fn at(day: u32, hour: u8) -> Option<WallTime> {
        Some(WallTime { day, hour })
    }

    fn morning() -> Scheduler {
        let mut sched = Scheduler::new();
        sched.add(Schedule {
            label: "morning",
            hour: 7,
            enabled: true,
        });
        sched
    }

    #[test]
    fn fires_once_per_day() {
        let mut sched = morning();
        let mut delegate = RecordingDelegate::new();

        sched.tick(at(1, 6), &mut delegate);
        assert!(delegate.fires.is_empty());

        for _ in 0..100 {
            sched.tick(at(1, 7), &mut delegate);
        }
        assert_eq!(delegate.fires, vec!["morning".to_string()]);

        sched.tick(at(2, 7), &mut delegate);
        assert_eq!(delegate.fires.len(), 2);
    }

    #[test]
    fn unsynced_clock_never_fires() {
        let mut sched = morning();
        let mut delegate = RecordingDelegate::new();
        for _ in 0..10 {
            sched.tick(None, &mut delegate);
        }
        assert!(delegate.fires.is_empty());
    }

    #[test]
    fn capacity_is_four() {
        let mut sched = Scheduler::new();
        for hour in 0..4 {
            assert!(sched.add(Schedule {
                label: "x",
                hour,
                enabled: true
            })
            .is_some());
        }
        assert!(sched.add(Schedule {
            label: "x",
            hour: 5,
            enabled: true
        })
        .is_none());
        assert_eq!(sched.active_count(), 4);
    }

    #[test]
    fn invalid_hour_rejected() {
        let mut sched = Scheduler::new();
        assert!(sched.add(Schedule {
            label: "bad",
            hour: 24,
            enabled: true
        })
        .is_none());
    }

    #[test]
    fn from_config_builds_entries() {
        let mut cfg = SystemConfig::default();
        cfg.wake_hours.push(6).unwrap();
        cfg.wake_hours.push(17).unwrap();
        let sched = Scheduler::from_config(&cfg);
        assert_eq!(sched.active_count(), 2);
    }

    #[test]
    fn disabled_scheduler_does_nothing() {
        let mut sched = morning();
        let mut delegate = RecordingDelegate::new();
        sched.set_enabled(false);
        sched.tick(at(1, 7), &mut delegate);
        assert!(delegate.fires.is_empty());
    }
}
