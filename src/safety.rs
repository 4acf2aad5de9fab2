//! Safety monitor.
//!
//! Runs **every tick before the FSM**, independently of it.  It checks
//! each boiler probe for plausibility and staleness, enforces absolute
//! temperature ceilings, the water interlocks and the pressure limits,
//! and keeps the [`AlarmTable`] in step with what it finds.
//!
//! ## Critical path
//!
//! When any Critical condition is present the monitor zeroes every
//! channel's heater duty *and* drives every heater output to 0 through
//! the [`ActuatorPort`] before returning.  The service then forces the
//! FSM into `Alarm`.  Nothing later in the tick can re-energise a heater
//! while a Critical alarm is outstanding.

use log::{error, info};

use crate::alarms::{AlarmCode, AlarmTable, Severity};
use crate::app::events::AppEvent;
use crate::app::ports::{ActuatorPort, EventSink};
use crate::config::SystemConfig;
use crate::control::boiler::{BoilerRole, Boilers, FAULT_OVER_TEMP, FAULT_SENSOR, MAX_BOILERS};
use crate::fsm::context::{Sample, SensorSnapshot};

/// Plausible boiler probe range (°C).
pub const TEMP_PLAUSIBLE_MIN_C: f32 = -10.0;
pub const TEMP_PLAUSIBLE_MAX_C: f32 = 200.0;
/// An over-temperature clears this far below the ceiling.
pub const OVER_TEMP_HYSTERESIS_C: f32 = 5.0;

/// Plausible pressure transducer range (bar).
pub const PRESSURE_PLAUSIBLE_MIN_BAR: f32 = -0.5;
pub const PRESSURE_PLAUSIBLE_MAX_BAR: f32 = 16.0;
/// Hard pressure ceiling, independent of configuration.
pub const FIRMWARE_MAX_PRESSURE_BAR: f32 = 15.0;

/// Finite and inside the probe's physical range.
pub fn plausible_temp(celsius: f32) -> bool {
    celsius.is_finite() && (TEMP_PLAUSIBLE_MIN_C..=TEMP_PLAUSIBLE_MAX_C).contains(&celsius)
}

/// A probe sample the controllers may act on.
pub fn usable_sample(sample: Option<Sample>, now_ms: u64, stale_ms: u32) -> Option<f32> {
    sample
        .filter(|s| plausible_temp(s.value) && s.age_ms(now_ms) <= u64::from(stale_ms))
        .map(|s| s.value)
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyVerdict {
    /// A Critical condition is present this tick.
    pub critical: bool,
    /// Level interlocks allow heating.
    pub heating_permitted: bool,
    /// Water available for brewing.
    pub water_ok: bool,
}

/// Safety monitor.
pub struct SafetyMonitor {
    /// Latched over-temperature per channel (hysteresis).
    over_temp: [bool; MAX_BOILERS],
    over_pressure: bool,
    /// Whether the last evaluation already performed the cutoff.
    cut_off: bool,
}

impl SafetyMonitor {
    pub const fn new() -> Self {
        Self {
            over_temp: [false; MAX_BOILERS],
            over_pressure: false,
            cut_off: false,
        }
    }

    /// Evaluate every safety condition against `snap`.
    pub fn evaluate(
        &mut self,
        snap: &SensorSnapshot,
        boilers: &mut Boilers,
        cfg: &SystemConfig,
        alarms: &mut AlarmTable,
        hw: &mut impl ActuatorPort,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> SafetyVerdict {
        let mut critical = false;

        // ── Boiler probes and ceilings ────────────────────────────
        for ch in boilers.iter_mut() {
            let idx = ch.id.0 as usize;
            let (sensor_code, over_code) = alarm_codes(ch.role);
            let sample = snap.boiler_temp(ch.id);
            let reading = usable_sample(sample, now_ms, cfg.sensor_stale_ms);

            let severity = if ch.enabled {
                Severity::Critical
            } else {
                Severity::Warning
            };
            let sensor_bad = reading.is_none();
            eval_alarm(alarms, sink, sensor_code, severity, sensor_bad, now_ms);
            set_flag(&mut ch.fault_flags, FAULT_SENSOR, sensor_bad);
            if sensor_bad && ch.enabled {
                critical = true;
            }

            let ceiling = ch.role.ceiling_c(cfg);
            if let Some(t) = reading {
                if t > ceiling {
                    self.over_temp[idx] = true;
                } else if t < ceiling - OVER_TEMP_HYSTERESIS_C {
                    self.over_temp[idx] = false;
                }
            }
            let hot = self.over_temp[idx];
            eval_alarm(alarms, sink, over_code, Severity::Critical, hot, now_ms);
            set_flag(&mut ch.fault_flags, FAULT_OVER_TEMP, hot);
            critical |= hot;
        }

        // ── Water ─────────────────────────────────────────────────
        let tank_empty = !cfg.plumbed && !snap.tank_water_ok;
        eval_alarm(alarms, sink, AlarmCode::WaterTankEmpty, Severity::Warning, tank_empty, now_ms);
        let level_low = !snap.boiler_level_ok;
        eval_alarm(alarms, sink, AlarmCode::BoilerLevelLow, Severity::Warning, level_low, now_ms);

        // ── Pressure ──────────────────────────────────────────────
        let pressure = snap.pressure_bar.filter(|p| {
            p.value.is_finite()
                && (PRESSURE_PLAUSIBLE_MIN_BAR..=PRESSURE_PLAUSIBLE_MAX_BAR).contains(&p.value)
                && p.age_ms(now_ms) <= u64::from(cfg.sensor_stale_ms)
        });
        eval_alarm(alarms, sink, AlarmCode::PressureSensor, Severity::Warning, pressure.is_none(), now_ms);
        let limit = cfg.max_pressure_bar.min(FIRMWARE_MAX_PRESSURE_BAR);
        if let Some(p) = pressure {
            self.over_pressure = p.value > limit;
        }
        eval_alarm(alarms, sink, AlarmCode::OverPressure, Severity::Critical, self.over_pressure, now_ms);
        critical |= self.over_pressure;

        // ── Emergency cutoff ──────────────────────────────────────
        if critical {
            if !self.cut_off {
                error!("SAFETY CUTOFF: all heaters off");
            }
            boilers.zero_all_duty();
            for ch in boilers.iter() {
                hw.set_heater(ch.id, 0.0);
            }
        } else if self.cut_off {
            info!("SAFETY: critical conditions resolved");
        }
        self.cut_off = critical;

        SafetyVerdict {
            critical,
            heating_permitted: !tank_empty && !level_low,
            water_ok: !tank_empty && !level_low,
        }
    }

    /// Latched over-temperature for a channel index.
    pub fn over_temperature(&self, idx: usize) -> bool {
        self.over_temp.get(idx).copied().unwrap_or(false)
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn alarm_codes(role: BoilerRole) -> (AlarmCode, AlarmCode) {
    match role {
        BoilerRole::Brew | BoilerRole::Shared => (AlarmCode::BrewTempSensor, AlarmCode::BrewOverTemp),
        BoilerRole::Steam => (AlarmCode::SteamTempSensor, AlarmCode::SteamOverTemp),
    }
}

fn set_flag(flags: &mut u8, mask: u8, on: bool) {
    if on {
        *flags |= mask;
    } else {
        *flags &= !mask;
    }
}

/// Raise or resolve `code` and publish any change.
fn eval_alarm(
    alarms: &mut AlarmTable,
    sink: &mut impl EventSink,
    code: AlarmCode,
    severity: Severity,
    condition: bool,
    now_ms: u64,
) {
    let change = if condition {
        let was_active = alarms.is_active(code);
        let change = alarms.raise(code, severity, now_ms);
        if change.is_some() && !was_active {
            error!("SAFETY FAULT SET: {code}");
        }
        change
    } else {
        let change = alarms.resolve(code, now_ms);
        if change.is_some() {
            info!("SAFETY FAULT CLEARED: {code}");
        }
        change
    };
    if let Some(record) = change {
        sink.emit(&AppEvent::AlarmChanged(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::boiler::BoilerId;

    #[derive(Default)]
    struct Outputs {
        heater_zeroed: Vec<u8>,
    }

    impl ActuatorPort for Outputs {
        fn set_heater(&mut self, id: BoilerId, duty: f32) {
            if duty == 0.0 {
                self.heater_zeroed.push(id.0);
            }
        }
        fn set_pump(&mut self, _duty: f32) {}
        fn set_brew_valve(&mut self, _open: bool) {}
        fn all_off(&mut self) {}
    }

    #[derive(Default)]
    struct Events(Vec<AppEvent>);

    impl EventSink for Events {
        fn emit(&mut self, event: &AppEvent) {
            self.0.push(event.clone());
        }
    }

    struct Rig {
        monitor: SafetyMonitor,
        boilers: Boilers,
        cfg: SystemConfig,
        alarms: AlarmTable,
        hw: Outputs,
        events: Events,
    }

    impl Rig {
        fn new() -> Self {
            let cfg = SystemConfig::default();
            Self {
                monitor: SafetyMonitor::new(),
                boilers: Boilers::from_config(&cfg),
                cfg,
                alarms: AlarmTable::new(),
                hw: Outputs::default(),
                events: Events::default(),
            }
        }

        fn run(&mut self, snap: &SensorSnapshot, now_ms: u64) -> SafetyVerdict {
            self.monitor.evaluate(
                snap,
                &mut self.boilers,
                &self.cfg,
                &mut self.alarms,
                &mut self.hw,
                now_ms,
                &mut self.events,
            )
        }
    }

    fn healthy(now_ms: u64, brew: f32, steam: f32) -> SensorSnapshot {
        SensorSnapshot {
            boiler_temps: [Some(Sample::new(brew, now_ms)), Some(Sample::new(steam, now_ms))],
            pressure_bar: Some(Sample::new(1.0, now_ms)),
            tank_water_ok: true,
            boiler_level_ok: true,
            flow_pulses: 0,
        }
    }

    #[test]
    fn healthy_snapshot_is_clear() {
        let mut rig = Rig::new();
        let v = rig.run(&healthy(10, 93.0, 140.0), 10);
        assert_eq!(v, SafetyVerdict { critical: false, heating_permitted: true, water_ok: true });
        assert!(rig.alarms.is_empty());
    }

    #[test]
    fn over_temp_cuts_heaters_in_same_call() {
        let mut rig = Rig::new();
        for ch in rig.boilers.iter_mut() {
            ch.enabled = true;
            ch.heater_duty = 0.8;
        }
        let v = rig.run(&healthy(10, 131.0, 140.0), 10);
        assert!(v.critical);
        assert!(rig.boilers.iter().all(|c| c.heater_duty == 0.0));
        assert_eq!(rig.hw.heater_zeroed, vec![0, 1]);
        assert!(rig.alarms.is_active(AlarmCode::BrewOverTemp));
        assert!(rig.events.0.iter().any(|e| matches!(e, AppEvent::AlarmChanged(r) if r.code == AlarmCode::BrewOverTemp)));
    }

    #[test]
    fn over_temp_clears_with_hysteresis() {
        let mut rig = Rig::new();
        rig.run(&healthy(10, 121.0, 140.0), 10);
        assert!(rig.monitor.over_temperature(0));
        rig.run(&healthy(20, 118.0, 140.0), 20);
        assert!(rig.monitor.over_temperature(0), "still within hysteresis");
        rig.run(&healthy(30, 114.0, 140.0), 30);
        assert!(!rig.monitor.over_temperature(0));
        assert!(!rig.alarms.is_active(AlarmCode::BrewOverTemp));
    }

    #[test]
    fn sensor_fault_severity_follows_enable() {
        let mut rig = Rig::new();
        let mut snap = healthy(10, 93.0, 140.0);
        snap.boiler_temps[1] = None;
        let v = rig.run(&snap, 10);
        assert!(!v.critical, "disabled channel fault is a warning");
        assert_eq!(rig.alarms.get(AlarmCode::SteamTempSensor).map(|r| r.severity), Some(Severity::Warning));

        rig.boilers.get_mut(BoilerId(1)).unwrap().enabled = true;
        let v = rig.run(&snap, 20);
        assert!(v.critical);
        assert_eq!(rig.alarms.get(AlarmCode::SteamTempSensor).map(|r| r.severity), Some(Severity::Critical));
    }

    #[test]
    fn stale_reading_is_a_sensor_fault() {
        let mut rig = Rig::new();
        let snap = healthy(0, 93.0, 140.0);
        rig.run(&snap, 600);
        assert!(rig.alarms.is_active(AlarmCode::BrewTempSensor));
    }

    #[test]
    fn implausible_reading_is_a_sensor_fault() {
        let mut rig = Rig::new();
        rig.run(&healthy(10, f32::NAN, 250.0), 10);
        assert!(rig.alarms.is_active(AlarmCode::BrewTempSensor));
        assert!(rig.alarms.is_active(AlarmCode::SteamTempSensor));
    }

    #[test]
    fn empty_tank_inhibits_heating_unless_plumbed() {
        let mut rig = Rig::new();
        let mut snap = healthy(10, 93.0, 140.0);
        snap.tank_water_ok = false;
        let v = rig.run(&snap, 10);
        assert!(!v.heating_permitted && !v.water_ok && !v.critical);

        rig.cfg.plumbed = true;
        let v = rig.run(&snap, 20);
        assert!(v.heating_permitted);
        assert!(!rig.alarms.is_active(AlarmCode::WaterTankEmpty));
    }

    #[test]
    fn over_pressure_is_critical() {
        let mut rig = Rig::new();
        let mut snap = healthy(10, 93.0, 140.0);
        snap.pressure_bar = Some(Sample::new(14.0, 10));
        assert!(rig.run(&snap, 10).critical);
        assert_eq!(rig.alarms.get(AlarmCode::OverPressure).map(|r| r.severity), Some(Severity::Critical));
    }

    #[test]
    fn ceiling_uses_firmware_limit() {
        let mut rig = Rig::new();
        rig.cfg.brew_max_temp_c = 180.0;
        assert!(rig.run(&healthy(10, 131.0, 140.0), 10).critical);
    }
}
