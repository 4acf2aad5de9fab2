//! Application service: the hexagonal core.
//!
//! [`AppService`] owns the FSM, the safety monitor, the alarm table and the
//! shared [`MachineContext`].  All I/O flows through port traits injected
//! at call sites, so the whole service runs against mock adapters on the
//! host.
//!
//! ```text
//!  SensorPort ──▶ ┌─────────────────────────────┐ ──▶ EventSink
//!                 │          AppService          │
//! ActuatorPort ◀──│  Safety · FSM · PID · Maint  │ ◀─▶ StoragePort
//!                 └─────────────────────────────┘
//! ```

use heapless::Vec;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::alarms::{AlarmCode, AlarmRecord, AlarmTable, Severity};
use crate::config::{PidGains, SystemConfig};
use crate::control::boiler::{self, BoilerId, BoilerRole};
use crate::control::pid;
use crate::error::RejectReason;
use crate::fsm::context::MachineContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{EventOutcome, Fsm, MachineEvent, StateId};
use crate::maintenance::{MaintenanceCounters, MaintenanceKind, MaintenanceTarget};
use crate::persist::RecordStore;
use crate::safety::{self, SafetyMonitor, SafetyVerdict};

use super::events::{AppEvent, BoilerStatus, StatusReport};
use super::ports::{
    ActuatorPort, EventSink, PowerReading, SchedulerDelegate, SensorPort, StoragePort,
};

/// Record namespace for the shot counters.
pub const MAINT_NAMESPACE: &str = "maint";
/// Record namespace for link-tuned targets and gains.
pub const CALIB_NAMESPACE: &str = "calib";

/// Highest accepted PID gain.
pub const MAX_GAIN: f32 = 100.0;
/// Highest accepted target before the boiler ceiling is applied.
pub const MAX_TARGET_C: f32 = 200.0;

/// Back-off before a failed counter save is retried.
const SAVE_RETRY_MS: u64 = 5_000;
/// The over-budget alarm clears once the draw falls below this share of
/// the budget.
const POWER_CLEAR_RATIO: f32 = 0.9;

/// Targets and gains tuned over the link, persisted across power cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub brew_target_c: f32,
    pub steam_target_c: f32,
    pub brew_pid: PidGains,
    pub steam_pid: PidGains,
}

impl Calibration {
    fn from_config(cfg: &SystemConfig) -> Self {
        Self {
            brew_target_c: cfg.brew_target_c,
            steam_target_c: cfg.steam_target_c,
            brew_pid: cfg.brew_pid,
            steam_pid: cfg.steam_pid,
        }
    }

    fn apply(&self, cfg: &mut SystemConfig) {
        cfg.brew_target_c = self.brew_target_c;
        cfg.steam_target_c = self.steam_target_c;
        cfg.brew_pid = self.brew_pid;
        cfg.steam_pid = self.steam_pid;
    }
}

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    fsm: Fsm,
    ctx: MachineContext,
    safety: SafetyMonitor,
    alarms: AlarmTable,
    maint_store: RecordStore,
    calib_store: RecordStore,
    verdict: SafetyVerdict,
    tick_count: u64,
    /// A wake schedule fired; offered to the FSM on the next tick.
    schedule_pending: bool,
    maint_retry_at_ms: u64,
    /// Latest mains reading from the power meter.
    power: Option<PowerReading>,
}

impl AppService {
    /// Construct the service from configuration.
    ///
    /// Does **not** start the FSM: call [`restore`](Self::restore) and then
    /// [`start`](Self::start).
    pub fn new(config: SystemConfig) -> Self {
        let ctx = MachineContext::new(config);
        let fsm = Fsm::new(build_state_table(), StateId::Init);
        Self {
            fsm,
            ctx,
            safety: SafetyMonitor::new(),
            alarms: AlarmTable::new(),
            maint_store: RecordStore::new(MAINT_NAMESPACE),
            calib_store: RecordStore::new(CALIB_NAMESPACE),
            verdict: SafetyVerdict {
                critical: false,
                heating_permitted: false,
                water_ok: false,
            },
            tick_count: 0,
            schedule_pending: false,
            maint_retry_at_ms: 0,
            power: None,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Load the persisted counters and calibration.  Missing or corrupt
    /// records leave the defaults in place.
    pub fn restore(&mut self, storage: &impl StoragePort) {
        match self.maint_store.load::<MaintenanceCounters>(storage) {
            Ok(Some(counters)) => {
                info!(
                    "Restored maintenance counters: {} / {} / {}",
                    counters.shots_since_backflush,
                    counters.shots_since_group_clean,
                    counters.shots_since_descale
                );
                self.ctx.maintenance = counters;
            }
            Ok(None) => {}
            Err(e) => warn!("Maintenance counters not restored: {}", e),
        }

        match self.calib_store.load::<Calibration>(storage) {
            Ok(Some(calib)) => {
                calib.apply(&mut self.ctx.config);
                self.refresh_gains();
                info!(
                    "Restored calibration: brew {:.1}°C, steam {:.1}°C",
                    calib.brew_target_c, calib.steam_target_c
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Calibration not restored: {}", e),
        }
    }

    /// Start the FSM in `Init`.
    pub fn start(&mut self, sink: &mut impl EventSink) {
        self.fsm.start(&mut self.ctx);
        sink.emit(&AppEvent::Started(self.fsm.current_state()));
        info!("AppService started in {:?}", self.fsm.current_state());
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one full control cycle:
    /// read sensors → safety → FSM → maintenance → PID → actuators → persist.
    ///
    /// The `hw` parameter satisfies **both** [`SensorPort`] and
    /// [`ActuatorPort`], which avoids a double mutable borrow while keeping
    /// the port boundary explicit.
    pub fn tick(
        &mut self,
        hw: &mut (impl SensorPort + ActuatorPort),
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) {
        self.tick_count += 1;
        let prev_ms = self.ctx.now_ms;
        let now_ms = self.tick_count * u64::from(self.ctx.config.control_loop_interval_ms);
        self.ctx.now_ms = now_ms;
        let prev_state = self.fsm.current_state();

        // 1. Sensors
        let snapshot = hw.read_all(now_ms);
        self.ctx.sensors = snapshot;
        let stale_ms = self.ctx.config.sensor_stale_ms;
        for ch in self.ctx.boilers.iter_mut() {
            ch.measured_c = safety::usable_sample(snapshot.boiler_temp(ch.id), now_ms, stale_ms);
        }

        // 2. Safety, before anything can command an output
        let verdict = self.safety.evaluate(
            &snapshot,
            &mut self.ctx.boilers,
            &self.ctx.config,
            &mut self.alarms,
            hw,
            now_ms,
            sink,
        );
        self.verdict = verdict;
        self.ctx.heating_permitted = verdict.heating_permitted;
        self.ctx.water_ok = verdict.water_ok;
        self.ctx.critical_outstanding = self.alarms.critical_outstanding();

        if verdict.critical && self.fsm.current_state() != StateId::Alarm {
            warn!("Critical alarm, forcing Alarm state");
            self.fsm.force_transition(StateId::Alarm, &mut self.ctx);
        }

        // 3. Deferred schedule trigger, then the FSM itself
        if core::mem::take(&mut self.schedule_pending) {
            let outcome = self.fsm.dispatch(MachineEvent::ScheduleTrigger, &mut self.ctx);
            if outcome == EventOutcome::Rejected {
                info!("Wake schedule ignored in {:?}", self.fsm.current_state());
            }
        }
        self.fsm.tick(&mut self.ctx);

        // 4. Maintenance reminders
        self.update_reminders(sink);

        // 5. Boiler controllers.  The brew channel runs first; the others
        //    are capped to the share of the SSR window it leaves.
        let dt = now_ms.saturating_sub(prev_ms) as f32 / 1000.0;
        let heat_ok = !verdict.critical && verdict.heating_permitted;
        let cfg = &self.ctx.config;
        let brew_id = self.ctx.boilers.brew_channel();
        let mut brew_duty = 0.0;
        for ch in self.ctx.boilers.iter_mut() {
            let is_brew = Some(ch.id) == brew_id;
            if ch.enabled && heat_ok {
                let cap = if is_brew { 1.0 } else { boiler::window_share(cfg, brew_duty) };
                ch.pid.set_limits(0.0, cap);
                let measured = ch.measured_c;
                let duty = pid::update(ch, measured, dt, self.tick_count);
                ch.heater_duty = duty.min(cap);
            } else {
                pid::disable(ch);
            }
            if is_brew {
                brew_duty = ch.heater_duty;
            }
        }

        // 6. Outputs
        self.apply_actuators(hw);

        // 7. Publish
        let new_state = self.fsm.current_state();
        if new_state != prev_state {
            sink.emit(&AppEvent::StateChanged {
                from: prev_state,
                to: new_state,
            });
        }
        if let Some(summary) = self.ctx.completed_brew.take() {
            sink.emit(&AppEvent::BrewCompleted(summary));
        }

        // 8. Persist counters
        if self.ctx.maintenance_dirty && now_ms >= self.maint_retry_at_ms {
            self.save_maintenance(storage, sink);
        }
    }

    /// Account for `missed` control periods that never ran, so loop time
    /// keeps pace with wall time after an overrun.  The next tick sees the
    /// whole gap: timers expire on schedule and the controllers integrate
    /// over the real elapsed time.
    pub fn skip_intervals(&mut self, missed: u64) {
        if missed == 0 {
            return;
        }
        warn!("Control loop overran by {} period(s)", missed);
        self.tick_count += missed;
    }

    /// Take the power meter's latest reading.
    ///
    /// A measured draw above the supply budget raises a warning; heating
    /// itself is already bounded by the budget, so this flags an external
    /// load or a miswired heater.  No reading leaves the alarm as it was.
    pub fn record_power(&mut self, reading: Option<PowerReading>, sink: &mut impl EventSink) {
        self.power = reading;
        let Some(r) = reading else { return };
        let budget = boiler::current_budget_a(&self.ctx.config);
        if r.current_a > budget {
            self.raise_alarm(AlarmCode::PowerOverBudget, Severity::Warning, sink);
        } else if r.current_a < budget * POWER_CLEAR_RATIO {
            self.resolve_alarm(AlarmCode::PowerOverBudget, sink);
        }
    }

    // ── Command handling ──────────────────────────────────────

    /// Offer a machine event to the FSM.
    ///
    /// A refused event leaves the state unchanged and reports why:
    /// `Interlock` when only a water or level interlock stood in the way,
    /// `InvalidState` otherwise.
    pub fn handle_event(
        &mut self,
        event: MachineEvent,
        sink: &mut impl EventSink,
    ) -> Result<(), RejectReason> {
        let prev = self.fsm.current_state();
        match self.fsm.dispatch(event, &mut self.ctx) {
            EventOutcome::Rejected => {
                sink.emit(&AppEvent::CommandRejected { event, state: prev });
                Err(self.rejection_reason(prev, event))
            }
            EventOutcome::Accepted | EventOutcome::Transition(_) => {
                let next = self.fsm.current_state();
                if next != prev {
                    sink.emit(&AppEvent::StateChanged { from: prev, to: next });
                }
                Ok(())
            }
        }
    }

    /// Acknowledge an alarm by wire code.
    pub fn acknowledge_alarm(
        &mut self,
        code: u8,
        sink: &mut impl EventSink,
    ) -> Result<(), RejectReason> {
        let code = AlarmCode::from_code(code).ok_or(RejectReason::UnknownAlarm)?;
        self.alarms.acknowledge(code)?;
        self.ctx.critical_outstanding = self.alarms.critical_outstanding();
        self.handle_event(MachineEvent::AlarmAcknowledged, sink)
    }

    /// Raise an alarm owned by a collaborator outside the tick (link, OTA).
    pub fn raise_alarm(&mut self, code: AlarmCode, severity: Severity, sink: &mut impl EventSink) {
        if let Some(record) = self.alarms.raise(code, severity, self.ctx.now_ms) {
            sink.emit(&AppEvent::AlarmChanged(record));
        }
    }

    pub fn resolve_alarm(&mut self, code: AlarmCode, sink: &mut impl EventSink) {
        if let Some(record) = self.alarms.resolve(code, self.ctx.now_ms) {
            sink.emit(&AppEvent::AlarmChanged(record));
        }
    }

    /// Change the brew or steam target served by boiler `id`.
    ///
    /// The value must lie in `0..=200` °C and under the boiler's ceiling.
    /// It is persisted before it takes effect; a failed save leaves the
    /// previous target in place.
    pub fn set_setpoint(
        &mut self,
        id: BoilerId,
        celsius: f32,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), RejectReason> {
        let role = self
            .ctx
            .boilers
            .get(id)
            .map(|ch| ch.role)
            .ok_or(RejectReason::UnknownBoiler)?;
        let serves_brew = matches!(role, BoilerRole::Brew | BoilerRole::Shared);
        let ceiling = if serves_brew {
            BoilerRole::Brew.ceiling_c(&self.ctx.config)
        } else {
            BoilerRole::Steam.ceiling_c(&self.ctx.config)
        };
        if !(celsius.is_finite() && (0.0..=MAX_TARGET_C).contains(&celsius) && celsius <= ceiling) {
            return Err(RejectReason::OutOfRange);
        }

        let mut calib = Calibration::from_config(&self.ctx.config);
        if serves_brew {
            calib.brew_target_c = celsius;
        } else {
            calib.steam_target_c = celsius;
        }
        self.commit_calibration(calib, storage, sink)?;
        info!("Boiler {} target set to {:.1}°C", id, celsius);
        self.handle_event(MachineEvent::TargetsChanged, sink)
    }

    /// Replace the PID gains of boiler `id`.  Every gain must be finite and
    /// within `0..=100`.
    pub fn set_pid_gains(
        &mut self,
        id: BoilerId,
        gains: PidGains,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), RejectReason> {
        let role = self
            .ctx
            .boilers
            .get(id)
            .map(|ch| ch.role)
            .ok_or(RejectReason::UnknownBoiler)?;
        let valid = |g: f32| g.is_finite() && (0.0..=MAX_GAIN).contains(&g);
        if !(valid(gains.kp) && valid(gains.ki) && valid(gains.kd)) {
            return Err(RejectReason::OutOfRange);
        }

        let mut calib = Calibration::from_config(&self.ctx.config);
        match role {
            BoilerRole::Brew | BoilerRole::Shared => calib.brew_pid = gains,
            BoilerRole::Steam => calib.steam_pid = gains,
        }
        self.commit_calibration(calib, storage, sink)?;
        info!(
            "Boiler {} gains set: kp={} ki={} kd={}",
            id, gains.kp, gains.ki, gains.kd
        );
        Ok(())
    }

    /// Reset the counters covered by `kind` (0 backflush, 1 group clean,
    /// 2 descale, 0xFF all) and persist them.
    pub fn maintenance_done(
        &mut self,
        kind: u8,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), RejectReason> {
        let target = MaintenanceTarget::from_code(kind).ok_or(RejectReason::OutOfRange)?;
        self.ctx.maintenance.reset(target);
        self.ctx.maintenance_dirty = true;
        info!("Maintenance done: {:?}", target);
        self.update_reminders(sink);
        if self.save_maintenance(storage, sink) {
            Ok(())
        } else {
            Err(RejectReason::Storage)
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Build a status snapshot from the current context.
    pub fn status_report(&self, ota_active: bool) -> StatusReport {
        let cfg = &self.ctx.config;
        let snap = &self.ctx.sensors;
        let now_ms = self.ctx.now_ms;

        let mut boilers = Vec::new();
        for ch in self.ctx.boilers.iter() {
            let _ = boilers.push(BoilerStatus {
                id: ch.id,
                temp_c: ch.measured_c,
                setpoint_c: ch.setpoint_c,
                duty: ch.heater_duty,
            });
        }
        let mut active_alarms = Vec::new();
        for code in self.alarms.active_codes() {
            let _ = active_alarms.push(code);
        }
        let pressure_bar = snap
            .pressure_bar
            .filter(|p| p.value.is_finite() && p.age_ms(now_ms) <= u64::from(cfg.sensor_stale_ms))
            .map(|p| p.value);
        let counters = self.ctx.maintenance;

        StatusReport {
            state: self.fsm.current_state(),
            boilers,
            pressure_bar,
            tank_ok: cfg.plumbed || snap.tank_water_ok,
            level_ok: snap.boiler_level_ok,
            backflush_due: counters.is_due(MaintenanceKind::Backflush, cfg),
            group_clean_due: counters.is_due(MaintenanceKind::GroupClean, cfg),
            descale_due: counters.is_due(MaintenanceKind::Descale, cfg),
            ota_active,
            counters,
            power: self.power,
            active_alarms,
        }
    }

    /// Current FSM state.
    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// Control-loop time of the last tick.
    pub fn now_ms(&self) -> u64 {
        self.ctx.now_ms
    }

    /// Total control ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn config(&self) -> &SystemConfig {
        &self.ctx.config
    }

    pub fn maintenance(&self) -> &MaintenanceCounters {
        &self.ctx.maintenance
    }

    pub fn alarm(&self, code: AlarmCode) -> Option<&AlarmRecord> {
        self.alarms.get(code)
    }

    /// Heater duty currently commanded for boiler `id`.
    pub fn heater_duty(&self, id: BoilerId) -> Option<f32> {
        self.ctx.boilers.get(id).map(|ch| ch.heater_duty)
    }

    pub fn verdict(&self) -> SafetyVerdict {
        self.verdict
    }

    // ── Internal ──────────────────────────────────────────────

    /// Translate channel duties and FSM commands into port calls.
    ///
    /// Heaters are forced off while a Critical condition or a level
    /// interlock is present; pump and valve additionally need water.
    fn apply_actuators(&self, hw: &mut impl ActuatorPort) {
        let critical = self.verdict.critical;
        let heat_ok = !critical && self.verdict.heating_permitted;
        for ch in self.ctx.boilers.iter() {
            let duty = if heat_ok { ch.heater_duty } else { 0.0 };
            hw.set_heater(ch.id, duty);
        }

        let cmds = &self.ctx.commands;
        let water_ok = !critical && self.verdict.water_ok;
        if water_ok {
            hw.set_pump(cmds.pump_duty);
            hw.set_brew_valve(cmds.brew_valve_open);
        } else {
            hw.set_pump(0.0);
            hw.set_brew_valve(false);
        }
    }

    fn update_reminders(&mut self, sink: &mut impl EventSink) {
        for kind in MaintenanceKind::ALL {
            let code = kind.alarm();
            let change = if self.ctx.maintenance.is_due(kind, &self.ctx.config) {
                self.alarms.raise(code, Severity::Info, self.ctx.now_ms)
            } else {
                self.alarms.resolve(code, self.ctx.now_ms)
            };
            if let Some(record) = change {
                sink.emit(&AppEvent::AlarmChanged(record));
            }
        }
    }

    /// Returns whether the counters are now durable.
    fn save_maintenance(&mut self, storage: &mut impl StoragePort, sink: &mut impl EventSink) -> bool {
        match self.maint_store.save(storage, &self.ctx.maintenance) {
            Ok(()) => {
                self.ctx.maintenance_dirty = false;
                self.resolve_alarm(AlarmCode::StorageFault, sink);
                true
            }
            Err(e) => {
                warn!("Maintenance counter save failed: {}", e);
                self.maint_retry_at_ms = self.ctx.now_ms + SAVE_RETRY_MS;
                self.raise_alarm(AlarmCode::StorageFault, Severity::Warning, sink);
                false
            }
        }
    }

    /// Persist `calib`, then make it live.
    fn commit_calibration(
        &mut self,
        calib: Calibration,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<(), RejectReason> {
        if let Err(e) = self.calib_store.save(storage, &calib) {
            warn!("Calibration save failed: {}", e);
            self.raise_alarm(AlarmCode::StorageFault, Severity::Warning, sink);
            return Err(RejectReason::Storage);
        }
        self.resolve_alarm(AlarmCode::StorageFault, sink);
        calib.apply(&mut self.ctx.config);
        self.refresh_gains();
        Ok(())
    }

    fn refresh_gains(&mut self) {
        let cfg = &self.ctx.config;
        for ch in self.ctx.boilers.iter_mut() {
            ch.pid.set_gains(ch.role.gains(cfg));
        }
    }

    fn rejection_reason(&self, state: StateId, event: MachineEvent) -> RejectReason {
        let blocked_heat = matches!(state, StateId::Idle | StateId::Sleep)
            && matches!(event, MachineEvent::PowerOn | MachineEvent::ScheduleTrigger)
            && !self.ctx.heating_permitted;
        let blocked_water = state == StateId::Ready
            && matches!(event, MachineEvent::StartBrew | MachineEvent::StartBackflush)
            && !self.ctx.water_ok;
        if blocked_heat || blocked_water {
            RejectReason::Interlock
        } else {
            RejectReason::InvalidState
        }
    }
}

impl SchedulerDelegate for AppService {
    fn on_schedule_fired(&mut self, label: &str) {
        info!("Wake schedule '{}' fired", label);
        self.schedule_pending = true;
    }
}
