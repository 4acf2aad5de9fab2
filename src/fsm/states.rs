//! Concrete state handler functions and table builder.
//!
//! Each state is four plain `fn` pointers: no closures, no dynamic
//! dispatch, no heap.
//!
//! ```text
//!  INIT ──[self-test ok]──▶ IDLE ◀──────────────[Activity]─────── SLEEP
//!                            │  ▲                                  ▲ │
//!               [PowerOn]    │  │ [PowerOff]        [inactivity]   │ │ [PowerOn]
//!                            ▼  │                                  │ ▼
//!                          HEATING ──[all in band, debounced]──▶ READY
//!                                                                │ ▲
//!                       ┌────────────────┬───────────────────────┘ │
//!                       ▼                ▼                ▼        │
//!                    BREWING         STEAMING         BACKFLUSH ───┘
//!
//!  Any state ──[critical alarm]──▶ ALARM ──[no critical outstanding]──▶ IDLE
//! ```
//!
//! Entry and exit actions are the only writers of `ActuatorCommands`.
//! Heater setpoints and channel enables are re-applied on every update
//! so configuration changes take effect without a transition.

use super::context::{ActuatorCommands, BrewSummary, BrewTracker, MachineContext};
use super::{EventOutcome, MachineEvent, StateDescriptor, StateId};
use crate::config::HeatingStrategy;
use crate::control::boiler::BoilerRole;
use crate::control::pid;
use crate::safety;
use log::{error, info};

/// Pump duty used while brewing and backflushing.
const PUMP_FULL: f32 = 1.0;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Init,
            name: "Init",
            on_enter: Some(init_enter),
            on_exit: None,
            on_update: init_update,
            on_event: init_event,
        },
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_update: idle_update,
            on_event: idle_event,
        },
        StateDescriptor {
            id: StateId::Heating,
            name: "Heating",
            on_enter: Some(heating_enter),
            on_exit: None,
            on_update: heating_update,
            on_event: heating_event,
        },
        StateDescriptor {
            id: StateId::Ready,
            name: "Ready",
            on_enter: Some(ready_enter),
            on_exit: None,
            on_update: ready_update,
            on_event: ready_event,
        },
        StateDescriptor {
            id: StateId::Brewing,
            name: "Brewing",
            on_enter: Some(brewing_enter),
            on_exit: Some(brewing_exit),
            on_update: brewing_update,
            on_event: brewing_event,
        },
        StateDescriptor {
            id: StateId::Steaming,
            name: "Steaming",
            on_enter: Some(steaming_enter),
            on_exit: Some(steaming_exit),
            on_update: steaming_update,
            on_event: steaming_event,
        },
        StateDescriptor {
            id: StateId::Backflush,
            name: "Backflush",
            on_enter: Some(backflush_enter),
            on_exit: Some(backflush_exit),
            on_update: backflush_update,
            on_event: backflush_event,
        },
        StateDescriptor {
            id: StateId::Sleep,
            name: "Sleep",
            on_enter: Some(sleep_enter),
            on_exit: None,
            on_update: sleep_update,
            on_event: sleep_event,
        },
        StateDescriptor {
            id: StateId::Alarm,
            name: "Alarm",
            on_enter: Some(alarm_enter),
            on_exit: Some(alarm_exit),
            on_update: alarm_update,
            on_event: alarm_event,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Shared helpers
// ═══════════════════════════════════════════════════════════════════════════

/// What the boilers should be doing in the current state.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Targets {
    /// Heaters off, controllers reset.
    Off,
    /// Configured brew/steam targets under the heating strategy.
    Normal,
    /// Steam boiler forced on; a shared boiler runs at steam temperature.
    Steam,
    /// Every boiler held at the sleep setpoint.
    Sleep,
}

fn apply_targets(ctx: &mut MachineContext, targets: Targets) {
    let cfg = &ctx.config;
    match targets {
        Targets::Off => {
            ctx.steam_released = false;
            for ch in ctx.boilers.iter_mut() {
                ch.setpoint_c = 0.0;
                ch.enabled = false;
                pid::disable(ch);
            }
        }
        Targets::Sleep => {
            ctx.steam_released = false;
            let setpoint = cfg.sleep_setpoint_c;
            for ch in ctx.boilers.iter_mut() {
                ch.setpoint_c = setpoint;
                ch.enabled = setpoint > 0.0;
                ch.pid.set_limits(0.0, 1.0);
            }
        }
        Targets::Normal | Targets::Steam => {
            let steam_mode = targets == Targets::Steam;
            let brew_id = ctx.boilers.brew_channel();
            let brew_in_band = brew_id
                .and_then(|id| ctx.boilers.get(id))
                .is_some_and(|c| c.enabled && c.in_band(cfg.ready_tolerance_c));
            if brew_in_band {
                ctx.steam_released = true;
            }

            for ch in ctx.boilers.iter_mut() {
                let is_brew = Some(ch.id) == brew_id;
                ch.setpoint_c = match ch.role {
                    BoilerRole::Brew => cfg.brew_target_c,
                    BoilerRole::Steam => cfg.steam_target_c,
                    BoilerRole::Shared if steam_mode => cfg.steam_target_c,
                    BoilerRole::Shared => cfg.brew_target_c,
                };
                ch.enabled = is_brew
                    || steam_mode
                    || match cfg.heating_strategy {
                        HeatingStrategy::BrewOnly => false,
                        HeatingStrategy::Sequential => ctx.steam_released,
                        HeatingStrategy::Parallel | HeatingStrategy::SmartStagger => true,
                    };
                ch.pid.set_limits(0.0, 1.0);
            }
        }
    }
}

/// Events every state accepts without a transition.
fn accepted_everywhere(event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::TargetsChanged | MachineEvent::AlarmAcknowledged => EventOutcome::Accepted,
        _ => EventOutcome::Rejected,
    }
}

/// Heat-up request from `Idle` or `Sleep`.
fn request_heating(ctx: &MachineContext) -> EventOutcome {
    if ctx.heating_permitted {
        EventOutcome::Transition(StateId::Heating)
    } else {
        info!("Heat-up refused: level interlock active");
        EventOutcome::Rejected
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  INIT state: sensor self-test
// ═══════════════════════════════════════════════════════════════════════════

fn init_enter(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();
    apply_targets(ctx, Targets::Off);
    info!("INIT: waiting for boiler sensor self-test");
}

fn init_update(ctx: &mut MachineContext) -> Option<StateId> {
    let stale_ms = u64::from(ctx.config.sensor_stale_ms);
    let all_ok = ctx.boilers.iter().all(|ch| {
        ctx.sensors.boiler_temp(ch.id).is_some_and(|s| {
            safety::plausible_temp(s.value) && s.age_ms(ctx.now_ms) <= stale_ms
        })
    });
    if all_ok {
        info!("INIT: self-test passed for {} boiler(s)", ctx.boilers.len());
        return Some(StateId::Idle);
    }
    None
}

fn init_event(_ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    accepted_everywhere(event)
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state: powered down, monitoring only
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();
    ctx.in_band_since_ms = None;
    apply_targets(ctx, Targets::Off);
    info!("IDLE: heaters off");
}

fn idle_update(ctx: &mut MachineContext) -> Option<StateId> {
    if ctx.inactive_ms() >= u64::from(ctx.config.idle_timeout_ms) {
        return Some(StateId::Sleep);
    }
    None
}

fn idle_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::PowerOn | MachineEvent::ScheduleTrigger => request_heating(ctx),
        MachineEvent::Activity => {
            ctx.touch();
            EventOutcome::Accepted
        }
        other => accepted_everywhere(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  HEATING state: boilers climbing to target
// ═══════════════════════════════════════════════════════════════════════════

fn heating_enter(ctx: &mut MachineContext) {
    ctx.in_band_since_ms = None;
    apply_targets(ctx, Targets::Normal);
    info!(
        "HEATING: brew {:.1}°C, steam {:.1}°C, strategy {:?}",
        ctx.config.brew_target_c, ctx.config.steam_target_c, ctx.config.heating_strategy
    );
}

fn heating_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Normal);

    if ctx.boilers.all_enabled_in_band(ctx.config.ready_tolerance_c) {
        let since = *ctx.in_band_since_ms.get_or_insert(ctx.now_ms);
        if ctx.now_ms.saturating_sub(since) >= u64::from(ctx.config.ready_debounce_ms) {
            return Some(StateId::Ready);
        }
    } else {
        ctx.in_band_since_ms = None;
    }
    None
}

fn heating_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::PowerOff => EventOutcome::Transition(StateId::Idle),
        MachineEvent::TargetsChanged => {
            ctx.in_band_since_ms = None;
            apply_targets(ctx, Targets::Normal);
            EventOutcome::Accepted
        }
        other => accepted_everywhere(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  READY state: at temperature, waiting for the user
// ═══════════════════════════════════════════════════════════════════════════

fn ready_enter(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();
    apply_targets(ctx, Targets::Normal);
    info!("READY: machine at temperature");
}

fn ready_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Normal);
    if ctx.inactive_ms() >= u64::from(ctx.config.idle_timeout_ms) {
        return Some(StateId::Sleep);
    }
    None
}

fn ready_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::StartBrew | MachineEvent::StartBackflush if !ctx.water_ok => {
            info!("READY: {event:?} refused, no water");
            EventOutcome::Rejected
        }
        MachineEvent::StartBrew => EventOutcome::Transition(StateId::Brewing),
        MachineEvent::StartBackflush => EventOutcome::Transition(StateId::Backflush),
        MachineEvent::StartSteam => EventOutcome::Transition(StateId::Steaming),
        MachineEvent::PowerOff => EventOutcome::Transition(StateId::Idle),
        MachineEvent::TargetsChanged => EventOutcome::Transition(StateId::Heating),
        MachineEvent::Activity => {
            ctx.touch();
            EventOutcome::Accepted
        }
        other => accepted_everywhere(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  BREWING state: valve open, pump running, shot timer live
// ═══════════════════════════════════════════════════════════════════════════

fn brewing_enter(ctx: &mut MachineContext) {
    ctx.commands.brew_valve_open = true;
    ctx.commands.pump_duty = PUMP_FULL;
    ctx.completed_brew = None;
    ctx.brew = BrewTracker {
        started_at_ms: ctx.now_ms,
        start_pulses: ctx.sensors.flow_pulses,
        peak_pressure_bar: 0.0,
        peak_temp_c: 0.0,
    };
    track_brew_peaks(ctx);
    info!("BREWING: shot started");
}

fn brewing_exit(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();

    let duration = ctx.now_ms.saturating_sub(ctx.brew.started_at_ms);
    let counted = duration >= u64::from(ctx.config.min_shot_ms);
    let summary = BrewSummary {
        duration_ms: duration.min(u64::from(u32::MAX)) as u32,
        peak_pressure_bar: ctx.brew.peak_pressure_bar,
        peak_temp_c: ctx.brew.peak_temp_c,
        volume_ml: ctx.brew_volume_ml(),
        counted,
    };
    ctx.completed_brew = Some(summary);
    if counted {
        ctx.maintenance.record_shot();
        ctx.maintenance_dirty = true;
    }
    ctx.touch();
    info!(
        "BREWING: shot finished after {} ms ({:.0} ml, peak {:.1} bar){}",
        summary.duration_ms,
        summary.volume_ml,
        summary.peak_pressure_bar,
        if counted { "" } else { ", not counted" }
    );
}

fn brewing_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Normal);
    track_brew_peaks(ctx);

    if !ctx.water_ok {
        error!("BREWING: water lost, stopping shot");
        return Some(StateId::Ready);
    }
    if ctx.ms_in_state() >= u64::from(ctx.config.max_brew_ms) {
        info!("BREWING: maximum shot time reached");
        return Some(StateId::Ready);
    }
    None
}

fn brewing_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::StopBrew(reason) => {
            info!("BREWING: stop requested ({reason:?})");
            EventOutcome::Transition(StateId::Ready)
        }
        MachineEvent::TargetsChanged => {
            apply_targets(ctx, Targets::Normal);
            EventOutcome::Accepted
        }
        other => accepted_everywhere(other),
    }
}

fn track_brew_peaks(ctx: &mut MachineContext) {
    if let Some(p) = ctx.sensors.pressure_bar {
        ctx.brew.peak_pressure_bar = ctx.brew.peak_pressure_bar.max(p.value);
    }
    let brew_temp = ctx
        .boilers
        .brew_channel()
        .and_then(|id| ctx.sensors.boiler_temp(id));
    if let Some(t) = brew_temp {
        ctx.brew.peak_temp_c = ctx.brew.peak_temp_c.max(t.value);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  STEAMING state
// ═══════════════════════════════════════════════════════════════════════════

fn steaming_enter(ctx: &mut MachineContext) {
    apply_targets(ctx, Targets::Steam);
    info!("STEAMING: steam boiler at {:.1}°C", ctx.config.steam_target_c);
}

fn steaming_exit(ctx: &mut MachineContext) {
    apply_targets(ctx, Targets::Normal);
    ctx.touch();
}

fn steaming_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Steam);
    if ctx.ms_in_state() >= u64::from(ctx.config.max_steam_ms) {
        info!("STEAMING: maximum steam time reached");
        return Some(StateId::Ready);
    }
    None
}

fn steaming_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::StopSteam => EventOutcome::Transition(StateId::Ready),
        MachineEvent::TargetsChanged => {
            apply_targets(ctx, Targets::Steam);
            EventOutcome::Accepted
        }
        other => accepted_everywhere(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  BACKFLUSH state: pump against the blind basket
// ═══════════════════════════════════════════════════════════════════════════

fn backflush_enter(ctx: &mut MachineContext) {
    ctx.commands.brew_valve_open = true;
    ctx.commands.pump_duty = PUMP_FULL;
    info!("BACKFLUSH: running for {} ms", ctx.config.backflush_ms);
}

fn backflush_exit(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();
    ctx.touch();
    info!("BACKFLUSH: finished");
}

fn backflush_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Normal);
    if ctx.ms_in_state() >= u64::from(ctx.config.backflush_ms) {
        return Some(StateId::Ready);
    }
    None
}

fn backflush_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::StopBackflush => EventOutcome::Transition(StateId::Ready),
        MachineEvent::TargetsChanged => {
            apply_targets(ctx, Targets::Normal);
            EventOutcome::Accepted
        }
        other => accepted_everywhere(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  SLEEP state: economy setpoint until woken
// ═══════════════════════════════════════════════════════════════════════════

fn sleep_enter(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();
    ctx.in_band_since_ms = None;
    apply_targets(ctx, Targets::Off);
    apply_targets(ctx, Targets::Sleep);
    info!("SLEEP: setpoint {:.1}°C", ctx.config.sleep_setpoint_c);
}

fn sleep_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Sleep);
    None
}

fn sleep_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::Activity => {
            ctx.touch();
            EventOutcome::Transition(StateId::Idle)
        }
        MachineEvent::PowerOn | MachineEvent::ScheduleTrigger => request_heating(ctx),
        other => accepted_everywhere(other),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  ALARM state: everything off until critical alarms are cleared and acked
// ═══════════════════════════════════════════════════════════════════════════

fn alarm_enter(ctx: &mut MachineContext) {
    ctx.commands = ActuatorCommands::all_off();
    ctx.in_band_since_ms = None;
    apply_targets(ctx, Targets::Off);
    error!("ALARM: all outputs off, acknowledgement required");
}

fn alarm_exit(ctx: &mut MachineContext) {
    ctx.touch();
    info!("ALARM: cleared");
}

fn alarm_update(ctx: &mut MachineContext) -> Option<StateId> {
    apply_targets(ctx, Targets::Off);
    if !ctx.critical_outstanding {
        return Some(StateId::Idle);
    }
    None
}

fn alarm_event(ctx: &mut MachineContext, event: MachineEvent) -> EventOutcome {
    match event {
        MachineEvent::AlarmAcknowledged if !ctx.critical_outstanding => {
            EventOutcome::Transition(StateId::Idle)
        }
        other => accepted_everywhere(other),
    }
}
