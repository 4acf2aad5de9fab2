//! Function-pointer finite state machine engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                          │
//! │  ┌───────────┬──────────┬──────────┬───────────────┬───────────────┐ │
//! │  │ StateId   │ on_enter │ on_exit  │ on_update     │ on_event      │ │
//! │  ├───────────┼──────────┼──────────┼───────────────┼───────────────┤ │
//! │  │ Init      │ fn(ctx)  │    -     │ fn(ctx)->Opt  │ fn(ctx,ev)->O │ │
//! │  │ Idle      │ fn(ctx)  │    -     │ fn(ctx)->Opt  │ fn(ctx,ev)->O │ │
//! │  │ ...       │          │          │               │               │ │
//! │  │ Alarm     │ fn(ctx)  │ fn(ctx)  │ fn(ctx)->Opt  │ fn(ctx,ev)->O │ │
//! │  └───────────┴──────────┴──────────┴───────────────┴───────────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the **current** state.
//! External stimuli arrive through [`Fsm::dispatch`], which asks the
//! current state's `on_event` for an [`EventOutcome`].  Either path may
//! produce a transition: `on_exit(current)`, pointer update,
//! `on_enter(next)`.  All functions receive `&mut MachineContext`.

pub mod context;
pub mod states;

use context::MachineContext;
use log::{info, warn};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Enumeration of all machine states.  The discriminant is the wire code
/// carried in the `Status` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Init = 0,
    Idle = 1,
    Heating = 2,
    Ready = 3,
    Brewing = 4,
    Steaming = 5,
    Backflush = 6,
    Sleep = 7,
    Alarm = 8,
}

impl StateId {
    /// Total number of states; sizes the table array.
    pub const COUNT: usize = 9;

    pub const ALL: [StateId; Self::COUNT] = [
        Self::Init,
        Self::Idle,
        Self::Heating,
        Self::Ready,
        Self::Brewing,
        Self::Steaming,
        Self::Backflush,
        Self::Sleep,
        Self::Alarm,
    ];

    /// Convert an index back to `StateId`.  Out-of-range values map to
    /// `Alarm` (safe fallback) and trip a debug assertion.
    pub fn from_index(idx: usize) -> Self {
        match Self::ALL.get(idx) {
            Some(id) => *id,
            None => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Alarm
            }
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a shot was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    /// The hub's scale reached the target weight.
    TargetWeight,
    /// The hub gave up waiting for the shot.
    HubTimeout,
}

/// Stimuli the state machine reacts to outside its own `on_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    PowerOn,
    PowerOff,
    ScheduleTrigger,
    StartBrew,
    StopBrew(StopReason),
    StartSteam,
    StopSteam,
    StartBackflush,
    StopBackflush,
    AlarmAcknowledged,
    Activity,
    TargetsChanged,
}

impl MachineEvent {
    /// Every event, for exhaustive sweeps.
    pub const ALL: [MachineEvent; 14] = [
        Self::PowerOn,
        Self::PowerOff,
        Self::ScheduleTrigger,
        Self::StartBrew,
        Self::StopBrew(StopReason::User),
        Self::StopBrew(StopReason::TargetWeight),
        Self::StopBrew(StopReason::HubTimeout),
        Self::StartSteam,
        Self::StopSteam,
        Self::StartBackflush,
        Self::StopBackflush,
        Self::AlarmAcknowledged,
        Self::Activity,
        Self::TargetsChanged,
    ];
}

/// Result of offering an event to the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Leave the current state for the given one.
    Transition(StateId),
    /// Legal here and handled in place.
    Accepted,
    /// Not legal here; nothing changed.
    Rejected,
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut MachineContext);

/// Per-tick update handler.  Returns `Some(next)` to transition.
pub type StateUpdateFn = fn(&mut MachineContext) -> Option<StateId>;

/// Event handler.
pub type StateEventFn = fn(&mut MachineContext, MachineEvent) -> EventOutcome;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single state.  No heap, no `dyn`.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
    pub on_event: StateEventFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
    tick_count: u64,
    state_entry_tick: u64,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Run the initial `on_enter`.  Call once before the first `tick()`.
    pub fn start(&mut self, ctx: &mut MachineContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        ctx.state_entered_ms = ctx.now_ms;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance the FSM by one tick.
    pub fn tick(&mut self, ctx: &mut MachineContext) {
        self.tick_count += 1;
        ctx.ticks_in_state = self.tick_count - self.state_entry_tick;
        ctx.total_ticks = self.tick_count;

        if let Some(next_id) = (self.table[self.current].on_update)(ctx) {
            self.transition(next_id, ctx);
        }
    }

    /// Offer `event` to the current state and apply the outcome.
    pub fn dispatch(&mut self, event: MachineEvent, ctx: &mut MachineContext) -> EventOutcome {
        let outcome = (self.table[self.current].on_event)(ctx, event);
        match outcome {
            EventOutcome::Transition(next) if next as usize != self.current => {
                self.transition(next, ctx);
            }
            EventOutcome::Rejected => {
                warn!(
                    "FSM rejected {:?} in {}",
                    event, self.table[self.current].name
                );
            }
            _ => {}
        }
        outcome
    }

    /// Force an immediate transition (used by the service to enter `Alarm`).
    pub fn force_transition(&mut self, next: StateId, ctx: &mut MachineContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count - self.state_entry_tick
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut MachineContext) {
        let next_idx = next_id as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.state_entry_tick = self.tick_count;
        ctx.ticks_in_state = 0;
        ctx.state_entered_ms = ctx.now_ms;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::context::{MachineContext, Sample};
    use super::*;
    use crate::config::SystemConfig;
    use crate::control::boiler::BoilerId;

    const TICK_MS: u64 = 10;

    fn make_ctx() -> MachineContext {
        let mut ctx = MachineContext::new(SystemConfig::default());
        ctx.heating_permitted = true;
        ctx.water_ok = true;
        ctx
    }

    fn make_fsm() -> Fsm {
        Fsm::new(states::build_state_table(), StateId::Init)
    }

    /// Advance time by one tick with every boiler reading `temp_c`.
    fn step(fsm: &mut Fsm, ctx: &mut MachineContext, temp_c: f32) {
        ctx.now_ms += TICK_MS;
        let now = ctx.now_ms;
        for t in ctx.sensors.boiler_temps.iter_mut() {
            *t = Some(Sample::new(temp_c, now));
        }
        for ch in ctx.boilers.iter_mut() {
            ch.measured_c = Some(temp_c);
        }
        fsm.tick(ctx);
    }

    fn started(temp_c: f32) -> (Fsm, MachineContext) {
        let mut fsm = make_fsm();
        let mut ctx = make_ctx();
        fsm.start(&mut ctx);
        step(&mut fsm, &mut ctx, temp_c);
        assert_eq!(fsm.current_state(), StateId::Idle);
        (fsm, ctx)
    }

    fn ready() -> (Fsm, MachineContext) {
        let (mut fsm, mut ctx) = started(93.0);
        ctx.config.heating_strategy = crate::config::HeatingStrategy::BrewOnly;
        assert_eq!(fsm.dispatch(MachineEvent::PowerOn, &mut ctx), EventOutcome::Transition(StateId::Heating));
        fsm.force_transition(StateId::Ready, &mut ctx);
        (fsm, ctx)
    }

    #[test]
    fn init_waits_for_fresh_readings() {
        let mut fsm = make_fsm();
        let mut ctx = make_ctx();
        fsm.start(&mut ctx);
        ctx.now_ms = TICK_MS;
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Init);

        step(&mut fsm, &mut ctx, 25.0);
        assert_eq!(fsm.current_state(), StateId::Idle);
    }

    #[test]
    fn init_stays_on_implausible_reading() {
        let mut fsm = make_fsm();
        let mut ctx = make_ctx();
        fsm.start(&mut ctx);
        step(&mut fsm, &mut ctx, 250.0);
        assert_eq!(fsm.current_state(), StateId::Init);
    }

    #[test]
    fn tick_increments_counter() {
        let (mut fsm, mut ctx) = started(25.0);
        step(&mut fsm, &mut ctx, 25.0);
        assert_eq!(fsm.ticks_in_current_state(), 1);
        step(&mut fsm, &mut ctx, 25.0);
        assert_eq!(fsm.ticks_in_current_state(), 2);
    }

    #[test]
    fn power_on_enters_heating_with_targets() {
        let (mut fsm, mut ctx) = started(25.0);
        let outcome = fsm.dispatch(MachineEvent::PowerOn, &mut ctx);
        assert_eq!(outcome, EventOutcome::Transition(StateId::Heating));
        let brew = ctx.boilers.get(BoilerId(0)).unwrap();
        assert!(brew.enabled);
        assert_eq!(brew.setpoint_c, ctx.config.brew_target_c);
    }

    #[test]
    fn power_on_rejected_without_heating_clearance() {
        let (mut fsm, mut ctx) = started(25.0);
        ctx.heating_permitted = false;
        assert_eq!(fsm.dispatch(MachineEvent::PowerOn, &mut ctx), EventOutcome::Rejected);
        assert_eq!(fsm.current_state(), StateId::Idle);
    }

    #[test]
    fn heating_to_ready_after_debounce() {
        let (mut fsm, mut ctx) = started(25.0);
        ctx.config.heating_strategy = crate::config::HeatingStrategy::BrewOnly;
        fsm.dispatch(MachineEvent::PowerOn, &mut ctx);

        let debounce_ticks = u64::from(ctx.config.ready_debounce_ms) / TICK_MS;
        for _ in 0..debounce_ticks {
            step(&mut fsm, &mut ctx, 93.2);
        }
        assert_eq!(fsm.current_state(), StateId::Heating);
        step(&mut fsm, &mut ctx, 93.2);
        assert_eq!(fsm.current_state(), StateId::Ready);
    }

    #[test]
    fn leaving_band_restarts_debounce() {
        let (mut fsm, mut ctx) = started(25.0);
        ctx.config.heating_strategy = crate::config::HeatingStrategy::BrewOnly;
        fsm.dispatch(MachineEvent::PowerOn, &mut ctx);
        let half = u64::from(ctx.config.ready_debounce_ms) / TICK_MS / 2;
        for _ in 0..half {
            step(&mut fsm, &mut ctx, 93.0);
        }
        step(&mut fsm, &mut ctx, 80.0);
        for _ in 0..half + 5 {
            step(&mut fsm, &mut ctx, 93.0);
        }
        assert_eq!(fsm.current_state(), StateId::Heating);
    }

    #[test]
    fn start_brew_in_idle_is_rejected_without_actuation() {
        let (mut fsm, mut ctx) = started(25.0);
        assert_eq!(fsm.dispatch(MachineEvent::StartBrew, &mut ctx), EventOutcome::Rejected);
        assert_eq!(fsm.current_state(), StateId::Idle);
        assert_eq!(ctx.commands, context::ActuatorCommands::all_off());
    }

    #[test]
    fn brew_cycle_drives_pump_and_valve() {
        let (mut fsm, mut ctx) = ready();
        fsm.dispatch(MachineEvent::StartBrew, &mut ctx);
        assert_eq!(fsm.current_state(), StateId::Brewing);
        assert!(ctx.commands.brew_valve_open);
        assert!(ctx.commands.pump_duty > 0.0);

        fsm.dispatch(MachineEvent::StopBrew(StopReason::User), &mut ctx);
        assert_eq!(fsm.current_state(), StateId::Ready);
        assert_eq!(ctx.commands, context::ActuatorCommands::all_off());
        assert!(ctx.completed_brew.is_some());
    }

    #[test]
    fn brew_without_water_is_rejected() {
        let (mut fsm, mut ctx) = ready();
        ctx.water_ok = false;
        assert_eq!(fsm.dispatch(MachineEvent::StartBrew, &mut ctx), EventOutcome::Rejected);
        assert_eq!(fsm.current_state(), StateId::Ready);
    }

    #[test]
    fn brew_stops_at_max_duration() {
        let (mut fsm, mut ctx) = ready();
        fsm.dispatch(MachineEvent::StartBrew, &mut ctx);
        let ticks = u64::from(ctx.config.max_brew_ms) / TICK_MS;
        for _ in 0..ticks {
            step(&mut fsm, &mut ctx, 93.0);
        }
        assert_eq!(fsm.current_state(), StateId::Ready);
        assert_eq!(ctx.completed_brew.map(|b| b.duration_ms), Some(ctx.config.max_brew_ms));
    }

    #[test]
    fn brew_stops_on_water_loss() {
        let (mut fsm, mut ctx) = ready();
        fsm.dispatch(MachineEvent::StartBrew, &mut ctx);
        ctx.water_ok = false;
        step(&mut fsm, &mut ctx, 93.0);
        assert_eq!(fsm.current_state(), StateId::Ready);
    }

    #[test]
    fn short_shot_is_not_counted() {
        let (mut fsm, mut ctx) = ready();
        fsm.dispatch(MachineEvent::StartBrew, &mut ctx);
        for _ in 0..100 {
            step(&mut fsm, &mut ctx, 93.0);
        }
        fsm.dispatch(MachineEvent::StopBrew(StopReason::User), &mut ctx);
        assert_eq!(ctx.completed_brew.map(|b| b.counted), Some(false));
        assert_eq!(ctx.maintenance.shots_since_backflush, 0);
        assert!(!ctx.maintenance_dirty);
    }

    #[test]
    fn steam_timeout_returns_to_ready() {
        let (mut fsm, mut ctx) = ready();
        fsm.dispatch(MachineEvent::StartSteam, &mut ctx);
        assert_eq!(fsm.current_state(), StateId::Steaming);
        let ticks = u64::from(ctx.config.max_steam_ms) / TICK_MS;
        for _ in 0..ticks {
            step(&mut fsm, &mut ctx, 93.0);
        }
        assert_eq!(fsm.current_state(), StateId::Ready);
    }

    #[test]
    fn backflush_drives_valve_and_pump() {
        let (mut fsm, mut ctx) = ready();
        fsm.dispatch(MachineEvent::StartBackflush, &mut ctx);
        assert_eq!(fsm.current_state(), StateId::Backflush);
        assert!(ctx.commands.brew_valve_open && ctx.commands.pump_duty > 0.0);
        fsm.dispatch(MachineEvent::StopBackflush, &mut ctx);
        assert_eq!(fsm.current_state(), StateId::Ready);
        assert_eq!(ctx.commands, context::ActuatorCommands::all_off());
    }

    #[test]
    fn ready_falls_back_to_heating_on_new_targets() {
        let (mut fsm, mut ctx) = ready();
        assert_eq!(
            fsm.dispatch(MachineEvent::TargetsChanged, &mut ctx),
            EventOutcome::Transition(StateId::Heating)
        );
    }

    #[test]
    fn idle_sleeps_after_timeout() {
        let (mut fsm, mut ctx) = started(25.0);
        ctx.config.idle_timeout_ms = 1_000;
        for _ in 0..100 {
            step(&mut fsm, &mut ctx, 25.0);
        }
        assert_eq!(fsm.current_state(), StateId::Sleep);
        assert_eq!(fsm.dispatch(MachineEvent::Activity, &mut ctx), EventOutcome::Transition(StateId::Idle));
    }

    #[test]
    fn alarm_exits_only_when_critical_cleared() {
        let (mut fsm, mut ctx) = ready();
        ctx.critical_outstanding = true;
        fsm.force_transition(StateId::Alarm, &mut ctx);
        assert!(ctx.boilers.iter().all(|c| !c.enabled && c.heater_duty == 0.0));

        assert_eq!(fsm.dispatch(MachineEvent::AlarmAcknowledged, &mut ctx), EventOutcome::Accepted);
        step(&mut fsm, &mut ctx, 93.0);
        assert_eq!(fsm.current_state(), StateId::Alarm);

        ctx.critical_outstanding = false;
        assert_eq!(
            fsm.dispatch(MachineEvent::AlarmAcknowledged, &mut ctx),
            EventOutcome::Transition(StateId::Idle)
        );
    }

    #[test]
    fn alarm_blocks_everything_else() {
        let (mut fsm, mut ctx) = ready();
        ctx.critical_outstanding = true;
        fsm.force_transition(StateId::Alarm, &mut ctx);
        for ev in [MachineEvent::PowerOn, MachineEvent::StartBrew, MachineEvent::StartSteam] {
            assert_eq!(fsm.dispatch(ev, &mut ctx), EventOutcome::Rejected);
        }
        assert_eq!(ctx.commands, context::ActuatorCommands::all_off());
    }

    #[test]
    fn state_id_from_index_roundtrip() {
        for i in 0..StateId::COUNT {
            assert_eq!(StateId::from_index(i) as usize, i);
        }
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn state_id_from_invalid_index_returns_alarm() {
        assert_eq!(StateId::from_index(99), StateId::Alarm);
    }
}
