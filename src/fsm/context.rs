//! Shared mutable context threaded through every FSM handler.
//!
//! `MachineContext` is the single struct that state handlers read from and
//! write to.  It holds the latest sensor snapshot, the boiler arena,
//! actuator commands, timing, configuration, the safety verdict and the
//! brew bookkeeping.  The service owns it; handlers borrow it.

use crate::config::SystemConfig;
use crate::control::boiler::{BoilerId, Boilers, MAX_BOILERS};
use crate::maintenance::MaintenanceCounters;
use crate::sensors::flow;

// ---------------------------------------------------------------------------
// Sensor snapshot (read-only to state handlers; written by the sensor port)
// ---------------------------------------------------------------------------

/// One timestamped measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub value: f32,
    /// Control-loop time at which the value was taken.
    pub at_ms: u64,
}

impl Sample {
    pub const fn new(value: f32, at_ms: u64) -> Self {
        Self { value, at_ms }
    }

    /// Age of the sample relative to `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.at_ms)
    }
}

/// A point-in-time snapshot of every sensor in the machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorSnapshot {
    /// Boiler temperatures (°C) indexed by `BoilerId`.  `None` until the
    /// probe first reads good; after that a failed read repeats the last
    /// good sample, which ages until it goes stale.
    pub boiler_temps: [Option<Sample>; MAX_BOILERS],
    /// Group pressure (bar).
    pub pressure_bar: Option<Sample>,
    /// Reservoir float switch, debounced.  True = water present.
    pub tank_water_ok: bool,
    /// Steam boiler level probe, debounced.  True = probe submerged.
    pub boiler_level_ok: bool,
    /// Cumulative flow meter pulses since boot.
    pub flow_pulses: u32,
}

impl SensorSnapshot {
    pub fn boiler_temp(&self, id: BoilerId) -> Option<Sample> {
        self.boiler_temps.get(id.0 as usize).copied().flatten()
    }
}

// ---------------------------------------------------------------------------
// Actuator commands (written by entry/exit actions; consumed by the service)
// ---------------------------------------------------------------------------

/// Pump and valve requests.  Heater duty lives on each boiler channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActuatorCommands {
    /// Pump duty fraction, 0.0 = off.
    pub pump_duty: f32,
    /// Three-way brew solenoid.
    pub brew_valve_open: bool,
}

impl ActuatorCommands {
    /// Pump stopped, valve closed.
    pub fn all_off() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Brew bookkeeping
// ---------------------------------------------------------------------------

/// Running measurements of the shot in progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrewTracker {
    pub started_at_ms: u64,
    pub start_pulses: u32,
    pub peak_pressure_bar: f32,
    pub peak_temp_c: f32,
}

/// Result of a finished shot, handed to the service for publication.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrewSummary {
    pub duration_ms: u32,
    pub peak_pressure_bar: f32,
    pub peak_temp_c: f32,
    pub volume_ml: f32,
    /// Whether the shot was long enough to count toward maintenance.
    pub counted: bool,
}

// ---------------------------------------------------------------------------
// MachineContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct MachineContext {
    // -- Timing --
    /// Control-loop time of the current tick.
    pub now_ms: u64,
    /// Ticks elapsed since the current state was entered.
    pub ticks_in_state: u64,
    /// Monotonic total tick count.
    pub total_ticks: u64,
    /// Time at which the current state was entered.
    pub state_entered_ms: u64,

    // -- Inputs --
    pub sensors: SensorSnapshot,

    // -- Outputs --
    pub boilers: Boilers,
    pub commands: ActuatorCommands,

    // -- Configuration --
    pub config: SystemConfig,

    // -- Safety verdict (written by the service before each FSM tick) --
    /// A Critical alarm is active or unacknowledged.
    pub critical_outstanding: bool,
    /// Level interlocks allow the heaters to run.
    pub heating_permitted: bool,
    /// Water is available for brewing.
    pub water_ok: bool,

    // -- Heating --
    /// When every enabled boiler entered the ready band.
    pub in_band_since_ms: Option<u64>,
    /// Sequential strategy: steam boiler released once brew reached band.
    pub steam_released: bool,

    // -- Brewing --
    pub brew: BrewTracker,
    /// Set by the Brewing exit action; drained by the service.
    pub completed_brew: Option<BrewSummary>,

    // -- Maintenance --
    pub maintenance: MaintenanceCounters,
    /// Counters changed since the last successful save.
    pub maintenance_dirty: bool,

    // -- Activity --
    pub last_activity_ms: u64,
}

impl MachineContext {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            now_ms: 0,
            ticks_in_state: 0,
            total_ticks: 0,
            state_entered_ms: 0,
            sensors: SensorSnapshot::default(),
            boilers: Boilers::from_config(&config),
            commands: ActuatorCommands::all_off(),
            config,
            critical_outstanding: false,
            heating_permitted: false,
            water_ok: false,
            in_band_since_ms: None,
            steam_released: false,
            brew: BrewTracker::default(),
            completed_brew: None,
            maintenance: MaintenanceCounters::default(),
            maintenance_dirty: false,
            last_activity_ms: 0,
        }
    }

    /// Milliseconds since the current state was entered.
    pub fn ms_in_state(&self) -> u64 {
        self.now_ms.saturating_sub(self.state_entered_ms)
    }

    /// Milliseconds without user activity in the current state.
    pub fn inactive_ms(&self) -> u64 {
        self.now_ms
            .saturating_sub(self.last_activity_ms.max(self.state_entered_ms))
    }

    /// Record user activity at the current time.
    pub fn touch(&mut self) {
        self.last_activity_ms = self.now_ms;
    }

    /// Volume dispensed since the brew tracker was started.
    pub fn brew_volume_ml(&self) -> f32 {
        flow::pulses_to_ml(self.sensors.flow_pulses.wrapping_sub(self.brew.start_pulses))
    }
}
