//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, queue a frame for the
//! hub, or both.

use heapless::Vec;

use crate::alarms::{ALARM_CAPACITY, AlarmCode, AlarmRecord};
use crate::control::boiler::{BoilerId, MAX_BOILERS};
use crate::fsm::context::BrewSummary;
use crate::fsm::{MachineEvent, StateId};
use crate::maintenance::MaintenanceCounters;

use super::ports::PowerReading;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The service has started (carries initial state).
    Started(StateId),

    /// The FSM transitioned between states.
    StateChanged { from: StateId, to: StateId },

    /// An alarm was raised, escalated or cleared.
    AlarmChanged(AlarmRecord),

    /// A shot finished.
    BrewCompleted(BrewSummary),

    /// An event was refused in the current state.
    CommandRejected { event: MachineEvent, state: StateId },

    /// Periodic status snapshot.
    Telemetry(StatusReport),
}

/// Per-boiler slice of a [`StatusReport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoilerStatus {
    pub id: BoilerId,
    pub temp_c: Option<f32>,
    pub setpoint_c: f32,
    pub duty: f32,
}

/// A point-in-time machine snapshot, the content of the `Status` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: StateId,
    pub boilers: Vec<BoilerStatus, MAX_BOILERS>,
    pub pressure_bar: Option<f32>,
    pub tank_ok: bool,
    pub level_ok: bool,
    pub backflush_due: bool,
    pub group_clean_due: bool,
    pub descale_due: bool,
    pub ota_active: bool,
    pub counters: MaintenanceCounters,
    /// Latest mains reading, `None` when no meter answers.
    pub power: Option<PowerReading>,
    pub active_alarms: Vec<AlarmCode, ALARM_CAPACITY>,
}
