//! Hall-effect flow meter on the pump inlet.
//!
//! An ISR increments an atomic counter on each rising edge.  The counter
//! is cumulative and never reset; shot volume is the difference between
//! the counts at the end and the start of the shot.
//!
//! Because the ISR and the control loop run at different priorities,
//! the counter is an `AtomicU32`.

use core::sync::atomic::{AtomicU32, Ordering};

/// Calibration: pulses per litre (Digmesa FHKSC style meter).
const PULSES_PER_LITRE: f32 = 1925.0;

/// Global counter incremented by the GPIO ISR.
/// `static` because ESP-IDF ISR callbacks cannot capture closures.
static FLOW_PULSE_COUNT: AtomicU32 = AtomicU32::new(0);

/// Called from the GPIO ISR on each rising edge.
pub fn flow_isr_handler() {
    FLOW_PULSE_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Inject pulses in host builds.
#[cfg(not(target_os = "espidf"))]
pub fn sim_add_pulses(n: u32) {
    FLOW_PULSE_COUNT.fetch_add(n, Ordering::Relaxed);
}

/// Volume for a pulse delta.  Wrapping deltas are the caller's concern.
pub fn pulses_to_ml(pulses: u32) -> f32 {
    pulses as f32 * 1000.0 / PULSES_PER_LITRE
}

pub struct FlowSensor;

impl FlowSensor {
    pub fn new() -> Self {
        Self
    }

    /// Cumulative pulse count since boot.
    pub fn total_pulses(&self) -> u32 {
        FLOW_PULSE_COUNT.load(Ordering::Relaxed)
    }
}

impl Default for FlowSensor {
    fn default() -> Self {
        Self::new()
    }
}
