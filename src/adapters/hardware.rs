//! Hardware adapter: bridges the board peripherals to the domain ports.
//!
//! Owns the [`SensorHub`] and every actuator driver, exposing them through
//! [`SensorPort`] and [`ActuatorPort`].  This is the only module that
//! touches real outputs.  On non-espidf targets the drivers run against
//! the hw_init simulation backing.

use heapless::Vec;
use log::warn;

use crate::app::ports::{ActuatorPort, SensorPort};
use crate::config::SystemConfig;
use crate::control::boiler::{BoilerId, BoilerRole, Boilers, MAX_BOILERS};
use crate::drivers::gpio::GpioOut;
use crate::drivers::heater::HeaterDriver;
use crate::drivers::pump::PumpDriver;
use crate::drivers::valve::ValveDriver;
use crate::fsm::context::SensorSnapshot;
use crate::pins;
use crate::sensors::SensorHub;

/// SSR output wired to a boiler of the given role.
pub fn heater_gpio_for(role: BoilerRole) -> i32 {
    match role {
        BoilerRole::Brew | BoilerRole::Shared => pins::BREW_HEATER_GPIO,
        BoilerRole::Steam => pins::STEAM_HEATER_GPIO,
    }
}

/// Concrete adapter that combines all hardware behind the port traits.
pub struct HardwareAdapter {
    sensor_hub: SensorHub,
    /// Indexed by `BoilerId`, same order as the service's channels.
    heaters: Vec<HeaterDriver<GpioOut>, MAX_BOILERS>,
    pump: PumpDriver,
    brew_valve: ValveDriver<GpioOut>,
    /// Loop time of the last sensor read; heater windows are timed on it.
    now_ms: u64,
}

impl HardwareAdapter {
    /// Wire up drivers for the configured machine layout.  Every output
    /// starts low.
    pub fn new(cfg: &SystemConfig) -> Self {
        let mut heaters = Vec::new();
        for ch in Boilers::from_config(cfg).iter() {
            let pin = GpioOut::new(heater_gpio_for(ch.role));
            // One heater per channel; the layout never exceeds MAX_BOILERS.
            let _ = heaters.push(HeaterDriver::new(pin));
        }
        Self {
            sensor_hub: SensorHub::new(cfg),
            heaters,
            pump: PumpDriver::new(),
            brew_valve: ValveDriver::new(GpioOut::new(pins::BREW_VALVE_GPIO)),
            now_ms: 0,
        }
    }

    pub fn heater_duty(&self, id: BoilerId) -> Option<f32> {
        self.heaters.get(usize::from(id.0)).map(HeaterDriver::duty)
    }

    /// SSR output state for one boiler.
    pub fn heater_on(&self, id: BoilerId) -> bool {
        self.heaters.get(usize::from(id.0)).is_some_and(HeaterDriver::is_on)
    }

    /// Where heater `idx` starts conducting in each window: right after
    /// the on-time of every lower-numbered heater.
    fn phase_for(&self, idx: usize) -> u64 {
        self.heaters.iter().take(idx).map(HeaterDriver::on_ms).sum()
    }

    pub fn pump(&self) -> &PumpDriver {
        &self.pump
    }

    pub fn brew_valve_open(&self) -> bool {
        self.brew_valve.is_open()
    }
}

// ── SensorPort implementation ─────────────────────────────────

impl SensorPort for HardwareAdapter {
    fn read_all(&mut self, now_ms: u64) -> SensorSnapshot {
        self.now_ms = now_ms;
        self.sensor_hub.read_all(now_ms)
    }
}

// ── ActuatorPort implementation ───────────────────────────────

impl ActuatorPort for HardwareAdapter {
    /// Heaters are staggered inside the window, so channels must be set in
    /// id order each tick for the offsets to use this tick's duties.
    fn set_heater(&mut self, id: BoilerId, duty: f32) {
        let idx = usize::from(id.0);
        let phase_ms = self.phase_for(idx);
        let now_ms = self.now_ms;
        match self.heaters.get_mut(idx) {
            Some(heater) => heater.apply(duty, now_ms, phase_ms),
            None => warn!("hardware: no heater for {}", id),
        }
    }

    fn set_pump(&mut self, duty: f32) {
        self.pump.set(duty);
    }

    fn set_brew_valve(&mut self, open: bool) {
        self.brew_valve.set(open);
    }

    fn all_off(&mut self) {
        for heater in &mut self.heaters {
            heater.off();
        }
        self.pump.stop();
        self.brew_valve.set(false);
    }
}
