//! Reservoir float switch and steam boiler level probe.
//!
//! The float switch reads HIGH when the tank has water.  The steam
//! boiler probe pulls its input LOW when submerged.  Both inputs are
//! debounced: a new level is accepted only after three consecutive
//! identical samples.

use crate::drivers::hw_init;
use crate::pins;

const DEBOUNCE_SAMPLES: u8 = 3;

/// Three-sample digital debouncer.
#[derive(Debug, Clone, Copy)]
pub struct Debounced {
    stable: bool,
    candidate: bool,
    count: u8,
}

impl Debounced {
    pub const fn new(initial: bool) -> Self {
        Self {
            stable: initial,
            candidate: initial,
            count: 0,
        }
    }

    pub fn update(&mut self, sample: bool) -> bool {
        if sample == self.stable {
            self.count = 0;
            self.candidate = sample;
        } else if sample == self.candidate {
            self.count += 1;
            if self.count >= DEBOUNCE_SAMPLES {
                self.stable = sample;
                self.count = 0;
            }
        } else {
            self.candidate = sample;
            self.count = 1;
        }
        self.stable
    }

    pub fn get(&self) -> bool {
        self.stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterLevelReading {
    pub tank_ok: bool,
    pub boiler_level_ok: bool,
}

pub struct WaterLevelSensor {
    tank: Debounced,
    boiler: Debounced,
    /// Plumbed machines have no float switch; the tank always reads OK.
    plumbed: bool,
    /// Only steam-capable boilers carry a level probe.
    has_level_probe: bool,
}

impl WaterLevelSensor {
    pub fn new(plumbed: bool, has_level_probe: bool) -> Self {
        Self {
            tank: Debounced::new(true),
            boiler: Debounced::new(true),
            plumbed,
            has_level_probe,
        }
    }

    pub fn read(&mut self) -> WaterLevelReading {
        let tank_ok = if self.plumbed {
            true
        } else {
            let before = self.tank.get();
            let now = self.tank.update(hw_init::gpio_read(pins::TANK_LEVEL_GPIO));
            if before != now {
                log::info!("water: tank {}", if now { "refilled" } else { "empty" });
            }
            now
        };

        let boiler_level_ok = if self.has_level_probe {
            let before = self.boiler.get();
            let now = self
                .boiler
                .update(!hw_init::gpio_read(pins::STEAM_LEVEL_GPIO));
            if before != now {
                log::info!("water: boiler level {}", if now { "ok" } else { "low" });
            }
            now
        } else {
            true
        };

        WaterLevelReading {
            tank_ok,
            boiler_level_ok,
        }
    }
}
