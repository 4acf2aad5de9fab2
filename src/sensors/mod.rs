//! Sensor subsystem: individual drivers and the aggregating [`SensorHub`].
//!
//! The hub owns every sensor driver and produces a [`SensorSnapshot`] each
//! tick that the service writes into `MachineContext.sensors`.

pub mod filter;
pub mod flow;
pub mod pressure;
pub mod temperature;
pub mod water_level;

use heapless::Vec;

use crate::config::{MachineType, SystemConfig};
use crate::control::boiler::{BoilerRole, Boilers, MAX_BOILERS};
use crate::drivers::hw_init;
use crate::fsm::context::{Sample, SensorSnapshot};
use crate::safety::plausible_temp;
use flow::FlowSensor;
use pressure::PressureSensor;
use temperature::NtcProbe;
use water_level::WaterLevelSensor;

/// ADC channel of the probe fitted to a boiler of the given role.
pub fn ntc_channel_for(role: BoilerRole) -> u32 {
    match role {
        BoilerRole::Brew | BoilerRole::Shared => hw_init::ADC1_CH_BREW_NTC,
        BoilerRole::Steam => hw_init::ADC1_CH_STEAM_NTC,
    }
}

/// Aggregates all sensor drivers and produces a unified snapshot.
pub struct SensorHub {
    probes: Vec<NtcProbe, MAX_BOILERS>,
    pressure: PressureSensor,
    water_level: WaterLevelSensor,
    flow: FlowSensor,
    /// Last good reading per channel, kept with its original timestamp.
    last_temps: [Option<Sample>; MAX_BOILERS],
    last_pressure: Option<Sample>,
}

impl SensorHub {
    /// One probe per boiler channel, in channel order.
    pub fn new(cfg: &SystemConfig) -> Self {
        let boilers = Boilers::from_config(cfg);
        let mut probes = Vec::new();
        for ch in boilers.iter() {
            // Boilers never exceeds MAX_BOILERS channels.
            let _ = probes.push(NtcProbe::new(ntc_channel_for(ch.role)));
        }
        let has_level_probe = matches!(
            cfg.machine_type,
            MachineType::DualBoiler | MachineType::HeatExchanger
        );
        Self {
            probes,
            pressure: PressureSensor::new(hw_init::ADC1_CH_PRESSURE),
            water_level: WaterLevelSensor::new(cfg.plumbed, has_level_probe),
            flow: FlowSensor::new(),
            last_temps: [None; MAX_BOILERS],
            last_pressure: None,
        }
    }

    /// Read every sensor and return a unified snapshot.
    ///
    /// A failed or implausible read repeats the last good sample with its
    /// original `at_ms`, so a single glitch only ages the value and the
    /// safety monitor's staleness limit decides when it becomes a fault.
    /// A channel that has never read good stays `None`.
    pub fn read_all(&mut self, now_ms: u64) -> SensorSnapshot {
        let mut snap = SensorSnapshot::default();
        let channels = snap
            .boiler_temps
            .iter_mut()
            .zip(self.probes.iter_mut())
            .zip(self.last_temps.iter_mut());
        for ((slot, probe), last) in channels {
            match probe.read() {
                Ok(c) if plausible_temp(c) => *last = Some(Sample::new(c, now_ms)),
                Ok(_) | Err(_) => {}
            }
            *slot = *last;
        }
        if let Ok(bar) = self.pressure.read() {
            self.last_pressure = Some(Sample::new(bar, now_ms));
        }
        snap.pressure_bar = self.last_pressure;

        let levels = self.water_level.read();
        snap.tank_water_ok = levels.tank_ok;
        snap.boiler_level_ok = levels.boiler_level_ok;
        snap.flow_pulses = self.flow.total_pulses();
        snap
    }
}
