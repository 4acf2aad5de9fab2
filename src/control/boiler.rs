//! Boiler channels and the arena that owns them.
//!
//! One [`BoilerChannel`] per physical boiler, addressed by [`BoilerId`].
//! The layout is fixed at boot from [`MachineType`]; nothing is added or
//! removed afterwards.

use heapless::Vec;

use crate::config::{HeatingStrategy, MachineType, PidGains, SystemConfig};
use crate::control::pid::PidState;

/// Upper bound on boilers per machine.
pub const MAX_BOILERS: usize = 2;

/// Hard brew-side ceiling, independent of configuration.
pub const FIRMWARE_MAX_BREW_C: f32 = 130.0;
/// Hard steam-side ceiling, independent of configuration.
pub const FIRMWARE_MAX_STEAM_C: f32 = 165.0;

/// Fraction of the supply current the heaters may draw together.
const CURRENT_HEADROOM: f32 = 0.95;

// Channel fault flags (bitmask in `BoilerChannel::fault_flags`).
pub const FAULT_SENSOR: u8 = 0b0000_0001;
pub const FAULT_OVER_TEMP: u8 = 0b0000_0010;

/// Index of a boiler in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoilerId(pub u8);

impl core::fmt::Display for BoilerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "boiler#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoilerRole {
    /// Dedicated brew boiler.
    Brew,
    /// Dedicated steam boiler (also the HX boiler).
    Steam,
    /// Single boiler switched between brew and steam temperature.
    Shared,
}

impl BoilerRole {
    /// Effective over-temperature ceiling: the lower of the configured
    /// and firmware limits.
    pub fn ceiling_c(self, cfg: &SystemConfig) -> f32 {
        match self {
            Self::Brew => cfg.brew_max_temp_c.min(FIRMWARE_MAX_BREW_C),
            Self::Steam | Self::Shared => cfg.steam_max_temp_c.min(FIRMWARE_MAX_STEAM_C),
        }
    }

    /// Heater power in watts for the current budget.
    pub fn heater_watts(self, cfg: &SystemConfig) -> f32 {
        match self {
            Self::Brew => cfg.brew_heater_w,
            Self::Steam | Self::Shared => cfg.steam_heater_w,
        }
    }

    pub fn gains(self, cfg: &SystemConfig) -> PidGains {
        match self {
            Self::Brew | Self::Shared => cfg.brew_pid,
            Self::Steam => cfg.steam_pid,
        }
    }
}

/// Control state for one boiler.
#[derive(Debug, Clone, Copy)]
pub struct BoilerChannel {
    pub id: BoilerId,
    pub role: BoilerRole,
    pub setpoint_c: f32,
    pub measured_c: Option<f32>,
    pub pid: PidState,
    /// Heater duty fraction in `[0, 1]`.
    pub heater_duty: f32,
    pub fault_flags: u8,
    pub enabled: bool,
}

impl BoilerChannel {
    pub fn new(id: BoilerId, role: BoilerRole, gains: PidGains) -> Self {
        Self {
            id,
            role,
            setpoint_c: 0.0,
            measured_c: None,
            pid: PidState::new(gains),
            heater_duty: 0.0,
            fault_flags: 0,
            enabled: false,
        }
    }

    /// True when the measured temperature sits within `tolerance` of the setpoint.
    pub fn in_band(&self, tolerance: f32) -> bool {
        self.measured_c
            .is_some_and(|t| (t - self.setpoint_c).abs() <= tolerance)
    }
}

/// Fixed arena of boiler channels.
#[derive(Debug, Clone)]
pub struct Boilers {
    machine: MachineType,
    channels: Vec<BoilerChannel, MAX_BOILERS>,
}

impl Boilers {
    /// Build the channel layout for the configured machine type.
    pub fn from_config(cfg: &SystemConfig) -> Self {
        let roles: &[BoilerRole] = match cfg.machine_type {
            MachineType::DualBoiler => &[BoilerRole::Brew, BoilerRole::Steam],
            MachineType::SingleBoiler => &[BoilerRole::Shared],
            MachineType::HeatExchanger => &[BoilerRole::Steam],
        };
        let mut channels = Vec::new();
        for (idx, &role) in roles.iter().enumerate() {
            let ch = BoilerChannel::new(BoilerId(idx as u8), role, role.gains(cfg));
            // Capacity covers every layout above.
            let _ = channels.push(ch);
        }
        Self {
            machine: cfg.machine_type,
            channels,
        }
    }

    pub fn machine_type(&self) -> MachineType {
        self.machine
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: BoilerId) -> Option<&BoilerChannel> {
        self.channels.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: BoilerId) -> Option<&mut BoilerChannel> {
        self.channels.get_mut(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoilerChannel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BoilerChannel> {
        self.channels.iter_mut()
    }

    /// Channel whose temperature governs the shot.
    pub fn brew_channel(&self) -> Option<BoilerId> {
        self.find(|r| matches!(r, BoilerRole::Brew | BoilerRole::Shared))
            .or_else(|| self.find(|r| r == BoilerRole::Steam))
    }

    /// Channel that supplies steam.
    pub fn steam_channel(&self) -> Option<BoilerId> {
        self.find(|r| matches!(r, BoilerRole::Steam | BoilerRole::Shared))
    }

    /// Zero every heater duty.  Used by the emergency cutoff path.
    pub fn zero_all_duty(&mut self) {
        for ch in &mut self.channels {
            ch.heater_duty = 0.0;
        }
    }

    /// True when every enabled channel is inside the band.
    pub fn all_enabled_in_band(&self, tolerance: f32) -> bool {
        let mut any = false;
        for ch in self.channels.iter().filter(|c| c.enabled) {
            any = true;
            if !ch.in_band(tolerance) {
                return false;
            }
        }
        any
    }

    fn find(&self, pred: impl Fn(BoilerRole) -> bool) -> Option<BoilerId> {
        self.channels.iter().find(|c| pred(c.role)).map(|c| c.id)
    }
}

// ── Power budget ──────────────────────────────────────────────

/// Current the heaters may draw at any instant.
pub fn current_budget_a(cfg: &SystemConfig) -> f32 {
    cfg.max_current_a * CURRENT_HEADROOM
}

/// Mains current of a heater of `watts` while it conducts.
pub fn heater_current_a(cfg: &SystemConfig, watts: f32) -> f32 {
    if cfg.mains_voltage > 0.0 {
        watts / cfg.mains_voltage
    } else {
        f32::INFINITY
    }
}

/// Both heaters conducting together stay inside the budget.
pub fn heaters_fit_together(cfg: &SystemConfig) -> bool {
    heater_current_a(cfg, cfg.brew_heater_w) + heater_current_a(cfg, cfg.steam_heater_w)
        <= current_budget_a(cfg)
}

/// Whether the heaters must take turns inside the SSR window.
///
/// Sequential always alternates.  Every other strategy alternates only
/// when the two heaters together would exceed the budget.
pub fn heaters_exclusive(cfg: &SystemConfig) -> bool {
    cfg.machine_type == MachineType::DualBoiler
        && (cfg.heating_strategy == HeatingStrategy::Sequential || !heaters_fit_together(cfg))
}

/// Highest duty a non-brew heater may take while the brew heater runs at
/// `brew_duty`.  Exclusive heaters get the remainder of the window, which
/// the hardware adapter phases after the brew on-time.
pub fn window_share(cfg: &SystemConfig, brew_duty: f32) -> f32 {
    if heaters_exclusive(cfg) {
        (1.0 - brew_duty).clamp(0.0, 1.0)
    } else {
        1.0
    }
}
