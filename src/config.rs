//! System configuration parameters
//!
//! All tunable parameters for the espresso machine.
//! Values can be overridden via NVS (non-volatile storage) or the hub link.

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Daily wake-up slots.
pub const MAX_WAKE_TIMES: usize = 4;

/// Boiler layout of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineType {
    /// Separate brew and steam boilers.
    DualBoiler,
    /// One boiler switched between brew and steam temperature.
    SingleBoiler,
    /// One steam boiler; brew water passes through a heat exchanger.
    HeatExchanger,
}

/// How heater power is shared between boilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeatingStrategy {
    /// Only the brew boiler heats.
    BrewOnly,
    /// Brew heats first; steam starts once brew is in band and then only
    /// uses the part of each SSR window the brew heater leaves free.
    Sequential,
    /// Both heat at full power.  Only valid when both fit the current budget.
    Parallel,
    /// Both heat; they take turns within the SSR window whenever running
    /// together would exceed the current budget.
    SmartStagger,
}

/// PID gains for one boiler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Machine ---
    pub machine_type: MachineType,
    pub heating_strategy: HeatingStrategy,
    /// Plumbed-in machines have no reservoir to monitor.
    pub plumbed: bool,

    // --- Temperatures (°C) ---
    pub brew_target_c: f32,
    pub steam_target_c: f32,
    /// Configured ceiling; the firmware ceiling still applies on top.
    pub brew_max_temp_c: f32,
    pub steam_max_temp_c: f32,
    /// Setpoint held while asleep (0 = heaters off).
    pub sleep_setpoint_c: f32,
    /// Band around the setpoint that counts as "ready".
    pub ready_tolerance_c: f32,
    pub ready_debounce_ms: u32,

    // --- Control ---
    pub brew_pid: PidGains,
    pub steam_pid: PidGains,

    // --- Pressure ---
    pub max_pressure_bar: f32,

    // --- Power budget ---
    pub mains_voltage: f32,
    pub max_current_a: f32,
    pub brew_heater_w: f32,
    pub steam_heater_w: f32,

    // --- Timing ---
    /// Control loop interval (milliseconds)
    pub control_loop_interval_ms: u32,
    pub max_brew_ms: u32,
    pub max_steam_ms: u32,
    pub backflush_ms: u32,
    /// Inactivity before Idle/Ready drop to Sleep.
    pub idle_timeout_ms: u32,
    /// A reading older than this is treated as a sensor fault.
    pub sensor_stale_ms: u32,

    // --- Link ---
    pub max_frames_per_tick: u8,
    pub status_interval_ms: u32,
    pub link_error_threshold: u16,
    pub link_error_window_ms: u32,

    // --- OTA ---
    pub ota_chunk_timeout_ms: u32,
    pub ota_session_timeout_ms: u32,

    // --- Maintenance ---
    pub backflush_threshold: u16,
    pub group_clean_threshold: u16,
    pub descale_threshold: u16,
    /// Shots shorter than this are not counted.
    pub min_shot_ms: u32,

    // --- Wake schedule ---
    /// Hours of day (0-23) at which the machine heats up by itself.
    pub wake_hours: Vec<u8, MAX_WAKE_TIMES>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Machine
            machine_type: MachineType::DualBoiler,
            heating_strategy: HeatingStrategy::Sequential,
            plumbed: false,

            // Temperatures
            brew_target_c: 93.0,
            steam_target_c: 140.0,
            brew_max_temp_c: 120.0,
            steam_max_temp_c: 160.0,
            sleep_setpoint_c: 0.0,
            ready_tolerance_c: 1.0,
            ready_debounce_ms: 3_000,

            // Control
            brew_pid: PidGains {
                kp: 2.0,
                ki: 0.1,
                kd: 0.5,
            },
            steam_pid: PidGains {
                kp: 3.0,
                ki: 0.05,
                kd: 1.0,
            },

            // Pressure
            max_pressure_bar: 13.0,

            // Power budget (EU mains, 16 A circuit)
            mains_voltage: 230.0,
            max_current_a: 16.0,
            brew_heater_w: 1_000.0,
            steam_heater_w: 1_400.0,

            // Timing
            control_loop_interval_ms: 10, // 100 Hz
            max_brew_ms: 60_000,
            max_steam_ms: 120_000,
            backflush_ms: 10_000,
            idle_timeout_ms: 30 * 60 * 1_000,
            sensor_stale_ms: 500,

            // Link
            max_frames_per_tick: 4,
            status_interval_ms: 1_000,
            link_error_threshold: 20,
            link_error_window_ms: 5_000,

            // OTA
            ota_chunk_timeout_ms: 5_000,
            ota_session_timeout_ms: 10 * 60 * 1_000,

            // Maintenance
            backflush_threshold: 100,
            group_clean_threshold: 200,
            descale_threshold: 1_000,
            min_shot_ms: 15_000,

            wake_hours: Vec::new(),
        }
    }
}
