//! GPIO / peripheral pin assignments for the crema controller board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Heaters (zero-cross SSRs, active HIGH)
// ---------------------------------------------------------------------------

pub const BREW_HEATER_GPIO: i32 = 1;
pub const STEAM_HEATER_GPIO: i32 = 2;

// ---------------------------------------------------------------------------
// Pump and valves
// ---------------------------------------------------------------------------

/// LEDC PWM output driving the pump's phase-angle module.
pub const PUMP_PWM_GPIO: i32 = 3;
/// Three-way brew solenoid (HIGH = open to group).
pub const BREW_VALVE_GPIO: i32 = 4;

// ---------------------------------------------------------------------------
// Sensors: analog (ADC1)
// ---------------------------------------------------------------------------

/// Brew boiler NTC (50 kΩ @ 25 °C) on ADC1 channel 4 (GPIO 5).
pub const BREW_NTC_GPIO: i32 = 5;
/// Steam boiler NTC on ADC1 channel 5 (GPIO 6).
pub const STEAM_NTC_GPIO: i32 = 6;
/// 0.5–4.5 V pressure transducer via divider on ADC1 channel 6 (GPIO 7).
pub const PRESSURE_GPIO: i32 = 7;

// ---------------------------------------------------------------------------
// Sensors: digital and pulse
// ---------------------------------------------------------------------------

/// Reservoir float switch. HIGH = water present.
pub const TANK_LEVEL_GPIO: i32 = 8;
/// Steam boiler level probe. LOW = probe submerged.
pub const STEAM_LEVEL_GPIO: i32 = 9;
/// Flow meter pulse output, interrupt-driven.
pub const FLOW_PULSE_GPIO: i32 = 10;

// ---------------------------------------------------------------------------
// Hub link (UART1)
// ---------------------------------------------------------------------------

pub const HUB_UART_PORT: i32 = 1;
pub const HUB_UART_TX_GPIO: i32 = 17;
pub const HUB_UART_RX_GPIO: i32 = 18;
pub const HUB_UART_BAUD: i32 = 921_600;

// ---------------------------------------------------------------------------
// Mains power meter (UART2, Modbus RTU)
// ---------------------------------------------------------------------------

pub const METER_UART_PORT: i32 = 2;
pub const METER_UART_TX_GPIO: i32 = 15;
pub const METER_UART_RX_GPIO: i32 = 16;
pub const METER_UART_BAUD: i32 = 9_600;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// LEDC base frequency for the pump dimmer input.
pub const PUMP_PWM_FREQ_HZ: u32 = 1_000;
