//! One-shot hardware peripheral initialization.
//!
//! Configures ADC channels, GPIO directions, and the pump LEDC
//! timer/channel using raw ESP-IDF sys calls. Called once from `main()`
//! before the control loop starts.
//!
//! Host builds replace the register accesses with atomics so sensor and
//! driver code runs unchanged under `cargo test`.

#[cfg(not(target_os = "espidf"))]
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

// ── Error type ────────────────────────────────────────────────

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    AdcInitFailed(i32),
    GpioConfigFailed(i32),
    LedcInitFailed,
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AdcInitFailed(rc) => write!(f, "ADC1 init failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcInitFailed => write!(f, "LEDC timer/channel config failed"),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

impl From<HwInitError> for crate::error::Error {
    fn from(_: HwInitError) -> Self {
        Self::Init("peripheral init")
    }
}

#[cfg(target_os = "espidf")]
use log::info;

use crate::error::SensorError;
use crate::pins;

pub const ADC1_CH_BREW_NTC: u32 = 4;
pub const ADC1_CH_STEAM_NTC: u32 = 5;
pub const ADC1_CH_PRESSURE: u32 = 6;

pub const LEDC_CH_PUMP: u32 = 0;

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once from main() before the control loop; single-threaded.
    unsafe {
        init_gpio_outputs()?;
        init_adc()?;
        init_gpio_inputs()?;
        init_ledc()?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── Host simulation backing ───────────────────────────────────

#[cfg(not(target_os = "espidf"))]
static SIM_ADC: [AtomicU16; 10] = [const { AtomicU16::new(2048) }; 10];

/// Channels whose next conversions fail, one bit per channel.
#[cfg(not(target_os = "espidf"))]
static SIM_ADC_FAIL: AtomicU16 = AtomicU16::new(0);

/// Pin levels, one bit per GPIO.  Tank float reads "water present" at boot.
#[cfg(not(target_os = "espidf"))]
static SIM_GPIO: AtomicU64 = AtomicU64::new(1 << pins::TANK_LEVEL_GPIO);

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_adc(channel: u32, raw: u16) {
    if let Some(slot) = SIM_ADC.get(channel as usize) {
        slot.store(raw, Ordering::Relaxed);
    }
}

/// Make conversions on `channel` fail until cleared.
#[cfg(not(target_os = "espidf"))]
pub fn sim_fail_adc(channel: u32, fail: bool) {
    let bit = 1u16 << channel.min(15);
    if fail {
        SIM_ADC_FAIL.fetch_or(bit, Ordering::Relaxed);
    } else {
        SIM_ADC_FAIL.fetch_and(!bit, Ordering::Relaxed);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn sim_set_gpio(pin: i32, high: bool) {
    let bit = 1u64 << pin;
    if high {
        SIM_GPIO.fetch_or(bit, Ordering::Relaxed);
    } else {
        SIM_GPIO.fetch_and(!bit, Ordering::Relaxed);
    }
}

// ── ADC (oneshot) ─────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static mut ADC1_HANDLE: adc_oneshot_unit_handle_t = core::ptr::null_mut();

/// SAFETY: Must be called only from the single-threaded init path or the
/// control-loop ADC read path.  `init_adc()` completes before the loop
/// starts, so there is no concurrent access.
#[cfg(target_os = "espidf")]
unsafe fn adc1_handle() -> adc_oneshot_unit_handle_t {
    unsafe { ADC1_HANDLE }
}

#[cfg(target_os = "espidf")]
unsafe fn init_adc() -> Result<(), HwInitError> {
    let init_cfg = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    // SAFETY: ADC1_HANDLE is only written here, once at boot.
    let ret = unsafe { adc_oneshot_new_unit(&init_cfg, &raw mut ADC1_HANDLE) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::AdcInitFailed(ret));
    }

    let chan_cfg = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
    };

    for channel in [ADC1_CH_BREW_NTC, ADC1_CH_STEAM_NTC, ADC1_CH_PRESSURE] {
        let ret = unsafe { adc_oneshot_config_channel(adc1_handle(), channel, &chan_cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::AdcInitFailed(ret));
        }
    }

    info!("hw_init: ADC1 configured (CH4=brew NTC, CH5=steam NTC, CH6=pressure)");
    Ok(())
}

/// Raw 12-bit reading.
#[cfg(target_os = "espidf")]
pub fn adc1_read(channel: u32) -> Result<u16, SensorError> {
    let mut raw: i32 = 0;
    // SAFETY: adc1_handle() contract, control-loop access only.
    let ret = unsafe { adc_oneshot_read(adc1_handle(), channel, &mut raw) };
    if ret != ESP_OK as i32 {
        return Err(SensorError::AdcReadFailed);
    }
    Ok(raw.max(0) as u16)
}

#[cfg(not(target_os = "espidf"))]
pub fn adc1_read(channel: u32) -> Result<u16, SensorError> {
    if channel < 16 && SIM_ADC_FAIL.load(Ordering::Relaxed) & (1 << channel) != 0 {
        return Err(SensorError::AdcReadFailed);
    }
    SIM_ADC
        .get(channel as usize)
        .map(|slot| slot.load(Ordering::Relaxed))
        .ok_or(SensorError::AdcReadFailed)
}

// ── GPIO Inputs ───────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_inputs() -> Result<(), HwInitError> {
    let input_pins = [
        pins::TANK_LEVEL_GPIO,
        pins::STEAM_LEVEL_GPIO,
        pins::FLOW_PULSE_GPIO,
    ];

    for &pin in &input_pins {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
    }

    info!("hw_init: GPIO inputs configured");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: gpio_get_level is a read-only register access on an
    // already-configured input pin.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(pin: i32) -> bool {
    SIM_GPIO.load(Ordering::Relaxed) & (1u64 << pin) != 0
}

// ── GPIO Outputs ──────────────────────────────────────────────

/// Heater SSRs and the brew valve.  Driven LOW before anything else is
/// configured so a reboot never leaves a heater latched on.
#[cfg(target_os = "espidf")]
unsafe fn init_gpio_outputs() -> Result<(), HwInitError> {
    let output_pins = [
        pins::BREW_HEATER_GPIO,
        pins::STEAM_HEATER_GPIO,
        pins::BREW_VALVE_GPIO,
    ];

    for &pin in &output_pins {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_ENABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
        unsafe { gpio_set_level(pin, 0) };
    }

    info!("hw_init: GPIO outputs configured (all low)");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: gpio_set_level writes to an output pin configured in
    // init_gpio_outputs(). Control loop only.
    unsafe {
        gpio_set_level(pin, u32::from(high));
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(pin: i32, high: bool) {
    sim_set_gpio(pin, high);
}

// ── LEDC PWM ─────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_ledc() -> Result<(), HwInitError> {
    // Timer 0: pump dimmer input (1 kHz, 8-bit)
    let timer0 = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: ledc_timer_bit_t_LEDC_TIMER_8_BIT,
        freq_hz: pins::PUMP_PWM_FREQ_HZ,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    if unsafe { ledc_timer_config(&timer0) } != ESP_OK as i32 {
        return Err(HwInitError::LedcInitFailed);
    }

    let ret = unsafe {
        ledc_channel_config(&ledc_channel_config_t {
            speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
            channel: LEDC_CH_PUMP,
            timer_sel: ledc_timer_t_LEDC_TIMER_0,
            gpio_num: pins::PUMP_PWM_GPIO,
            duty: 0,
            hpoint: 0,
            ..Default::default()
        })
    };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::LedcInitFailed);
    }

    info!("hw_init: LEDC configured (pump=CH0)");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, duty: u8) {
    // SAFETY: LEDC channels were configured in init_ledc(); only the
    // control loop writes the duty register.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, u32::from(duty));
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set(channel: u32, duty: u8) {
    log::trace!("hw_init(sim): LEDC ch{} duty {}", channel, duty);
}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn flow_gpio_isr(_arg: *mut core::ffi::c_void) {
    crate::sensors::flow::flow_isr_handler();
}

/// Install the GPIO ISR service and register the flow meter handler.
/// Call after init_peripherals() and before the control loop.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> Result<(), HwInitError> {
    // SAFETY: ESP_ERR_INVALID_STATE means the service was already
    // installed.  The handler only increments an atomic.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        gpio_set_intr_type(pins::FLOW_PULSE_GPIO, gpio_int_type_t_GPIO_INTR_POSEDGE);
        let ret = gpio_isr_handler_add(
            pins::FLOW_PULSE_GPIO,
            Some(flow_gpio_isr),
            core::ptr::null_mut(),
        );
        if ret != ESP_OK {
            return Err(HwInitError::IsrInstallFailed(ret));
        }
        gpio_intr_enable(pins::FLOW_PULSE_GPIO);

        info!("hw_init: ISR service installed (flow)");
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): ISR service skipped");
    Ok(())
}
