//! Ratiometric pressure transducer (0.5–4.5 V ⇒ 0–16 bar).
//!
//! The 5 V sensor output is scaled into the ADC range by a resistor
//! divider.  Readings outside the live band by more than a small margin
//! mean a broken wire or a shorted sensor and are reported as errors;
//! readings just outside the band are clamped.

use crate::drivers::hw_init;
use crate::error::SensorError;
use crate::sensors::filter::AnalogFilter;

const ADC_MAX: f32 = 4095.0;
const V_REF: f32 = 3.3;
/// 10k / (5.1k + 10k)
const DIVIDER_RATIO: f32 = 10.0 / 15.1;

const V_ZERO: f32 = 0.5;
const V_FULL: f32 = 4.5;
pub const FULL_SCALE_BAR: f32 = 16.0;
const FAULT_MARGIN_V: f32 = 0.25;

/// Convert a raw 12-bit ADC value to bar.
pub fn adc_to_bar(raw: u16) -> Result<f32, SensorError> {
    let v_sensor = (f32::from(raw) / ADC_MAX) * V_REF / DIVIDER_RATIO;
    if v_sensor < V_ZERO - FAULT_MARGIN_V {
        return Err(SensorError::OpenCircuit);
    }
    if v_sensor > V_FULL + FAULT_MARGIN_V {
        return Err(SensorError::ShortCircuit);
    }
    let bar = (v_sensor - V_ZERO) / (V_FULL - V_ZERO) * FULL_SCALE_BAR;
    Ok(bar.clamp(0.0, FULL_SCALE_BAR))
}

pub struct PressureSensor {
    adc_channel: u32,
    filter: AnalogFilter,
    faulted: bool,
}

impl PressureSensor {
    pub fn new(adc_channel: u32) -> Self {
        Self {
            adc_channel,
            filter: AnalogFilter::new(),
            faulted: false,
        }
    }

    pub fn read(&mut self) -> Result<f32, SensorError> {
        match hw_init::adc1_read(self.adc_channel).and_then(adc_to_bar) {
            Ok(bar) => {
                if self.faulted {
                    log::info!("pressure: sensor recovered");
                    self.faulted = false;
                }
                Ok(self.filter.push(bar))
            }
            Err(e) => {
                if !self.faulted {
                    log::warn!("pressure: {}", e);
                    self.faulted = true;
                }
                self.filter.reset();
                Err(e)
            }
        }
    }
}
