//! NTC boiler probe (50 kOhm @ 25 C, B = 3950).
//!
//! Wired in a voltage divider with a fixed 50 kOhm resistor and read via
//! the ESP32-S3 ADC.  The Beta equation converts resistance to
//! temperature.  Open and shorted probes read as errors, never as a
//! temperature.
//!
//! On host builds the ADC is backed by [`hw_init::sim_set_adc`].

use crate::drivers::hw_init;
use crate::error::SensorError;
use crate::sensors::filter::AnalogFilter;

const R25: f32 = 50_000.0;
const BETA: f32 = 3950.0;
const T25_K: f32 = 298.15;
const R_DIVIDER: f32 = 50_000.0;
const ADC_MAX: f32 = 4095.0;
const V_REF: f32 = 3.3;
/// Divider voltages this close to a rail mean a broken probe.
const RAIL_MARGIN_V: f32 = 0.01;

/// Convert a raw 12-bit ADC value to °C.
pub fn adc_to_celsius(raw: u16) -> Result<f32, SensorError> {
    let voltage = (f32::from(raw) / ADC_MAX) * V_REF;
    if voltage >= V_REF - RAIL_MARGIN_V {
        return Err(SensorError::OpenCircuit);
    }
    if voltage <= RAIL_MARGIN_V {
        return Err(SensorError::ShortCircuit);
    }
    let r_ntc = R_DIVIDER * voltage / (V_REF - voltage);
    let inv_t = (1.0 / T25_K) + (1.0 / BETA) * (r_ntc / R25).ln();
    if inv_t <= 0.0 || !inv_t.is_finite() {
        return Err(SensorError::OutOfRange);
    }
    Ok((1.0 / inv_t) - 273.15)
}

/// One boiler probe with its conditioning chain.
pub struct NtcProbe {
    adc_channel: u32,
    filter: AnalogFilter,
    last_error: Option<SensorError>,
}

impl NtcProbe {
    pub fn new(adc_channel: u32) -> Self {
        Self {
            adc_channel,
            filter: AnalogFilter::new(),
            last_error: None,
        }
    }

    /// Sample, convert and filter.  A fault resets the filter.
    pub fn read(&mut self) -> Result<f32, SensorError> {
        match hw_init::adc1_read(self.adc_channel).and_then(adc_to_celsius) {
            Ok(celsius) => {
                if self.last_error.take().is_some() {
                    log::info!("NTC ch{}: probe recovered", self.adc_channel);
                }
                Ok(self.filter.push(celsius))
            }
            Err(e) => {
                if self.last_error != Some(e) {
                    log::warn!("NTC ch{}: {}", self.adc_channel, e);
                }
                self.last_error = Some(e);
                self.filter.reset();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midscale_is_room_temperature() {
        let t = adc_to_celsius(2048).unwrap();
        assert!((t - 25.0).abs() < 0.5, "got {t}");
    }

    #[test]
    fn hotter_probe_reads_lower_adc() {
        let warm = adc_to_celsius(1000).unwrap();
        let hot = adc_to_celsius(320).unwrap();
        assert!(hot > warm);
        assert!((hot - 93.0).abs() < 2.0, "got {hot}");
    }

    #[test]
    fn rails_are_faults() {
        assert_eq!(adc_to_celsius(4095), Err(SensorError::OpenCircuit));
        assert_eq!(adc_to_celsius(0), Err(SensorError::ShortCircuit));
    }

    #[test]
    fn ntc_reads_injected_value() {
        // Channel 7 is unused by the board; safe to drive from this test alone.
        hw_init::sim_set_adc(7, 2048);
        let mut probe = NtcProbe::new(7);
        let t = probe.read().unwrap();
        assert!((t - 25.0).abs() < 0.5);
        hw_init::sim_set_adc(7, 4095);
        assert_eq!(probe.read(), Err(SensorError::OpenCircuit));
        hw_init::sim_set_adc(7, 2048);
        hw_init::sim_fail_adc(7, true);
        assert_eq!(probe.read(), Err(SensorError::AdcReadFailed));
        hw_init::sim_fail_adc(7, false);
        assert!(probe.read().is_ok());
    }
}
