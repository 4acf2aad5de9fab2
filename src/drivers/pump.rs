//! Vibratory pump driven through a phase-angle dimmer module.
//!
//! The dimmer takes a PWM control input (LEDC ch0); duty maps linearly
//! onto pump power.
//!
//! ## Safety contract
//!
//! The pump must never run without water or during a critical fault.
//! The service gates the command; this driver is a dumb actuator.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives real PWM via hw_init helpers.
//! On host/test: hw_init records the duty in an atomic.

use crate::drivers::hw_init;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpState {
    Stopped,
    Running { duty: f32 },
}

pub struct PumpDriver {
    state: PumpState,
    hw_duty: u8,
}

impl Default for PumpDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PumpDriver {
    pub fn new() -> Self {
        Self {
            state: PumpState::Stopped,
            hw_duty: 0,
        }
    }

    /// Duty fraction in `[0, 1]`; anything else stops the pump.
    pub fn set(&mut self, duty: f32) {
        if !duty.is_finite() || duty <= 0.0 {
            self.stop();
            return;
        }
        let duty = duty.min(1.0);
        let duty_8bit = (duty * 255.0).round() as u8;
        if duty_8bit != self.hw_duty {
            hw_init::ledc_set(hw_init::LEDC_CH_PUMP, duty_8bit);
            self.hw_duty = duty_8bit;
        }
        self.state = PumpState::Running { duty };
    }

    pub fn stop(&mut self) {
        hw_init::ledc_set(hw_init::LEDC_CH_PUMP, 0);
        self.hw_duty = 0;
        self.state = PumpState::Stopped;
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, PumpState::Stopped)
    }

    pub fn current_duty(&self) -> u8 {
        self.hw_duty
    }
}
