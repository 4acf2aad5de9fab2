//! `embedded-hal` output pin over the raw hw_init GPIO helpers.
//!
//! Heater and valve drivers are generic over [`OutputPin`] so tests can
//! hand them a recording pin instead of a board GPIO.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::drivers::hw_init;

/// A GPIO configured as output by `hw_init::init_peripherals`.
#[derive(Debug, Clone, Copy)]
pub struct GpioOut {
    pin: i32,
}

impl GpioOut {
    pub const fn new(pin: i32) -> Self {
        Self { pin }
    }

    pub fn pin(&self) -> i32 {
        self.pin
    }
}

impl ErrorType for GpioOut {
    type Error = Infallible;
}

impl OutputPin for GpioOut {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        hw_init::gpio_write(self.pin, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        hw_init::gpio_write(self.pin, true);
        Ok(())
    }
}
