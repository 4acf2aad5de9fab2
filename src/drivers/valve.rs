//! Three-way brew solenoid.  HIGH opens the group to the pump.

use embedded_hal::digital::OutputPin;

pub struct ValveDriver<P: OutputPin> {
    pin: P,
    open: bool,
}

impl<P: OutputPin> ValveDriver<P> {
    pub fn new(mut pin: P) -> Self {
        let _ = pin.set_low();
        Self { pin, open: false }
    }

    pub fn set(&mut self, open: bool) {
        if open == self.open {
            return;
        }
        let res = if open { self.pin.set_high() } else { self.pin.set_low() };
        if res.is_ok() {
            self.open = open;
        } else {
            log::warn!("valve: pin write failed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
