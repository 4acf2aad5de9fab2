//! Boiler heater driven through a zero-cross solid-state relay.
//!
//! SSRs switch at mains zero crossings, so duty is realised by time
//! proportioning: within each window the output is on for
//! `duty × window` milliseconds.  The window position is derived from the
//! control loop clock, which makes repeated calls within one tick
//! idempotent.  A phase offset shifts where the on-time starts, so two
//! heaters whose duties sum to at most 1 never conduct together.
//!
//! ## Safety contract
//!
//! Duty 0 holds the pin low for the whole window.  The safety monitor
//! and the service decide the duty; this driver is a dumb actuator.

use embedded_hal::digital::OutputPin;

/// Time-proportioning window.
pub const WINDOW_MS: u64 = 1_000;

/// Milliseconds of each window a heater at `duty` conducts.
pub fn on_time_ms(duty: f32) -> u64 {
    (duty * WINDOW_MS as f32) as u64
}

pub struct HeaterDriver<P: OutputPin> {
    pin: P,
    duty: f32,
    on: bool,
}

impl<P: OutputPin> HeaterDriver<P> {
    pub fn new(mut pin: P) -> Self {
        // A failed write leaves `on` false and is retried next tick.
        let _ = pin.set_low();
        Self {
            pin,
            duty: 0.0,
            on: false,
        }
    }

    /// Apply `duty` (clamped to `[0, 1]`) at loop time `now_ms`, with the
    /// on-time starting `phase_ms` into each window.
    pub fn apply(&mut self, duty: f32, now_ms: u64, phase_ms: u64) {
        let duty = if duty.is_finite() { duty.clamp(0.0, 1.0) } else { 0.0 };
        self.duty = duty;
        let pos = (now_ms + WINDOW_MS - phase_ms % WINDOW_MS) % WINDOW_MS;
        let want_on = pos < on_time_ms(duty);
        if want_on != self.on {
            let res = if want_on { self.pin.set_high() } else { self.pin.set_low() };
            if res.is_ok() {
                self.on = want_on;
            }
        }
    }

    /// Force the output low immediately.
    pub fn off(&mut self) {
        self.duty = 0.0;
        if self.pin.set_low().is_ok() {
            self.on = false;
        }
    }

    pub fn duty(&self) -> f32 {
        self.duty
    }

    /// On-time per window at the current duty.
    pub fn on_ms(&self) -> u64 {
        on_time_ms(self.duty)
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[derive(Default)]
    struct Recorder {
        high: bool,
        writes: u32,
    }

    impl ErrorType for Recorder {
        type Error = Infallible;
    }

    impl OutputPin for Recorder {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            self.writes += 1;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn half_duty_splits_window() {
        let mut h = HeaterDriver::new(Recorder::default());
        h.apply(0.5, 100, 0);
        assert!(h.is_on());
        h.apply(0.5, 600, 0);
        assert!(!h.is_on());
        h.apply(0.5, 1_100, 0);
        assert!(h.is_on());
    }

    #[test]
    fn zero_duty_never_switches_on() {
        let mut h = HeaterDriver::new(Recorder::default());
        for t in (0..2_000).step_by(10) {
            h.apply(0.0, t, 0);
            assert!(!h.is_on());
        }
    }

    #[test]
    fn full_duty_stays_on() {
        let mut h = HeaterDriver::new(Recorder::default());
        for t in (0..2_000).step_by(10) {
            h.apply(1.0, t, 0);
            assert!(h.is_on());
        }
    }

    #[test]
    fn phase_shifts_on_time() {
        let mut h = HeaterDriver::new(Recorder::default());
        h.apply(0.3, 100, 400);
        assert!(!h.is_on());
        h.apply(0.3, 400, 400);
        assert!(h.is_on());
        h.apply(0.3, 699, 400);
        assert!(h.is_on());
        h.apply(0.3, 700, 400);
        assert!(!h.is_on());
        h.apply(0.3, 1_450, 400);
        assert!(h.is_on());
    }

    #[test]
    fn phase_wraps_past_window_end() {
        let mut h = HeaterDriver::new(Recorder::default());
        h.apply(0.5, 900, 800);
        assert!(h.is_on());
        h.apply(0.5, 1_200, 800);
        assert!(h.is_on());
        h.apply(0.5, 1_300, 800);
        assert!(!h.is_on());
    }

    #[test]
    fn nan_duty_is_off() {
        let mut h = HeaterDriver::new(Recorder::default());
        h.apply(f32::NAN, 0, 0);
        assert!(!h.is_on());
        assert_eq!(h.duty(), 0.0);
    }

    #[test]
    fn repeated_apply_does_not_rewrite_pin() {
        let mut h = HeaterDriver::new(Recorder::default());
        h.apply(1.0, 0, 0);
        let writes = h.pin.writes;
        h.apply(1.0, 10, 0);
        h.apply(1.0, 20, 0);
        assert_eq!(h.pin.writes, writes);
    }
}
