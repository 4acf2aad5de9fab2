//! PID controller for boiler temperature
//!
//! Turns the temperature error of one boiler channel into a heater duty
//! fraction.  The state is a plain `Copy` value embedded in its
//! [`BoilerChannel`]; nothing here allocates or touches hardware.
//!
//! The derivative term acts on the measurement, not the error, so a
//! setpoint change (brew to steam, sleep to wake) produces no kick.

use crate::config::PidGains;
use crate::control::boiler::BoilerChannel;

/// Controller state for one boiler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidState {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub integral: f32,
    pub prev_measured: f32,
    pub output_min: f32,
    pub output_max: f32,
    /// Tick of the last valid update; `None` until the first one.
    pub last_tick: Option<u64>,
}

impl PidState {
    pub fn new(gains: PidGains) -> Self {
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            integral: 0.0,
            prev_measured: 0.0,
            output_min: 0.0,
            output_max: 1.0,
            last_tick: None,
        }
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.kp = gains.kp;
        self.ki = gains.ki;
        self.kd = gains.kd;
    }

    /// Set output limits.  Swapped bounds are reordered.
    pub fn set_limits(&mut self, min: f32, max: f32) {
        if min <= max {
            self.output_min = min;
            self.output_max = max;
        } else {
            self.output_min = max;
            self.output_max = min;
        }
    }

    /// Clear accumulated state; the next update has no derivative kick.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measured = 0.0;
        self.last_tick = None;
    }

    /// Compute one controller step.
    ///
    /// Returns `held` untouched when the sample is missing or non-finite
    /// or when `dt` is not a positive finite number.  Integration is frozen
    /// while the output is saturated in the direction of the error.
    pub fn step(&mut self, setpoint: f32, measured: Option<f32>, dt: f32, tick: u64, held: f32) -> f32 {
        let Some(measured) = measured.filter(|m| m.is_finite()) else {
            return held;
        };
        if !(dt.is_finite() && dt > 0.0) {
            return held;
        }

        let error = setpoint - measured;
        let derivative = if self.last_tick.is_some() {
            -(measured - self.prev_measured) / dt
        } else {
            0.0
        };

        let candidate = self.integral + error * dt;
        let unclamped = self.kp * error + self.ki * candidate + self.kd * derivative;
        let wound_up = (unclamped > self.output_max && error > 0.0)
            || (unclamped < self.output_min && error < 0.0);
        if !wound_up && candidate.is_finite() {
            self.integral = candidate;
        }

        self.prev_measured = measured;
        self.last_tick = Some(tick);

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        self.clamp(output)
    }

    fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.output_min
        } else {
            value.max(self.output_min).min(self.output_max)
        }
    }
}

/// Run the controller of `channel` against a fresh sample and store the
/// resulting heater duty on the channel.
pub fn update(channel: &mut BoilerChannel, measured_c: Option<f32>, dt: f32, tick: u64) -> f32 {
    channel.measured_c = measured_c;
    let duty = channel
        .pid
        .step(channel.setpoint_c, measured_c, dt, tick, channel.heater_duty);
    channel.heater_duty = duty;
    duty
}

/// Drive a disabled channel to zero duty and forget controller history.
pub fn disable(channel: &mut BoilerChannel) {
    channel.heater_duty = 0.0;
    channel.pid.reset();
}
