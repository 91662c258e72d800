//! PID controller for oxygen injection.
//!
//! Proportional-integral-derivative law turning the PPO2 error into a
//! solenoid duty fraction.  Two deliberate departures from a textbook PID:
//!
//! * The derivative acts on the measurement, not the error, so a setpoint
//!   change produces no kick.
//! * Anti-windup is asymmetric.  The loop can only add oxygen, so any
//!   overshoot (negative error) zeroes the integral outright instead of
//!   letting it decay.

use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.01,
            kd: 0.0,
        }
    }
}

/// Which gain a bus update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainTerm {
    Proportional,
    Integral,
    Derivative,
}

/// Controller memory.  Owned by the control loop and touched nowhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct PidState {
    pub gains: PidGains,
    pub integral: f64,
    pub prev_measurement: f64,
    pub integral_min: f64,
    pub integral_max: f64,
    /// Consecutive steps the integral spent clamped.  Diagnostic only.
    pub saturation_count: u16,
    /// Last derivative term, kept for telemetry.
    pub derivative: f64,
}

impl PidState {
    pub fn new(gains: PidGains, integral_min: f64, integral_max: f64) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_measurement: 0.0,
            integral_min,
            integral_max,
            saturation_count: 0,
            derivative: 0.0,
        }
    }

    pub fn set_gain(&mut self, term: GainTerm, value: f64) {
        match term {
            GainTerm::Proportional => self.gains.kp = value,
            GainTerm::Integral => self.gains.ki = value,
            GainTerm::Derivative => self.gains.kd = value,
        }
    }

    /// Reset controller memory, keeping gains and bounds.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_measurement = 0.0;
        self.saturation_count = 0;
        self.derivative = 0.0;
    }
}

impl Default for PidState {
    fn default() -> Self {
        Self::new(PidGains::default(), 0.0, 1.0)
    }
}

/// Run one control step.  `setpoint` and `measurement` share units (bar).
/// Returns the unclamped duty fraction; the solenoid scheduler clamps it.
pub fn step_pid(setpoint: f64, measurement: f64, state: &mut PidState) -> f64 {
    let error = setpoint - measurement;

    // Proportional
    let p = state.gains.kp * error;

    // Integral, hard reset on overshoot
    state.integral += state.gains.ki * error;
    if error < 0.0 {
        state.integral = 0.0;
    }
    if state.integral > state.integral_max || state.integral < state.integral_min {
        state.integral = state.integral.clamp(state.integral_min, state.integral_max);
        state.saturation_count = state.saturation_count.saturating_add(1);
    } else {
        state.saturation_count = 0;
    }

    // Derivative on measurement
    let d = state.gains.kd * (state.prev_measurement - measurement);
    state.prev_measurement = measurement;
    state.derivative = d;

    p + state.integral + d
}
