//! Solenoid duty scheduler.
//!
//! Turns the PID's duty fraction into one on/off pulse per fixed period.
//! The duty is latched at the start of each period and clamped to
//! `[min_duty, max_duty]`; a request under `min_duty` keeps the valve shut
//! for the whole period rather than micro-pulsing it.
//!
//! ```text
//!   |<──────────── period ────────────>|
//!   |▇▇▇▇▇▇▇▇▇|                        |
//!    on: T*duty        off: T*(1-duty)
//! ```
//!
//! The scheduler is polled from the control loop and never blocks.

use serde::{Deserialize, Serialize};

use crate::app::ports::SolenoidPort;
use crate::cells::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolenoidParams {
    pub period_ms: u32,
    pub min_duty: f64,
    pub max_duty: f64,
}

impl Default for SolenoidParams {
    fn default() -> Self {
        Self {
            period_ms: 5000,
            min_duty: 0.04,
            max_duty: 0.5,
        }
    }
}

impl SolenoidParams {
    /// Duty actually applied for a requested fraction; 0 below the minimum.
    pub fn effective_duty(&self, requested: f64) -> f64 {
        if requested.is_nan() || requested < self.min_duty {
            0.0
        } else {
            requested.min(self.max_duty)
        }
    }
}

/// Ambient pressure the configured duty limits were tuned at.
pub const SURFACE_MBAR: u16 = 1000;

/// Scale a duty request by ambient pressure: each pulse delivers more gas
/// at depth.
pub fn depth_compensated(requested: f64, atmos_mbar: u16) -> f64 {
    if atmos_mbar == 0 {
        return requested;
    }
    requested * f64::from(SURFACE_MBAR) / f64::from(atmos_mbar)
}

pub struct SolenoidScheduler {
    params: SolenoidParams,
    period_start: Option<Tick>,
    on_ms: u32,
    latched_duty: f64,
    energised: bool,
}

impl SolenoidScheduler {
    pub fn new(params: SolenoidParams) -> Self {
        Self {
            params,
            period_start: None,
            on_ms: 0,
            latched_duty: 0.0,
            energised: false,
        }
    }

    /// Advance to `now`.  `requested` is only consulted at period
    /// boundaries; `enabled == false` drops the valve immediately and keeps
    /// it shut.  The port is driven only on edges.
    pub fn poll(&mut self, now: Tick, requested: f64, enabled: bool, out: &mut impl SolenoidPort) -> bool {
        let period = self.params.period_ms;
        let start = match self.period_start {
            Some(start) if now.wrapping_sub(start) < period => start,
            Some(start) => {
                // Keep phase unless we fell more than a whole period behind.
                let next = start.wrapping_add(period);
                let next = if now.wrapping_sub(next) < period { next } else { now };
                self.begin_period(next, requested);
                next
            }
            None => {
                self.begin_period(now, requested);
                now
            }
        };

        let want_on = enabled && now.wrapping_sub(start) < self.on_ms;
        if want_on != self.energised {
            out.set_solenoid(want_on);
            self.energised = want_on;
        }
        want_on
    }

    fn begin_period(&mut self, start: Tick, requested: f64) {
        self.period_start = Some(start);
        self.latched_duty = self.params.effective_duty(requested);
        self.on_ms = (f64::from(self.params.period_ms) * self.latched_duty) as u32;
    }

    /// Force the valve shut and restart the period on the next poll.
    pub fn stop(&mut self, out: &mut impl SolenoidPort) {
        if self.energised {
            out.set_solenoid(false);
        }
        self.energised = false;
        self.period_start = None;
    }

    pub fn latched_duty(&self) -> f64 {
        self.latched_duty
    }

    pub fn is_energised(&self) -> bool {
        self.energised
    }

    pub fn params(&self) -> &SolenoidParams {
        &self.params
    }
}
