//! Galvanic (analog) oxygen cell driver.
//!
//! The transport delivers signed ADC counts from a 16-bit converter with a
//! 0.256 V full-scale range.  PPO2 in centibar is `|counts| * coefficient`;
//! calibration solves that for the coefficient.

use log::{debug, warn};

use super::{CellDriver, CellIndex, CellKind, CellStatus, PPO2_FAIL, RawSample, SensorReading, Tick, timed_out};
use crate::app::ports::StorageError;
use crate::error::CalError;

/// Coefficients must fall strictly inside `(CAL_LOWER, CAL_UPPER)`.
pub const CAL_LOWER: f64 = 0.0;
pub const CAL_UPPER: f64 = 1.0;

/// Written to storage when a slot has to be populated but no calibration
/// exists.  Lies outside the valid band by construction.
pub const CAL_INVALID: f64 = 10_000.0;

/// Hundredths of a millivolt per ADC count (256 mV over 32767 counts).
const CENTI_MV_PER_COUNT: f64 = 25_600.0 / 32_767.0;

pub struct AnalogCell {
    cell: CellIndex,
    timeout_ms: u32,
    coefficient: Option<f64>,
    forced_fail: bool,
    last: SensorReading,
    last_counts: Option<f64>,
}

impl AnalogCell {
    pub fn new(cell: CellIndex, timeout_ms: u32) -> Self {
        Self {
            cell,
            timeout_ms,
            coefficient: None,
            forced_fail: false,
            last: SensorReading::empty(cell, CellKind::Analog),
            last_counts: None,
        }
    }

    pub fn coefficient(&self) -> Option<f64> {
        self.coefficient
    }

    fn centi_millivolts(counts: f64) -> u16 {
        (counts.abs() * CENTI_MV_PER_COUNT).min(f64::from(u16::MAX)) as u16
    }
}

impl CellDriver for AnalogCell {
    fn cell(&self) -> CellIndex {
        self.cell
    }

    fn kind(&self) -> CellKind {
        CellKind::Analog
    }

    fn sample(&mut self, raw: Option<RawSample>, now: Tick) -> SensorReading {
        let Some(raw) = raw else {
            self.last_counts = None;
            self.last = SensorReading::empty(self.cell, CellKind::Analog);
            return self.last;
        };

        self.last_counts = Some(raw.value);
        let millivolts = Self::centi_millivolts(raw.value);
        let mut reading = SensorReading {
            cell: self.cell,
            kind: CellKind::Analog,
            ppo2: PPO2_FAIL,
            precision_ppo2: 0.0,
            raw_sample: raw.value,
            millivolts,
            pressure_ubar: 0,
            status: CellStatus::Ok,
            timestamp: raw.timestamp,
        };

        let valid_coefficient = self.coefficient.filter(|c| CellKind::Analog.coefficient_valid(*c));
        if self.forced_fail || timed_out(now, raw.timestamp, self.timeout_ms) {
            reading.status = CellStatus::Fail;
        } else if let Some(coefficient) = valid_coefficient {
            let centibar = raw.value.abs() * coefficient;
            if !centibar.is_finite() {
                warn!("{}: non-finite sample {}", self.cell, raw.value);
                reading.status = CellStatus::Fail;
            } else if centibar >= f64::from(PPO2_FAIL) {
                reading.precision_ppo2 = centibar / 100.0;
                warn!("{}: overrange ({centibar:.1} cb)", self.cell);
                reading.status = CellStatus::Fail;
            } else {
                reading.precision_ppo2 = centibar / 100.0;
                reading.ppo2 = centibar as u8;
            }
        } else {
            reading.status = CellStatus::NeedsCalibration;
        }

        self.last = reading;
        reading
    }

    fn ppo2(&self) -> u8 {
        self.last.ppo2
    }

    fn millivolts(&self) -> u16 {
        self.last.millivolts
    }

    fn calibrate(&mut self, ppo2_centibar: u8) -> Result<f64, CalError> {
        let counts = self
            .last_counts
            .map(f64::abs)
            .filter(|c| *c > 0.0)
            .ok_or(CalError::NoSample(self.cell))?;
        let coefficient = f64::from(ppo2_centibar) / counts;
        debug!("{}: {counts} counts -> coefficient {coefficient}", self.cell);
        if !CellKind::Analog.coefficient_valid(coefficient) {
            self.coefficient = None;
            return Err(CalError::CoefficientOutOfRange(self.cell));
        }
        self.coefficient = Some(coefficient);
        self.forced_fail = false;
        Ok(coefficient)
    }

    fn load_coefficient(&mut self, stored: Result<f64, StorageError>) {
        // Anything out of band, including the invalid sentinel, leaves the
        // cell needing calibration.
        self.coefficient = stored.ok().filter(|c| CellKind::Analog.coefficient_valid(*c));
        self.forced_fail = false;
    }

    fn force_fail(&mut self) {
        self.forced_fail = true;
    }
}
