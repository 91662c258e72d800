//! Digital oxygen cell drivers (DiveO2 optical, O2S galvanic).
//!
//! Both talk to the transport over a UART the core never sees; what arrives
//! here is the parsed sample plus the sensor's own health word.

use log::warn;

use super::{
    CellDriver, CellIndex, CellKind, CellStatus, PPO2_FAIL, RawSample, SelfReport, SensorReading, Tick, centibar,
    timed_out,
};
use crate::app::ports::StorageError;
use crate::error::CalError;

/// Sensor units per bar (10⁻³ hPa); the factory coefficient.
pub const HPA_PER_BAR: f64 = 1_000_000.0;
pub const DIVEO2_CAL_LOWER: f64 = 800_000.0;
pub const DIVEO2_CAL_UPPER: f64 = 1_100_000.0;

// ── DiveO2 health word ───────────────────────────────────────

const WARN_NEAR_SAT: u16 = 0x001;
const ERR_LOW_INTENSITY: u16 = 0x002;
const ERR_HIGH_SIGNAL: u16 = 0x004;
const ERR_LOW_SIGNAL: u16 = 0x008;
const ERR_HIGH_REF: u16 = 0x010;
const ERR_TEMP: u16 = 0x020;
const WARN_HUMIDITY_HIGH: u16 = 0x040;
const WARN_PRESSURE: u16 = 0x080;
const WARN_HUMIDITY_FAIL: u16 = 0x100;

const FATAL_BITS: u16 = ERR_LOW_INTENSITY | ERR_HIGH_SIGNAL | ERR_LOW_SIGNAL | ERR_HIGH_REF | ERR_TEMP;
const WARNING_BITS: u16 = WARN_HUMIDITY_FAIL | WARN_PRESSURE | WARN_HUMIDITY_HIGH | WARN_NEAR_SAT;

/// Classify the error word a DiveO2 appends to each reading.  Unknown bits
/// are treated as fatal.
pub fn decode_dive_o2_health(code: u16) -> SelfReport {
    if code & FATAL_BITS != 0 {
        SelfReport::Error
    } else if code & WARNING_BITS != 0 {
        SelfReport::Warning
    } else if code != 0 {
        warn!("DiveO2: unknown error word 0x{code:04x}");
        SelfReport::Error
    } else {
        SelfReport::Healthy
    }
}

fn status_from_report(report: SelfReport) -> CellStatus {
    match report {
        SelfReport::Healthy => CellStatus::Ok,
        SelfReport::Warning => CellStatus::Degraded,
        SelfReport::Error => CellStatus::Fail,
    }
}

// ───────────────────────────────────────────────────────────────
// DiveO2
// ───────────────────────────────────────────────────────────────

pub struct DiveO2Cell {
    cell: CellIndex,
    timeout_ms: u32,
    coefficient: Option<f64>,
    forced_fail: bool,
    last: SensorReading,
    last_sample: Option<f64>,
}

impl DiveO2Cell {
    pub fn new(cell: CellIndex, timeout_ms: u32) -> Self {
        Self {
            cell,
            timeout_ms,
            coefficient: Some(HPA_PER_BAR),
            forced_fail: false,
            last: SensorReading::empty(cell, CellKind::DiveO2),
            last_sample: None,
        }
    }

    pub fn coefficient(&self) -> Option<f64> {
        self.coefficient
    }
}

impl CellDriver for DiveO2Cell {
    fn cell(&self) -> CellIndex {
        self.cell
    }

    fn kind(&self) -> CellKind {
        CellKind::DiveO2
    }

    fn sample(&mut self, raw: Option<RawSample>, now: Tick) -> SensorReading {
        let Some(raw) = raw else {
            self.last_sample = None;
            self.last = SensorReading::empty(self.cell, CellKind::DiveO2);
            return self.last;
        };

        self.last_sample = Some(raw.value);
        let mut reading = SensorReading {
            cell: self.cell,
            kind: CellKind::DiveO2,
            ppo2: PPO2_FAIL,
            precision_ppo2: 0.0,
            raw_sample: raw.value,
            millivolts: 0,
            pressure_ubar: raw.pressure_ubar,
            status: status_from_report(raw.report),
            timestamp: raw.timestamp,
        };

        if self.forced_fail || timed_out(now, raw.timestamp, self.timeout_ms) {
            reading.status = CellStatus::Fail;
        } else if let Some(coefficient) = self.coefficient {
            let bar = raw.value / coefficient;
            match centibar(bar) {
                Some(cb) => {
                    reading.precision_ppo2 = bar;
                    reading.ppo2 = cb;
                }
                None => {
                    warn!("{}: overrange ({bar:.3} bar)", self.cell);
                    reading.status = CellStatus::Fail;
                }
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
        let sample = self.last_sample.ok_or(CalError::NoSample(self.cell))?;
        if ppo2_centibar == 0 {
            return Err(CalError::CoefficientOutOfRange(self.cell));
        }
        let coefficient = sample.abs() / (f64::from(ppo2_centibar) / 100.0);
        if !CellKind::DiveO2.coefficient_valid(coefficient) {
            self.coefficient = None;
            return Err(CalError::CoefficientOutOfRange(self.cell));
        }
        self.coefficient = Some(coefficient);
        self.forced_fail = false;
        Ok(coefficient)
    }

    fn load_coefficient(&mut self, stored: Result<f64, StorageError>) {
        self.coefficient = match stored {
            Ok(c) if CellKind::DiveO2.coefficient_valid(c) => Some(c),
            Ok(_) => None,
            // Never calibrated: the sensor ships with a usable factory scale.
            Err(_) => Some(HPA_PER_BAR),
        };
        self.forced_fail = false;
    }

    fn force_fail(&mut self) {
        self.forced_fail = true;
    }
}

// ───────────────────────────────────────────────────────────────
// O2S
// ───────────────────────────────────────────────────────────────

/// Reports PPO2 in bar directly; there is nothing to calibrate.
pub struct O2sCell {
    cell: CellIndex,
    timeout_ms: u32,
    last: SensorReading,
}

impl O2sCell {
    pub fn new(cell: CellIndex, timeout_ms: u32) -> Self {
        Self {
            cell,
            timeout_ms,
            last: SensorReading::empty(cell, CellKind::O2s),
        }
    }
}

impl CellDriver for O2sCell {
    fn cell(&self) -> CellIndex {
        self.cell
    }

    fn kind(&self) -> CellKind {
        CellKind::O2s
    }

    fn sample(&mut self, raw: Option<RawSample>, now: Tick) -> SensorReading {
        let Some(raw) = raw else {
            self.last = SensorReading::empty(self.cell, CellKind::O2s);
            return self.last;
        };

        let mut reading = SensorReading {
            cell: self.cell,
            kind: CellKind::O2s,
            ppo2: PPO2_FAIL,
            precision_ppo2: 0.0,
            raw_sample: raw.value,
            millivolts: 0,
            pressure_ubar: 0,
            status: status_from_report(raw.report),
            timestamp: raw.timestamp,
        };
        if timed_out(now, raw.timestamp, self.timeout_ms) {
            reading.status = CellStatus::Fail;
        } else if let Some(cb) = centibar(raw.value) {
            reading.precision_ppo2 = raw.value;
            reading.ppo2 = cb;
        } else {
            reading.status = CellStatus::Fail;
        }

        self.last = reading;
        reading
    }

    fn ppo2(&self) -> u8 {
        self.last.ppo2
    }

    fn millivolts(&self) -> u16 {
        0
    }

    fn calibrate(&mut self, _ppo2_centibar: u8) -> Result<f64, CalError> {
        Ok(1.0)
    }

    fn load_coefficient(&mut self, _stored: Result<f64, StorageError>) {}

    fn force_fail(&mut self) {
        self.last.status = CellStatus::Fail;
    }
}
