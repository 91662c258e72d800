//! Calibration state machine.
//!
//! ```text
//!   Idle ──request──▶ Running ──run──▶ Complete ─┐
//!    ▲                              └─▶ Failed  ─┤
//!    └──────────────── outcome emitted ──────────┘
//! ```
//!
//! Only one run exists at a time; a request while `Running` is dropped
//! (the handset is known to resend).  Accepting a request and executing it
//! are separate steps so the bus can be acknowledged straight away.
//!
//! Every coefficient written is read back from the store and compared
//! within a relative epsilon.  A store that reports success but holds
//! something else fails the run and latches the cell to `Fail`.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::CoefficientStore;
use crate::cells::{CellDriver, CellIndex, CellKind, CellStatus, PerCell, SensorHub, SensorReading, coefficient_key};
use crate::error::{CalError, NonFatalError};

/// Configured calibration policy, 3-bit configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CalMethod {
    /// Calibrate against the first DiveO2 cell.
    #[default]
    DigitalReference = 0,
    AnalogAbsolute = 1,
    TotalAbsolute = 2,
}

impl CalMethod {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::DigitalReference),
            1 => Some(Self::AnalogAbsolute),
            2 => Some(Self::TotalAbsolute),
            _ => None,
        }
    }
}

/// Operator-supplied target as decoded from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalRequest {
    /// Percent.
    pub fo2: u8,
    pub pressure_mbar: u16,
}

impl CalRequest {
    /// `[fo2, p_hi, p_lo]`.
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        match *data {
            [fo2, hi, lo, ..] => Some(Self {
                fo2,
                pressure_mbar: u16::from_be_bytes([hi, lo]),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalState {
    #[default]
    Idle,
    Running,
    Complete,
    Failed,
}

/// Result code as reported on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CalResultCode {
    Ok = 0x01,
    Ack = 0x05,
    Rejected = 0x08,
    GeneralFailure = 0x09,
    LowExternalBattery = 0x10,
    Fo2OutOfRange = 0x20,
}

impl CalResultCode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_error(e: CalError) -> Self {
        match e {
            CalError::MethodUndefined | CalError::NoReference => Self::Rejected,
            CalError::LowBattery => Self::LowExternalBattery,
            CalError::Fo2OutOfRange | CalError::CoefficientOutOfRange(_) => Self::Fo2OutOfRange,
            CalError::InvalidPressure | CalError::Mismatch(_) | CalError::WriteFailed(_) | CalError::NoSample(_) => {
                Self::GeneralFailure
            }
        }
    }
}

/// What a finished run reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalOutcome {
    pub state: CalState,
    pub code: CalResultCode,
    /// First error hit, `None` on success.
    pub error: Option<CalError>,
    /// Hundredths of a millivolt at the time of the run.
    pub millivolts: PerCell<u16>,
    pub fo2: u8,
    pub pressure_mbar: u16,
    /// Cells whose new coefficient was persisted and verified.
    pub calibrated: PerCell<bool>,
}

impl CalOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == CalState::Complete
    }
}

/// Inputs a run needs beyond the drivers and the store.
pub struct CalContext<'a> {
    pub method: CalMethod,
    pub readings: &'a PerCell<SensorReading>,
    pub battery_ok: bool,
    /// Relative tolerance for the read-back check.
    pub epsilon: f64,
}

/// Single-run calibration controller.
#[derive(Debug, Default)]
pub struct CalibrationMachine {
    state: CalState,
    pending: Option<CalRequest>,
    last_outcome: Option<CalOutcome>,
    /// Non-fatal kinds raised by the last run, for the caller to count.
    raised: heapless::Vec<NonFatalError, 4>,
}

impl CalibrationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CalState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == CalState::Running
    }

    /// Accept a request.  `false` (and no change) if a run is active.
    pub fn request(&mut self, req: CalRequest) -> bool {
        if self.is_running() {
            info!("calibration: already running, duplicate request dropped");
            return false;
        }
        info!("calibration: requested fo2={}% p={} mbar", req.fo2, req.pressure_mbar);
        self.state = CalState::Running;
        self.pending = Some(req);
        true
    }

    pub fn last_outcome(&self) -> Option<&CalOutcome> {
        self.last_outcome.as_ref()
    }

    /// Non-fatal kinds the last run raised.
    pub fn take_raised(&mut self) -> heapless::Vec<NonFatalError, 4> {
        core::mem::take(&mut self.raised)
    }

    /// Execute the pending run to a terminal state and return to `Idle`.
    /// `None` when nothing is pending.
    pub fn run(
        &mut self,
        ctx: &CalContext<'_>,
        hub: &mut SensorHub,
        store: &mut impl CoefficientStore,
    ) -> Option<CalOutcome> {
        let req = self.pending.take()?;
        self.raised.clear();

        let mut outcome = CalOutcome {
            state: CalState::Running,
            code: CalResultCode::Ok,
            error: None,
            millivolts: ctx.readings.map(|_, r| r.millivolts),
            fo2: req.fo2,
            pressure_mbar: req.pressure_mbar,
            calibrated: PerCell([false; 3]),
        };

        let result = if ctx.battery_ok {
            match ctx.method {
                CalMethod::DigitalReference => self.digital_reference(ctx, hub, store, &mut outcome),
                CalMethod::AnalogAbsolute | CalMethod::TotalAbsolute => {
                    self.raise(NonFatalError::UndefinedCalMethod);
                    Err(CalError::MethodUndefined)
                }
            }
        } else {
            Err(CalError::LowBattery)
        };

        match result {
            Ok(()) => {
                self.state = CalState::Complete;
                outcome.state = CalState::Complete;
                info!("calibration: complete, fo2={}% p={} mbar", outcome.fo2, outcome.pressure_mbar);
            }
            Err(e) => {
                self.state = CalState::Failed;
                outcome.state = CalState::Failed;
                outcome.code = CalResultCode::from_error(e);
                outcome.error = Some(e);
                warn!("calibration: failed ({e})");
            }
        }

        self.last_outcome = Some(outcome);
        self.state = CalState::Idle;
        Some(outcome)
    }

    fn raise(&mut self, kind: NonFatalError) {
        let _ = self.raised.push(kind);
    }

    fn digital_reference(
        &mut self,
        ctx: &CalContext<'_>,
        hub: &mut SensorHub,
        store: &mut impl CoefficientStore,
        outcome: &mut CalOutcome,
    ) -> Result<(), CalError> {
        let reference = CellIndex::ALL
            .into_iter()
            .find(|c| hub.kind(*c) == CellKind::DiveO2)
            .map(|c| ctx.readings[c])
            .filter(|r| r.status == CellStatus::Ok);
        let Some(reference) = reference else {
            self.raise(NonFatalError::CalMethod);
            return Err(CalError::NoReference);
        };

        let ppo2 = reference.ppo2;
        let pressure_mbar = reference.pressure_ubar / 1000;
        if pressure_mbar == 0 {
            return Err(CalError::InvalidPressure);
        }
        let fo2 = (f64::from(ppo2) * 1000.0 / f64::from(pressure_mbar)).round();
        outcome.pressure_mbar = u16::try_from(pressure_mbar).unwrap_or(u16::MAX);
        outcome.fo2 = fo2.clamp(0.0, 255.0) as u8;
        info!(
            "calibration: reference {} at {} cb, {} mbar, fo2 {}%",
            reference.cell, ppo2, pressure_mbar, outcome.fo2
        );
        if !(1.0..=100.0).contains(&fo2) {
            return Err(CalError::Fo2OutOfRange);
        }

        let mut first_error = None;
        for cell in CellIndex::ALL {
            if cell == reference.cell || !hub.kind(cell).calibratable() {
                continue;
            }
            match self.calibrate_cell(cell, ppo2, ctx.epsilon, hub, store) {
                Ok(()) => outcome.calibrated[cell] = true,
                Err(e) => {
                    warn!("calibration: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Calibrate, persist, read back and compare one cell.
    fn calibrate_cell(
        &mut self,
        cell: CellIndex,
        ppo2: u8,
        epsilon: f64,
        hub: &mut SensorHub,
        store: &mut impl CoefficientStore,
    ) -> Result<(), CalError> {
        let driver = hub.driver_mut(cell);
        let written = driver.calibrate(ppo2)?;
        let key = coefficient_key(cell);

        if store.write_coefficient(key, written).is_err() {
            driver.force_fail();
            self.raise(NonFatalError::Eeprom);
            return Err(CalError::WriteFailed(cell));
        }

        match store.read_coefficient(key) {
            Ok(read) if (read - written).abs() <= epsilon * written.abs() => {
                info!("calibration: {cell} coefficient {written} verified");
                Ok(())
            }
            other => {
                warn!("calibration: {cell} wrote {written}, read back {other:?}");
                driver.force_fail();
                self.raise(NonFatalError::CalMismatch);
                Err(CalError::Mismatch(cell))
            }
        }
    }
}
