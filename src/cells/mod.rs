//! Oxygen cell subsystem: readings, drivers and the aggregating [`SensorHub`].
//!
//! Raw samples arrive from the (external) sensor transport into
//! [`CellInputs`], one mutex-guarded slot per cell.  Each control tick the
//! hub takes a snapshot of every slot and folds it through that cell's
//! driver into a [`SensorReading`].  The consensus engine, PID loop and
//! broadcaster only ever see `SensorReading`s.
//!
//! ```text
//!  transport ──▶ CellInputs ──snapshot──▶ CellDriver ──▶ SensorReading
//! ```

pub mod analog;
pub mod digital;

use core::cell::Cell;
use core::fmt;
use core::ops::{Index, IndexMut};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{CoefficientStore, StorageError};
use crate::config::{Configuration, ControllerSettings};
use crate::error::CalError;

use analog::AnalogCell;
use digital::{DiveO2Cell, O2sCell};

/// Milliseconds from a monotonic tick source.  Wraps at `u32::MAX`.
pub type Tick = u32;

/// Transmitted in place of a PPO2 the core does not trust.
pub const PPO2_FAIL: u8 = 0xFF;

// ───────────────────────────────────────────────────────────────
// Cell identity
// ───────────────────────────────────────────────────────────────

/// Positional identity of a cell.  Per-cell arrays are indexed by this,
/// never by a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellIndex {
    C1,
    C2,
    C3,
}

impl CellIndex {
    pub const ALL: [Self; 3] = [Self::C1, Self::C2, Self::C3];

    pub const fn index(self) -> usize {
        match self {
            Self::C1 => 0,
            Self::C2 => 1,
            Self::C3 => 2,
        }
    }

    /// One-based number as printed on the housing.
    pub const fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub const fn from_index(i: usize) -> Option<Self> {
        match i {
            0 => Some(Self::C1),
            1 => Some(Self::C2),
            2 => Some(Self::C3),
            _ => None,
        }
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell {}", self.number())
    }
}

/// Fixed three-slot collection keyed by [`CellIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerCell<T>(pub [T; 3]);

impl<T> PerCell<T> {
    pub fn from_fn(mut f: impl FnMut(CellIndex) -> T) -> Self {
        Self([f(CellIndex::C1), f(CellIndex::C2), f(CellIndex::C3)])
    }

    pub fn map<U>(&self, mut f: impl FnMut(CellIndex, &T) -> U) -> PerCell<U> {
        PerCell::from_fn(|c| f(c, &self[c]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellIndex, &T)> {
        CellIndex::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<CellIndex> for PerCell<T> {
    type Output = T;

    fn index(&self, cell: CellIndex) -> &T {
        &self.0[cell.index()]
    }
}

impl<T> IndexMut<CellIndex> for PerCell<T> {
    fn index_mut(&mut self, cell: CellIndex) -> &mut T {
        &mut self.0[cell.index()]
    }
}

// ───────────────────────────────────────────────────────────────
// Kind / status
// ───────────────────────────────────────────────────────────────

/// Sensor family fitted in a slot.  Discriminants are the 2-bit
/// configuration encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellKind {
    /// Digital optical cell; reports PPO2 and ambient pressure.  Serves as
    /// the calibration reference.
    DiveO2 = 0,
    /// Galvanic cell read through the ADC.
    Analog = 1,
    /// Digital galvanic cell with on-board conversion, factory calibrated.
    O2s = 2,
}

impl CellKind {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::DiveO2),
            1 => Some(Self::Analog),
            2 => Some(Self::O2s),
            _ => None,
        }
    }

    /// Whether the plausible-band check accepts `coefficient`.
    pub fn coefficient_valid(self, coefficient: f64) -> bool {
        match self {
            Self::Analog => coefficient > analog::CAL_LOWER && coefficient < analog::CAL_UPPER,
            Self::DiveO2 => (digital::DIVEO2_CAL_LOWER..=digital::DIVEO2_CAL_UPPER).contains(&coefficient),
            Self::O2s => true,
        }
    }

    /// Whether a calibration run rewrites this kind's coefficient.
    pub const fn calibratable(self) -> bool {
        !matches!(self, Self::O2s)
    }
}

/// Health of a cell as derived by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellStatus {
    Ok,
    /// Non-fatal self-report from the sensor.
    Degraded,
    /// Dead, unreachable, stale or out of range.
    #[default]
    Fail,
    /// Coefficient unset or implausible.
    NeedsCalibration,
}

/// What a digital sensor says about itself alongside its sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfReport {
    #[default]
    Healthy,
    Warning,
    Error,
}

// ───────────────────────────────────────────────────────────────
// Raw input slots
// ───────────────────────────────────────────────────────────────

/// One sample as delivered by the sensor transport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawSample {
    /// Kind-specific raw value: ADC counts (analog), partial pressure in
    /// 10⁻³ hPa (DiveO2), or bar (O2S).
    pub value: f64,
    /// Ambient pressure in µbar, for kinds that report it.
    pub pressure_ubar: u32,
    pub report: SelfReport,
    pub timestamp: Tick,
}

/// The three raw-sample slots shared between the sensor transport (one
/// writer per slot) and the control loop.  Every read returns a whole
/// sample taken under the lock, so a status is never paired with a value
/// from another instant.
pub struct CellInputs {
    slots: [Mutex<CriticalSectionRawMutex, Cell<Option<RawSample>>>; 3],
}

impl CellInputs {
    pub const fn new() -> Self {
        Self {
            slots: [
                Mutex::new(Cell::new(None)),
                Mutex::new(Cell::new(None)),
                Mutex::new(Cell::new(None)),
            ],
        }
    }

    /// Overwrite a slot in place.
    pub fn publish(&self, cell: CellIndex, sample: RawSample) {
        self.slots[cell.index()].lock(|slot| slot.set(Some(sample)));
    }

    /// Copy of the latest sample, `None` if the cell never reported.
    pub fn snapshot(&self, cell: CellIndex) -> Option<RawSample> {
        self.slots[cell.index()].lock(Cell::get)
    }

    /// Forget a cell's sample (sensor unplugged / transport reset).
    pub fn clear(&self, cell: CellIndex) {
        self.slots[cell.index()].lock(|slot| slot.set(None));
    }
}

impl Default for CellInputs {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor reading
// ───────────────────────────────────────────────────────────────

/// Normalised output of a cell driver.  Overwritten in place each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub cell: CellIndex,
    pub kind: CellKind,
    /// Centibar, 0–254; [`PPO2_FAIL`] when the driver has nothing valid.
    pub ppo2: u8,
    /// Bar.
    pub precision_ppo2: f64,
    /// Raw value the PPO2 was derived from (see [`RawSample::value`]).
    pub raw_sample: f64,
    /// Hundredths of a millivolt; 0 for digital kinds.
    pub millivolts: u16,
    /// Ambient pressure in µbar, 0 if the kind does not report it.
    pub pressure_ubar: u32,
    pub status: CellStatus,
    pub timestamp: Tick,
}

impl SensorReading {
    /// A slot that has never produced a sample.
    pub const fn empty(cell: CellIndex, kind: CellKind) -> Self {
        Self {
            cell,
            kind,
            ppo2: PPO2_FAIL,
            precision_ppo2: 0.0,
            raw_sample: 0.0,
            millivolts: 0,
            pressure_ubar: 0,
            status: CellStatus::Fail,
            timestamp: 0,
        }
    }
}

/// True if the raw sample is too old to trust.  The subtraction wraps on
/// purpose: a timestamp from "the future" reads as stale.
pub(crate) fn timed_out(now: Tick, timestamp: Tick, timeout_ms: u32) -> bool {
    now.wrapping_sub(timestamp) > timeout_ms
}

/// Integer centibar from bar, with overrange mapped to `None`.
pub(crate) fn centibar(ppo2_bar: f64) -> Option<u8> {
    let cb = (ppo2_bar * 100.0).abs();
    if !cb.is_finite() || cb >= f64::from(PPO2_FAIL) {
        None
    } else {
        Some(cb as u8)
    }
}

// ───────────────────────────────────────────────────────────────
// Driver capability
// ───────────────────────────────────────────────────────────────

/// Common shape of every cell driver.  The consensus, control and protocol
/// layers depend only on this.
pub trait CellDriver {
    fn cell(&self) -> CellIndex;

    fn kind(&self) -> CellKind;

    /// Fold the latest raw snapshot into a fresh reading.
    fn sample(&mut self, raw: Option<RawSample>, now: Tick) -> SensorReading;

    /// PPO2 of the last reading, centibar.
    fn ppo2(&self) -> u8;

    /// Millivolts of the last reading, hundredths of a millivolt.
    fn millivolts(&self) -> u16;

    /// Derive and adopt the coefficient that makes the last raw sample read
    /// `ppo2_centibar`.  Returns the coefficient to persist.
    fn calibrate(&mut self, ppo2_centibar: u8) -> Result<f64, CalError>;

    /// Install a coefficient loaded from storage; out-of-band values leave
    /// the cell needing calibration.
    fn load_coefficient(&mut self, stored: Result<f64, StorageError>);

    /// Latch `Fail` until the next successful calibration.
    fn force_fail(&mut self);
}

/// Tagged variant over the concrete drivers.
pub enum AnyCell {
    Analog(AnalogCell),
    DiveO2(DiveO2Cell),
    O2s(O2sCell),
}

impl AnyCell {
    pub fn new(cell: CellIndex, kind: CellKind, timeout_ms: u32) -> Self {
        match kind {
            CellKind::Analog => Self::Analog(AnalogCell::new(cell, timeout_ms)),
            CellKind::DiveO2 => Self::DiveO2(DiveO2Cell::new(cell, timeout_ms)),
            CellKind::O2s => Self::O2s(O2sCell::new(cell, timeout_ms)),
        }
    }

    fn driver(&self) -> &dyn CellDriver {
        match self {
            Self::Analog(d) => d,
            Self::DiveO2(d) => d,
            Self::O2s(d) => d,
        }
    }

    fn driver_mut(&mut self) -> &mut dyn CellDriver {
        match self {
            Self::Analog(d) => d,
            Self::DiveO2(d) => d,
            Self::O2s(d) => d,
        }
    }
}

impl CellDriver for AnyCell {
    fn cell(&self) -> CellIndex {
        self.driver().cell()
    }

    fn kind(&self) -> CellKind {
        self.driver().kind()
    }

    fn sample(&mut self, raw: Option<RawSample>, now: Tick) -> SensorReading {
        self.driver_mut().sample(raw, now)
    }

    fn ppo2(&self) -> u8 {
        self.driver().ppo2()
    }

    fn millivolts(&self) -> u16 {
        self.driver().millivolts()
    }

    fn calibrate(&mut self, ppo2_centibar: u8) -> Result<f64, CalError> {
        self.driver_mut().calibrate(ppo2_centibar)
    }

    fn load_coefficient(&mut self, stored: Result<f64, StorageError>) {
        self.driver_mut().load_coefficient(stored);
    }

    fn force_fail(&mut self) {
        self.driver_mut().force_fail();
    }
}

// ───────────────────────────────────────────────────────────────
// SensorHub
// ───────────────────────────────────────────────────────────────

/// Storage key of a cell's coefficient.
pub const fn coefficient_key(cell: CellIndex) -> u8 {
    0x01 + cell.index() as u8
}

/// Owns the three drivers and the last reading each produced.
pub struct SensorHub {
    drivers: PerCell<AnyCell>,
    readings: PerCell<SensorReading>,
}

impl SensorHub {
    /// Build drivers for the kinds the configuration names.
    pub fn from_config(config: &Configuration, settings: &ControllerSettings) -> Self {
        let drivers = PerCell::from_fn(|c| AnyCell::new(c, config.cell_kind(c), settings.cell_timeout_ms));
        let readings = drivers.map(|c, d| SensorReading::empty(c, d.kind()));
        Self { drivers, readings }
    }

    /// Pull persisted coefficients into every driver.
    pub fn load_coefficients(&mut self, store: &impl CoefficientStore) {
        for cell in CellIndex::ALL {
            let driver = &mut self.drivers[cell];
            if !driver.kind().calibratable() {
                continue;
            }
            let stored = store.read_coefficient(coefficient_key(cell));
            match stored {
                Ok(c) => info!("{cell}: loaded coefficient {c}"),
                Err(e) => warn!("{cell}: no coefficient ({e})"),
            }
            driver.load_coefficient(stored);
        }
    }

    /// Snapshot every input slot and refresh the readings.
    pub fn sample_all(&mut self, inputs: &CellInputs, now: Tick) -> PerCell<SensorReading> {
        for cell in CellIndex::ALL {
            let raw = inputs.snapshot(cell);
            self.readings[cell] = self.drivers[cell].sample(raw, now);
        }
        self.readings
    }

    pub fn readings(&self) -> PerCell<SensorReading> {
        self.readings
    }

    pub fn driver_mut(&mut self, cell: CellIndex) -> &mut AnyCell {
        &mut self.drivers[cell]
    }

    pub fn kind(&self, cell: CellIndex) -> CellKind {
        self.drivers[cell].kind()
    }
}
