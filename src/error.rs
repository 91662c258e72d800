//! Unified error types for the O2 controller core.
//!
//! Two families live here. [`Error`] is what fallible operations return.
//! [`NonFatalError`] and [`FatalError`] are the counted / recorded
//! taxonomy the diagnostics layer keeps for post-mortem: a non-fatal kind
//! is logged and counted while execution continues with a safe default, a
//! fatal kind is recorded and ends in a reset.
//!
//! All variants are `Copy` so they pass through the control loop and the
//! dispatcher without allocation.

use core::fmt;

use crate::app::ports::{BusError, ConfigError, StorageError};
use crate::cells::CellIndex;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A calibration run could not complete.
    Calibration(CalError),
    /// The coefficient or crash store failed.
    Storage(StorageError),
    /// The configuration record was rejected or could not be loaded.
    Config(ConfigError),
    /// A frame could not be queued on the bus.
    Bus(BusError),
    /// Something happened that makes continued operation unsafe.
    Fatal(FatalError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibration(e) => write!(f, "calibration: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl From<FatalError> for Error {
    fn from(e: FatalError) -> Self {
        Self::Fatal(e)
    }
}

// ---------------------------------------------------------------------------
// Calibration errors
// ---------------------------------------------------------------------------

/// Why a calibration run ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalError {
    /// The configured method has no numeric behaviour defined.
    MethodUndefined,
    /// No digital reference cell is configured, or it is not `Ok`.
    NoReference,
    /// The reference reported an ambient pressure of zero.
    InvalidPressure,
    /// The derived FO2 is outside 1–100 %.
    Fo2OutOfRange,
    /// Supply voltage is under the alarm threshold.
    LowBattery,
    /// The new coefficient falls outside the cell kind's plausible band.
    CoefficientOutOfRange(CellIndex),
    /// The stored coefficient did not read back as written.
    Mismatch(CellIndex),
    /// The store refused the write outright.
    WriteFailed(CellIndex),
    /// The cell has no sample to calibrate against.
    NoSample(CellIndex),
}

impl fmt::Display for CalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodUndefined => write!(f, "calibration method undefined"),
            Self::NoReference => write!(f, "no usable reference cell"),
            Self::InvalidPressure => write!(f, "reference pressure invalid"),
            Self::Fo2OutOfRange => write!(f, "derived FO2 out of range"),
            Self::LowBattery => write!(f, "supply voltage too low"),
            Self::CoefficientOutOfRange(c) => write!(f, "coefficient out of range on {c}"),
            Self::Mismatch(c) => write!(f, "calibration mismatch on {c}"),
            Self::WriteFailed(c) => write!(f, "coefficient write failed on {c}"),
            Self::NoSample(c) => write!(f, "no sample on {c}"),
        }
    }
}

impl From<CalError> for Error {
    fn from(e: CalError) -> Self {
        Self::Calibration(e)
    }
}

// ---------------------------------------------------------------------------
// Non-fatal taxonomy
// ---------------------------------------------------------------------------

/// Transient conditions: logged, counted per kind, execution continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NonFatalError {
    FlashLock = 0,
    Eeprom = 1,
    OutOfDate = 2,
    Timeout = 3,
    Queueing = 4,
    CanOverflow = 5,
    CanTx = 6,
    UndefinedCalMethod = 7,
    CalMethod = 8,
    InvalidCellNumber = 9,
    CalMismatch = 10,
    Menu = 11,
    UnknownMessage = 12,
    CellOverrange = 13,
    ConfigRejected = 14,
    MenuPacing = 15,
    ShutdownAbandoned = 16,
}

impl NonFatalError {
    /// Number of distinct kinds; sizes the counter table.
    pub const COUNT: usize = 17;

    /// Every kind, in discriminant order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::FlashLock,
        Self::Eeprom,
        Self::OutOfDate,
        Self::Timeout,
        Self::Queueing,
        Self::CanOverflow,
        Self::CanTx,
        Self::UndefinedCalMethod,
        Self::CalMethod,
        Self::InvalidCellNumber,
        Self::CalMismatch,
        Self::Menu,
        Self::UnknownMessage,
        Self::CellOverrange,
        Self::ConfigRejected,
        Self::MenuPacing,
        Self::ShutdownAbandoned,
    ];

    /// Slot in the counter table.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NonFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FlashLock => "flash lock",
            Self::Eeprom => "eeprom",
            Self::OutOfDate => "config out of date",
            Self::Timeout => "timeout",
            Self::Queueing => "queueing",
            Self::CanOverflow => "CAN overflow",
            Self::CanTx => "CAN tx",
            Self::UndefinedCalMethod => "undefined cal method",
            Self::CalMethod => "cal method",
            Self::InvalidCellNumber => "invalid cell number",
            Self::CalMismatch => "cal mismatch",
            Self::Menu => "menu",
            Self::UnknownMessage => "unknown message",
            Self::CellOverrange => "cell overrange",
            Self::ConfigRejected => "config rejected",
            Self::MenuPacing => "menu pacing",
            Self::ShutdownAbandoned => "shutdown abandoned",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Fatal taxonomy
// ---------------------------------------------------------------------------

/// Conditions that make continued operation unsafe to reason about.
/// They are recorded in the crash log and the device resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FatalError {
    StackOverflow = 0x01,
    HardFault = 0x02,
    UndefinedState = 0x03,
    StorageCorrupted = 0x04,
    Assertion = 0x05,
}

impl FatalError {
    /// Wire / crash-record code.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::HardFault => write!(f, "hard fault"),
            Self::UndefinedState => write!(f, "undefined state"),
            Self::StorageCorrupted => write!(f, "storage corrupted"),
            Self::Assertion => write!(f, "assertion failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
