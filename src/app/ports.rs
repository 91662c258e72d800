//! Port traits: the boundary between the controller core and the board.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controller (domain)
//! ```
//!
//! Driven adapters (bus transmitter, solenoid driver, storage, event sinks)
//! implement these traits.  The [`Controller`](super::service::Controller)
//! consumes them via generics, so the core never touches hardware directly
//! and every scenario runs on the host against mocks.
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **CoefficientStore** reads MUST return what the medium actually holds,
//!   not a cached copy of the last write: calibration verifies against it.
//! - All port errors are typed `Copy` enums; callers handle every variant.

use embassy_time::Duration;
use embedded_hal::delay::DelayNs;

use crate::config::Configuration;
use crate::divecan::frame::BusFrame;

// ───────────────────────────────────────────────────────────────
// Bus (domain ↔ CAN transceiver)
// ───────────────────────────────────────────────────────────────

/// Queue one frame for transmission.  Never blocks.
pub trait BusPort {
    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError>;
}

/// Handshake used to pace multi-frame menu replies.
pub trait BusActivity {
    /// Wait until the peer shows bus activity or `timeout` elapses.
    /// Returns `false` on timeout.
    fn wait_for_activity(&mut self, timeout: Duration) -> bool;
}

/// Level of the bus-enable line driven by the handset.
pub trait BusEnable {
    fn bus_enabled(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Board (domain → power / actuators)
// ───────────────────────────────────────────────────────────────

/// Supply voltage as measured by the board, in volts.
pub trait SupplyVoltage {
    fn supply_voltage(&mut self) -> f32;
}

/// The oxygen injection valve.
pub trait SolenoidPort {
    fn set_solenoid(&mut self, on: bool);
}

/// Whole-device power control.  The sequencing behind it is board code.
pub trait PowerPort {
    fn shutdown(&mut self);
}

/// Everything the bus-facing side of the controller drives.
pub trait Board: BusPort + BusActivity + BusEnable + SupplyVoltage + PowerPort + DelayNs {}

impl<T> Board for T where T: BusPort + BusActivity + BusEnable + SupplyVoltage + PowerPort + DelayNs {}

// ───────────────────────────────────────────────────────────────
// Event sink (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`ControllerEvent`](super::events::ControllerEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::ControllerEvent);
}

// ───────────────────────────────────────────────────────────────
// Persistence
// ───────────────────────────────────────────────────────────────

/// Calibration coefficients, one `f64` per key.
pub trait CoefficientStore {
    fn write_coefficient(&mut self, key: u8, value: f64) -> Result<(), StorageError>;

    /// Read back from the medium.  [`StorageError::NotFound`] if the key
    /// was never written.
    fn read_coefficient(&self, key: u8) -> Result<f64, StorageError>;
}

/// Loads and persists the [`Configuration`] record.
///
/// Implementations MUST validate before persisting.  Invalid records are
/// rejected with [`ConfigError::ValidationFailed`], never silently patched.
pub trait ConfigPort {
    /// [`ConfigError::NotFound`] on first boot.
    fn load(&self) -> Result<Configuration, ConfigError>;

    fn save(&self, config: &Configuration) -> Result<(), ConfigError>;
}

/// Namespaced key-value bytes (crash records).
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Everything the controller persists through.
pub trait Store: CoefficientStore + ConfigPort + StoragePort {}

impl<T> Store for T where T: CoefficientStore + ConfigPort + StoragePort {}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] and [`CoefficientStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Generic I/O error.
    IoError,
    /// Stored bytes do not decode.
    Corrupted,
}

/// Errors from [`BusPort::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Transmit queue full; the frame was dropped.
    QueueFull,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored value corrupted"),
        }
    }
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "tx queue full"),
        }
    }
}
