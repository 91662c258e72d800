//! Outbound controller events.
//!
//! The [`Controller`](super::service::Controller) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to the console, write a dive log,
//! mirror them onto the bus.

use crate::calibration::CalOutcome;
use crate::divecan::ids::DeviceType;
use crate::error::FatalError;

/// Structured events emitted by the controller core.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The controller has started with the given configuration.
    Started { device: DeviceType, config_bits: u32 },

    /// Periodic snapshot, one per broadcast.
    Telemetry(TelemetryData),

    /// A bus peer changed the setpoint (centibar).
    SetpointChanged(u8),

    /// A calibration run reached a terminal state.
    CalibrationFinished(CalOutcome),

    /// A menu edit was validated and persisted.
    ConfigChanged { config_bits: u32 },

    /// The bus-enable line dropped after a shutdown request; powering off.
    ShutdownRequested,

    /// The bus stayed enabled for the whole shutdown window.
    ShutdownAbandoned,

    /// A fatal condition was recorded; the device must reset.
    Fatal(FatalError),
}

/// A point-in-time snapshot suitable for logging or transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryData {
    /// Centibar.
    pub consensus_ppo2: u8,
    /// Bar.
    pub precision_ppo2: f64,
    /// Cells in the vote, 0–3.
    pub confidence: u8,
    pub setpoint: u8,
    pub duty: f64,
    pub solenoid_on: bool,
    pub supply_volts: f32,
}
