//! Inbound commands to the controller.
//!
//! The [`dispatcher`](crate::divecan::dispatcher) turns each bus frame into
//! one of these; the [`Controller`](super::service::Controller) interprets
//! and acts upon them.

use crate::calibration::CalRequest;
use crate::control::pid::GainTerm;
use crate::divecan::frame::BusFrame;

/// Actions a bus peer can request of the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerCommand {
    /// Identify ourselves to a recognised peer.
    Ping { peer: u8 },

    /// A peer announced itself on the bus; treated like a ping.
    BusInit { peer: u8 },

    /// New setpoint, centibar.
    Setpoint(u8),

    /// New ambient pressure, mbar.
    Atmos(u16),

    /// Start a calibration run.
    Calibrate(CalRequest),

    /// Overwrite one PID gain.
    SetGain(GainTerm, f64),

    /// The bus is going down; power off if the enable line agrees.
    Shutdown,

    /// Handed to the menu sub-protocol as-is.
    Menu(BusFrame),

    /// Recognised but needs no action (another node's broadcast).
    Ignored,

    /// Class not understood, or a payload too short to decode.
    Unknown(u32),
}
