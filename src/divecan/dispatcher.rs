//! Inbound frame decoding.
//!
//! Stateless: every frame maps to one [`ControllerCommand`] from its
//! masked identifier and payload alone.  Cross-frame state (menu saves,
//! calibration runs) lives with the controller.

use log::{debug, warn};

use super::frame::BusFrame;
use super::ids::{MessageClass, classify, is_ping_peer};
use crate::app::commands::ControllerCommand;
use crate::calibration::CalRequest;

/// Decode one inbound frame.
pub fn decode(frame: &BusFrame) -> ControllerCommand {
    let peer = frame.source();
    match classify(frame.id) {
        MessageClass::BusId if is_ping_peer(peer) => ControllerCommand::Ping { peer },
        MessageClass::BusId => {
            debug!("ping from unrecognised device {peer}");
            ControllerCommand::Ignored
        }
        MessageClass::BusInit => ControllerCommand::BusInit { peer },
        MessageClass::CalRequest => match CalRequest::from_payload(frame.payload()) {
            Some(req) => ControllerCommand::Calibrate(req),
            None => short(frame),
        },
        MessageClass::Menu => ControllerCommand::Menu(*frame),
        MessageClass::Setpoint if frame.len >= 1 => ControllerCommand::Setpoint(frame.byte(0)),
        MessageClass::Atmos if frame.len >= 4 => {
            ControllerCommand::Atmos(u16::from_be_bytes([frame.byte(2), frame.byte(3)]))
        }
        MessageClass::BusOff => ControllerCommand::Shutdown,
        MessageClass::Gain(term) => match <[u8; 8]>::try_from(frame.payload()) {
            Ok(bytes) => ControllerCommand::SetGain(term, f64::from_le_bytes(bytes)),
            Err(_) => short(frame),
        },
        MessageClass::BusName
        | MessageClass::Ppo2
        | MessageClass::LegacyBattery
        | MessageClass::CellMillis
        | MessageClass::Cal
        | MessageClass::BusMenuOpen
        | MessageClass::CellState
        | MessageClass::BusStatus
        | MessageClass::LogText => ControllerCommand::Ignored,
        MessageClass::Setpoint | MessageClass::Atmos => short(frame),
        MessageClass::Unknown(class) => {
            debug!("unknown message {frame:?}");
            ControllerCommand::Unknown(class)
        }
    }
}

fn short(frame: &BusFrame) -> ControllerCommand {
    warn!("short payload {frame:?}");
    ControllerCommand::Unknown(frame.class())
}
