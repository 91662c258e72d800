//! Closed-loop PPO2 control: the PID law and the solenoid pulse scheduler.

use serde::{Deserialize, Serialize};

pub mod pid;
pub mod solenoid;

/// How PPO2 is held at the setpoint, 2-bit configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControlScheme {
    /// The valve is never fired; the diver flies the loop by hand.
    Off = 0,
    #[default]
    SolenoidPid = 1,
}

impl ControlScheme {
    /// `None` for the two unassigned encodings.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0b11 {
            0 => Some(Self::Off),
            1 => Some(Self::SolenoidPid),
            _ => None,
        }
    }
}
