//! Supply policy: where the board draws power from and when the battery
//! counts as low.

use serde::{Deserialize, Serialize};

/// Power source selection, 2-bit configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowerMode {
    Battery = 0,
    /// Battery first, falling back to bus power.
    #[default]
    BatteryThenCan = 1,
    Can = 2,
    /// Power to the cells and solenoid is cut.
    Off = 3,
}

impl PowerMode {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Battery,
            1 => Self::BatteryThenCan,
            2 => Self::Can,
            _ => Self::Off,
        }
    }

    /// The solenoid is never driven with the output stage unpowered.
    pub const fn allows_solenoid(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Low-battery alarm threshold, 2-bit configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatteryThreshold {
    /// Alkaline 9 V block.
    #[default]
    NineVolt = 0,
    LiIon1S = 1,
    LiIon2S = 2,
    LiIon3S = 3,
}

impl BatteryThreshold {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::NineVolt,
            1 => Self::LiIon1S,
            2 => Self::LiIon2S,
            _ => Self::LiIon3S,
        }
    }

    /// Alarm voltage.
    pub const fn volts(self) -> f32 {
        match self {
            Self::NineVolt => 7.7,
            Self::LiIon1S => 3.0,
            Self::LiIon2S => 6.0,
            Self::LiIon3S => 9.0,
        }
    }

    pub fn battery_ok(self, supply_volts: f32) -> bool {
        supply_volts >= self.volts()
    }
}
