//! Message identifiers and device types.
//!
//! A 29-bit identifier carries the message class in its upper bits and the
//! sender's device type in the low nibble.  Menu traffic additionally puts
//! the addressed peer in bits 8..=11.

use serde::{Deserialize, Serialize};

/// Bits that select the message class.
pub const ID_MASK: u32 = 0x1FFF_F000;

pub const BUS_ID: u32 = 0x0D00_0000;
pub const BUS_NAME: u32 = 0x0D01_0000;
pub const BUS_OFF: u32 = 0x0D03_0000;
pub const PPO2: u32 = 0x0D04_0000;
pub const LEGACY_BATTERY: u32 = 0x0D07_0000;
pub const ATMOS: u32 = 0x0D08_0000;
pub const MENU: u32 = 0x0D0A_0000;
pub const CELL_MILLIS: u32 = 0x0D11_0000;
pub const CAL: u32 = 0x0D12_0000;
pub const CAL_REQ: u32 = 0x0D13_0000;
pub const BUS_MENU_OPEN: u32 = 0x0D30_0000;
pub const BUS_INIT: u32 = 0x0D37_0000;
pub const SETPOINT: u32 = 0x0DC9_0000;
pub const CELL_STATE: u32 = 0x0DCA_0000;
pub const BUS_STATUS: u32 = 0x0DCB_0000;

// ── Extension ids (this firmware only) ───────────────────────

pub const LOG_TEXT: u32 = 0x0F00_0000;
pub const PID_P_GAIN: u32 = 0x0F10_0000;
pub const PID_I_GAIN: u32 = 0x0F11_0000;
pub const PID_D_GAIN: u32 = 0x0F12_0000;
pub const PID_INTEGRAL: u32 = 0x0F13_0000;
pub const PID_DERIVATIVE: u32 = 0x0F14_0000;
pub const SOLENOID_DUTY: u32 = 0x0F15_0000;
pub const PRECISION_CONSENSUS: u32 = 0x0F16_0000;
pub const PRECISION_C1: u32 = 0x0F20_0000;
pub const PRECISION_C2: u32 = 0x0F21_0000;
pub const PRECISION_C3: u32 = 0x0F22_0000;

/// Node role, carried in the low nibble of every identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceType {
    Controller = 1,
    Oboe = 2,
    Monitor = 3,
    Solo = 4,
    Revo = 5,
}

impl DeviceType {
    pub const fn from_nibble(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Controller),
            2 => Some(Self::Oboe),
            3 => Some(Self::Monitor),
            4 => Some(Self::Solo),
            5 => Some(Self::Revo),
            _ => None,
        }
    }

    pub const fn id(self) -> u8 {
        self as u8
    }
}

/// Peers whose ping we answer.
pub const fn is_ping_peer(source: u8) -> bool {
    matches!(source, 1..=3)
}

/// Outbound id for `class` sent as `ours`.
pub const fn outbound(class: u32, ours: DeviceType) -> u32 {
    class | ours as u32
}

/// Menu frames carry the addressed peer in the second nibble.
pub const fn menu_id(ours: DeviceType, peer: u8) -> u32 {
    MENU | ours as u32 | ((peer as u32 & 0xF) << 8)
}

/// Message classes the dispatcher distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    BusId,
    BusName,
    BusOff,
    Ppo2,
    LegacyBattery,
    Atmos,
    Menu,
    CellMillis,
    Cal,
    CalRequest,
    BusMenuOpen,
    BusInit,
    Setpoint,
    CellState,
    BusStatus,
    LogText,
    Gain(crate::control::pid::GainTerm),
    Unknown(u32),
}

pub fn classify(id: u32) -> MessageClass {
    use crate::control::pid::GainTerm;

    match id & ID_MASK {
        BUS_ID => MessageClass::BusId,
        BUS_NAME => MessageClass::BusName,
        BUS_OFF => MessageClass::BusOff,
        PPO2 => MessageClass::Ppo2,
        LEGACY_BATTERY => MessageClass::LegacyBattery,
        ATMOS => MessageClass::Atmos,
        MENU => MessageClass::Menu,
        CELL_MILLIS => MessageClass::CellMillis,
        CAL => MessageClass::Cal,
        CAL_REQ => MessageClass::CalRequest,
        BUS_MENU_OPEN => MessageClass::BusMenuOpen,
        BUS_INIT => MessageClass::BusInit,
        SETPOINT => MessageClass::Setpoint,
        CELL_STATE => MessageClass::CellState,
        BUS_STATUS => MessageClass::BusStatus,
        LOG_TEXT => MessageClass::LogText,
        PID_P_GAIN => MessageClass::Gain(GainTerm::Proportional),
        PID_I_GAIN => MessageClass::Gain(GainTerm::Integral),
        PID_D_GAIN => MessageClass::Gain(GainTerm::Derivative),
        other => MessageClass::Unknown(other),
    }
}
