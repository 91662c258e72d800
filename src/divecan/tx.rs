//! Outbound frame builders.
//!
//! Pure functions from domain values to [`BusFrame`]s.  Nothing here
//! touches a port; the controller decides when and where to send.

use super::frame::{BusFrame, MAX_PAYLOAD};
use super::ids::{self, DeviceType, outbound};
use crate::cells::PerCell;

// ── Status error byte ────────────────────────────────────────

pub const ERR_LOW_BATTERY: u8 = 0x01;
pub const ERR_SOLENOID: u8 = 0x04;
pub const ERR_NONE: u8 = 0x08;
/// No error; the handset shows the battery voltage.
pub const ERR_NONE_SHOW_BATT: u8 = 0x0A;

/// Payload of the bus-init frame we send at start-up.
const BUS_INIT_PAYLOAD: [u8; 3] = [0x8a, 0xf3, 0x00];

/// Calibration result codes.
pub const CAL_OK: u8 = 0x01;
pub const CAL_ACK: u8 = 0x05;

// ── Identity ─────────────────────────────────────────────────

pub fn bus_init(ours: DeviceType, target: DeviceType) -> BusFrame {
    BusFrame::new(ids::BUS_INIT | (u32::from(ours.id()) << 8) | u32::from(target.id()), &BUS_INIT_PAYLOAD)
}

pub fn id(ours: DeviceType, manufacturer: u8, firmware_version: u8) -> BusFrame {
    BusFrame::new(outbound(ids::BUS_ID, ours), &[manufacturer, 0x00, firmware_version])
}

/// Name, zero padded to 8 bytes.
pub fn name(ours: DeviceType, name: &str) -> BusFrame {
    let mut data = [0u8; MAX_PAYLOAD];
    for (slot, b) in data.iter_mut().zip(name.bytes()) {
        *slot = b;
    }
    BusFrame::new(outbound(ids::BUS_NAME, ours), &data)
}

/// Supply voltage in tenths of a volt, saturated to a byte.
pub fn battery_byte(volts: f32) -> u8 {
    (volts * 10.0).clamp(0.0, 255.0) as u8
}

pub fn status(ours: DeviceType, supply_volts: f32, setpoint: u8, error: u8) -> BusFrame {
    BusFrame::new(
        outbound(ids::BUS_STATUS, ours),
        &[battery_byte(supply_volts), 0, 0, 0, 0, setpoint, 0xFF, error],
    )
}

/// Single-byte battery flag understood by older handsets.
pub fn legacy_battery(ours: DeviceType, battery_ok: bool) -> BusFrame {
    BusFrame::new(outbound(ids::LEGACY_BATTERY, ours), &[u8::from(battery_ok)])
}

// ── PPO2 broadcast ───────────────────────────────────────────

pub fn ppo2(ours: DeviceType, cells: PerCell<u8>) -> BusFrame {
    let [c1, c2, c3] = cells.0;
    BusFrame::new(outbound(ids::PPO2, ours), &[0x00, c1, c2, c3])
}

/// Millivolts (hundredths of a millivolt), big-endian per cell.
pub fn millis(ours: DeviceType, cells: PerCell<u16>) -> BusFrame {
    let [a, b, c] = cells.0.map(u16::to_be_bytes);
    BusFrame::new(
        outbound(ids::CELL_MILLIS, ours),
        &[a[0], a[1], b[0], b[1], c[0], c[1], 0x00],
    )
}

pub fn cell_state(ours: DeviceType, included_mask: u8, consensus: u8) -> BusFrame {
    BusFrame::new(outbound(ids::CELL_STATE, ours), &[included_mask, consensus])
}

// ── Calibration ──────────────────────────────────────────────

pub fn cal_ack(ours: DeviceType) -> BusFrame {
    BusFrame::new(outbound(ids::CAL, ours), &[CAL_ACK, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0x00])
}

/// Millivolts scaled down to whole millivolts, saturated to a byte.
pub fn short_millivolts(centi_mv: u16) -> u8 {
    (centi_mv / 100).min(u16::from(u8::MAX)) as u8
}

pub fn cal_result(ours: DeviceType, code: u8, millivolts: PerCell<u16>, fo2: u8, pressure_mbar: u16) -> BusFrame {
    let [m1, m2, m3] = millivolts.0.map(short_millivolts);
    let [p_hi, p_lo] = pressure_mbar.to_be_bytes();
    BusFrame::new(outbound(ids::CAL, ours), &[code, m1, m2, m3, fo2, p_hi, p_lo, 0x07])
}

// ── Extensions ───────────────────────────────────────────────

/// An 8-byte little-endian `f64` under an extension class.
pub fn telemetry(class: u32, ours: DeviceType, value: f64) -> BusFrame {
    BusFrame::new(outbound(class, ours), &value.to_le_bytes())
}

/// Split free text into 8-byte frames; the last carries the remainder.
pub fn log_text_frames(ours: DeviceType, text: &str) -> impl Iterator<Item = BusFrame> + '_ {
    text.as_bytes()
        .chunks(MAX_PAYLOAD)
        .map(move |chunk| BusFrame::new(outbound(ids::LOG_TEXT, ours), chunk))
}
