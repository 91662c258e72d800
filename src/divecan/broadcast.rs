//! Periodic PPO2 broadcast.
//!
//! Built from a fresh [`Consensus`] every broadcast tick.  The per-cell
//! PPO2 bytes go through [`displayed_ppo2`] first: the handset must see the
//! FAIL sentinel whenever this side does not trust a number.

use heapless::Vec;

use super::frame::BusFrame;
use super::ids::{self, DeviceType};
use super::tx;
use crate::cells::{CellIndex, CellStatus, PPO2_FAIL, PerCell};
use crate::consensus::Consensus;
use crate::control::pid::PidState;

/// Frames always sent: PPO2, millivolts, cell state.
pub const CORE_FRAMES: usize = 3;

/// Frames in one broadcast with telemetry: the core frames plus ten
/// extension frames.
pub const BROADCAST_FRAMES: usize = CORE_FRAMES + 10;

/// Per-cell PPO2 as it goes on the wire.
///
/// Any cell needing calibration while no run is active blanks all three
/// cells.  Otherwise only failed cells are blanked.
pub fn displayed_ppo2(consensus: &Consensus, calibrating: bool) -> PerCell<u8> {
    let needs_cal = consensus
        .status
        .iter()
        .any(|(_, s)| *s == CellStatus::NeedsCalibration);
    if needs_cal && !calibrating {
        return PerCell([PPO2_FAIL; 3]);
    }
    consensus.ppo2.map(|c, ppo2| {
        if consensus.status[c] == CellStatus::Fail {
            PPO2_FAIL
        } else {
            *ppo2
        }
    })
}

/// Controller-side values carried by the telemetry frames.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry<'a> {
    pub pid: &'a PidState,
    pub duty: f64,
}

/// The frames of one broadcast, in transmit order.  Extension frames are
/// only appended when `telemetry` is given.
pub fn broadcast_frames(
    ours: DeviceType,
    consensus: &Consensus,
    calibrating: bool,
    telemetry: Option<Telemetry<'_>>,
) -> Vec<BusFrame, BROADCAST_FRAMES> {
    let mut frames = Vec::new();
    let mut push = |f: BusFrame| {
        let _ = frames.push(f);
    };

    push(tx::ppo2(ours, displayed_ppo2(consensus, calibrating)));
    push(tx::millis(ours, consensus.millivolts));
    push(tx::cell_state(ours, consensus.included_mask(), consensus.consensus_ppo2));

    let Some(telemetry) = telemetry else {
        return frames;
    };

    push(tx::telemetry(ids::PRECISION_CONSENSUS, ours, consensus.precision_ppo2));
    for (cell, class) in CellIndex::ALL
        .into_iter()
        .zip([ids::PRECISION_C1, ids::PRECISION_C2, ids::PRECISION_C3])
    {
        push(tx::telemetry(class, ours, consensus.precision[cell]));
    }

    let pid = telemetry.pid;
    push(tx::telemetry(ids::PID_INTEGRAL, ours, pid.integral));
    push(tx::telemetry(ids::PID_DERIVATIVE, ours, pid.derivative));
    push(tx::telemetry(ids::SOLENOID_DUTY, ours, telemetry.duty));
    push(tx::telemetry(ids::PID_P_GAIN, ours, pid.gains.kp));
    push(tx::telemetry(ids::PID_I_GAIN, ours, pid.gains.ki));
    push(tx::telemetry(ids::PID_D_GAIN, ours, pid.gains.kd));
    frames
}
