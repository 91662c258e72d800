//! Cell voting.
//!
//! [`compute_consensus`] fuses the three latest [`SensorReading`]s into one
//! trusted PPO2.  It is pure and total: whatever the inputs, it returns a
//! value, and that value is 0 when nothing is trustworthy.
//!
//! A reading is a *candidate* iff its status is `Ok` and it is no older than
//! the stale threshold.  The age test is `now.wrapping_sub(timestamp)`:
//! a timestamp ahead of `now` (clock reset, default-initialised slot) wraps
//! to a huge age and is treated as stale.  Keep it unsigned.
//!
//! With three candidates the outliers are voted out: sorted low/mid/high,
//! `low` is dropped if it sits more than `max_deviation` under `mid`, and
//! `high` if it sits more than `max_deviation` over.  `mid` always stays.

use serde::{Deserialize, Serialize};

use crate::cells::{CellIndex, CellStatus, PerCell, SensorReading, Tick};

/// Tunables for the voting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Oldest sample (ms) still allowed to vote.
    pub stale_threshold_ms: u32,
    /// Largest distance (centibar) from the median before a value is voted out.
    pub max_deviation: u8,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            stale_threshold_ms: 1000,
            max_deviation: 10,
        }
    }
}

/// Result of one vote.  Recomputed from scratch every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub included: PerCell<bool>,
    /// Per-cell inputs echoed regardless of inclusion.
    pub ppo2: PerCell<u8>,
    pub millivolts: PerCell<u16>,
    pub status: PerCell<CellStatus>,
    pub precision: PerCell<f64>,
    /// Centibar.
    pub consensus_ppo2: u8,
    /// Bar.
    pub precision_ppo2: f64,
}

impl Consensus {
    /// Bitmask of voting cells, bit 0 = C1.
    pub fn included_mask(&self) -> u8 {
        self.included
            .iter()
            .filter(|(_, inc)| **inc)
            .fold(0u8, |mask, (cell, _)| mask | (1 << cell.index()))
    }
}

fn is_candidate(r: &SensorReading, now: Tick, params: &ConsensusParams) -> bool {
    r.status == CellStatus::Ok && now.wrapping_sub(r.timestamp) <= params.stale_threshold_ms
}

/// Vote the three cells down to one PPO2.
pub fn compute_consensus(
    c1: &SensorReading,
    c2: &SensorReading,
    c3: &SensorReading,
    now: Tick,
    params: &ConsensusParams,
) -> Consensus {
    let readings = PerCell([*c1, *c2, *c3]);
    let mut included = readings.map(|_, r| is_candidate(r, now, params));

    let candidates: heapless::Vec<CellIndex, 3> = CellIndex::ALL.into_iter().filter(|c| included[*c]).collect();

    if let &[a, b, c] = candidates.as_slice() {
        let mut sorted = [a, b, c];
        sorted.sort_by_key(|cell| readings[*cell].ppo2);
        let [low, mid, high] = sorted;
        let (lo, md, hi) = (readings[low].ppo2, readings[mid].ppo2, readings[high].ppo2);
        if md - lo > params.max_deviation {
            included[low] = false;
        }
        if hi - md > params.max_deviation {
            included[high] = false;
        }
    }

    let (count, sum, precision_sum) = CellIndex::ALL
        .into_iter()
        .filter(|c| included[*c])
        .fold((0u32, 0u32, 0.0f64), |(n, s, p), c| {
            (n + 1, s + u32::from(readings[c].ppo2), p + readings[c].precision_ppo2)
        });

    let (consensus_ppo2, precision_ppo2) = if count == 0 {
        (0, 0.0)
    } else {
        ((sum / count) as u8, precision_sum / f64::from(count))
    };

    Consensus {
        included,
        ppo2: readings.map(|_, r| r.ppo2),
        millivolts: readings.map(|_, r| r.millivolts),
        status: readings.map(|_, r| r.status),
        precision: readings.map(|_, r| r.precision_ppo2),
        consensus_ppo2,
        precision_ppo2,
    }
}

/// Convenience over a [`PerCell`] of readings.
pub fn vote(readings: &PerCell<SensorReading>, now: Tick, params: &ConsensusParams) -> Consensus {
    compute_consensus(
        &readings[CellIndex::C1],
        &readings[CellIndex::C2],
        &readings[CellIndex::C3],
        now,
        params,
    )
}

/// Number of cells that took part in the vote (0–3).
pub fn cell_confidence(consensus: &Consensus) -> u8 {
    consensus.included.iter().filter(|(_, inc)| **inc).count() as u8
}
