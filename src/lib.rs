//! Oxygen controller core for a closed-circuit rebreather head.
//!
//! Votes three oxygen cells down to one trusted PPO2, holds a setpoint
//! with a PID-driven solenoid, calibrates cells against a digital
//! reference and speaks DiveCAN to the handset.  Every hardware touch
//! point is a port trait in [`app::ports`], so the whole core runs on the
//! host against mocks.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod calibration;
pub mod cells;
pub mod config;
pub mod consensus;
pub mod control;
pub mod diagnostics;
pub mod divecan;
pub mod error;
pub mod power;

pub use app::service::Controller;
pub use error::{Error, Result};
