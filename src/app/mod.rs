//! Application core: the controller and the boundary it talks through.
//!
//! [`service::Controller`] owns every piece of runtime state and applies
//! the domain rules: cell voting, PID control, calibration, the bus menu
//! and shutdown.  Inbound frames are decoded into [`commands`], outcomes
//! leave as [`events`], and every hardware touch goes through the
//! **port traits** in [`ports`], so this layer runs on the host against
//! mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
