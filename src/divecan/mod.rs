//! DiveCAN bus protocol: identifiers, frame codec, inbound dispatch, the
//! menu sub-protocol and the periodic broadcast.

pub mod broadcast;
pub mod dispatcher;
pub mod frame;
pub mod ids;
pub mod menu;
pub mod tx;

pub use frame::BusFrame;
pub use ids::DeviceType;
