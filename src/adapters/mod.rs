//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements                          | Connects to               |
//! |------------|-------------------------------------|---------------------------|
//! | `activity` | BusActivity                         | RX notification + delay   |
//! | `gpio`     | SolenoidPort, BusEnable             | `embedded-hal` pins       |
//! | `log_sink` | EventSink                           | `log` facade              |
//! | `nvs`      | CoefficientStore, ConfigPort,       | in-memory store           |
//! |            | StoragePort                         |                           |

pub mod activity;
pub mod gpio;
pub mod log_sink;
pub mod nvs;
