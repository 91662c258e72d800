//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing controller events through the `log`
//! facade.  Telemetry goes out at debug level so a 10 Hz broadcast does
//! not drown the console.

use log::{debug, error, info, warn};

use crate::app::events::ControllerEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`ControllerEvent`].
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ControllerEvent) {
        match event {
            ControllerEvent::Telemetry(t) => {
                debug!(
                    "TELEM | ppo2={}cb ({:.3} bar) | cells={} | sp={}cb | duty={:.2}{} | {:.1}V",
                    t.consensus_ppo2,
                    t.precision_ppo2,
                    t.confidence,
                    t.setpoint,
                    t.duty,
                    if t.solenoid_on { " ON" } else { "" },
                    t.supply_volts,
                );
            }
            ControllerEvent::Started { device, config_bits } => {
                info!("START | {device:?} config=0x{config_bits:08x}");
            }
            ControllerEvent::SetpointChanged(sp) => {
                info!("SETPOINT | {sp}cb");
            }
            ControllerEvent::CalibrationFinished(outcome) => match outcome.error {
                None => info!(
                    "CAL | ok fo2={}% p={}mbar cells={:?}",
                    outcome.fo2, outcome.pressure_mbar, outcome.calibrated.0
                ),
                Some(e) => warn!("CAL | failed code=0x{:02x} ({e})", outcome.code.code()),
            },
            ControllerEvent::ConfigChanged { config_bits } => {
                info!("CONFIG | 0x{config_bits:08x}");
            }
            ControllerEvent::ShutdownRequested => {
                info!("POWER | shutdown");
            }
            ControllerEvent::ShutdownAbandoned => {
                warn!("POWER | shutdown abandoned, bus still enabled");
            }
            ControllerEvent::Fatal(fatal) => {
                error!("FATAL | {fatal} (0x{:02x})", fatal.code());
            }
        }
    }
}
