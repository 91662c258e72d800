//! Controller service: the single owner of every piece of mutable state.
//!
//! [`Controller`] owns the sensor hub, PID state, solenoid scheduler,
//! calibration machine, menu state and the setpoint / ambient pressure
//! scalars.  Nothing here is global.  All I/O flows through port traits
//! passed in at call sites, so every scenario runs against mocks.
//!
//! ```text
//!  CellInputs ──▶ ┌──────────────────────────────┐ ──▶ BusPort
//!                 │          Controller           │
//!    BusFrame ──▶ │ hub · consensus · PID · cal   │ ──▶ SolenoidPort
//!                 └──────────────────────────────┘ ──▶ EventSink
//! ```
//!
//! Work is tick driven.  The caller feeds inbound frames through
//! [`Controller::handle_frame`] and calls [`Controller::poll`] from its
//! main loop; each periodic activity checks its own deadline.  The only
//! waits are the bounded ones: shutdown polling and menu pacing.

use embassy_time::Duration;
use log::{debug, error, info, warn};

use crate::calibration::{CalContext, CalState, CalibrationMachine};
use crate::cells::{CellInputs, SensorHub, Tick};
use crate::config::{Configuration, ControllerSettings};
use crate::consensus::{Consensus, cell_confidence, vote};
use crate::control::pid::{PidState, step_pid};
use crate::control::solenoid::{SolenoidScheduler, depth_compensated};
use crate::diagnostics::{CrashEntry, CrashLog, ErrorCounters};
use crate::divecan::broadcast::{Telemetry, broadcast_frames};
use crate::divecan::dispatcher;
use crate::divecan::frame::BusFrame;
use crate::divecan::ids::DeviceType;
use crate::divecan::menu::{ConfigEdit, MenuContext, MenuHandler};
use crate::divecan::tx;
use crate::error::{Error, FatalError, NonFatalError, Result};

use super::commands::ControllerCommand;
use super::events::{ControllerEvent, TelemetryData};
use super::ports::{Board, BusPort, CoefficientStore, ConfigError, EventSink, SolenoidPort, Store, SupplyVoltage};

/// Consecutive clamped PID steps after which the status frame reports a
/// solenoid fault (one minute at the default PID period).
const SOLENOID_FAULT_STEPS: u16 = 600;

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct Controller<'a> {
    inputs: &'a CellInputs,
    settings: ControllerSettings,
    config: Configuration,
    hub: SensorHub,
    pid: PidState,
    solenoid: SolenoidScheduler,
    calibration: CalibrationMachine,
    /// When the pending calibration was accepted; it runs after the settle time.
    cal_accepted_at: Option<Tick>,
    menu: MenuHandler,
    counters: ErrorCounters,
    crash_log: CrashLog,
    /// Centibar.
    setpoint: u8,
    atmos_mbar: u16,
    consensus: Option<Consensus>,
    duty: f64,
    last_pid: Option<Tick>,
    last_broadcast: Option<Tick>,
    reset_required: bool,
}

impl<'a> Controller<'a> {
    /// Build a controller for `config`.  Coefficients are not loaded; see
    /// [`from_storage`](Self::from_storage).
    pub fn new(inputs: &'a CellInputs, settings: ControllerSettings, config: Configuration) -> Result<Self> {
        settings.validate()?;
        config.validate()?;
        let hub = SensorHub::from_config(&config, &settings);
        let pid = PidState::new(settings.pid_gains, settings.integral_min, settings.integral_max);
        let solenoid = SolenoidScheduler::new(settings.solenoid);
        Ok(Self {
            inputs,
            config,
            hub,
            pid,
            solenoid,
            calibration: CalibrationMachine::new(),
            cal_accepted_at: None,
            menu: MenuHandler::new(),
            counters: ErrorCounters::new(),
            crash_log: CrashLog::new(),
            setpoint: settings.default_setpoint,
            atmos_mbar: settings.default_atmos_mbar,
            consensus: None,
            duty: 0.0,
            last_pid: None,
            last_broadcast: None,
            reset_required: false,
            settings,
        })
    }

    /// Load the configuration and coefficients from `store`.
    ///
    /// A missing record is replaced by the default and persisted.  An
    /// unreadable or invalid one falls back to the default, is counted and
    /// left in place.
    pub fn from_storage(inputs: &'a CellInputs, settings: ControllerSettings, store: &mut impl Store) -> Result<Self> {
        let mut counters = ErrorCounters::new();
        let config = match store.load() {
            Ok(config) => config,
            Err(ConfigError::NotFound) => {
                info!("no stored configuration, writing defaults");
                let config = Configuration::default();
                if let Err(e) = store.save(&config) {
                    warn!("default configuration not persisted ({e})");
                    counters.record(NonFatalError::Eeprom);
                }
                config
            }
            Err(ConfigError::ValidationFailed(why)) => {
                warn!("stored configuration rejected ({why}), using defaults");
                counters.record(NonFatalError::OutOfDate);
                Configuration::default()
            }
            Err(e) => {
                warn!("stored configuration unreadable ({e}), using defaults");
                counters.record(NonFatalError::Eeprom);
                Configuration::default()
            }
        };

        let mut controller = Self::new(inputs, settings, config)?;
        controller.counters = counters;
        controller.crash_log.init(&*store);
        controller.hub.load_coefficients(&*store);
        Ok(controller)
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Announce ourselves to the controller on the bus.
    pub fn start(&mut self, bus: &mut impl BusPort, sink: &mut impl EventSink) {
        let ours = self.ours();
        self.send(bus, &tx::bus_init(ours, DeviceType::Controller));
        sink.emit(&ControllerEvent::Started {
            device: ours,
            config_bits: self.config.to_bits(),
        });
        info!("controller started as {ours:?}, config 0x{:08x}", self.config.to_bits());
    }

    /// Run every periodic activity that is due at `now`.
    pub fn poll(
        &mut self,
        now: Tick,
        board: &mut (impl Board + SolenoidPort),
        store: &mut impl Store,
        sink: &mut impl EventSink,
    ) {
        self.control_tick(now, board);
        self.calibration_tick(now, board, store, sink);
        self.broadcast_tick(now, board, sink);
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Decode and act on one inbound frame.
    pub fn handle_frame(
        &mut self,
        frame: &BusFrame,
        now: Tick,
        board: &mut impl Board,
        store: &mut impl Store,
        sink: &mut impl EventSink,
    ) {
        let cmd = dispatcher::decode(frame);
        self.handle_command(cmd, now, board, store, sink);
    }

    pub fn handle_command(
        &mut self,
        cmd: ControllerCommand,
        now: Tick,
        board: &mut impl Board,
        store: &mut impl Store,
        sink: &mut impl EventSink,
    ) {
        match cmd {
            ControllerCommand::Ping { peer } | ControllerCommand::BusInit { peer } => {
                debug!("identify to device {peer}");
                self.send_identity(board);
            }
            ControllerCommand::Setpoint(setpoint) => {
                if setpoint != self.setpoint {
                    info!("setpoint {} -> {setpoint} cb", self.setpoint);
                    sink.emit(&ControllerEvent::SetpointChanged(setpoint));
                }
                self.setpoint = setpoint;
            }
            ControllerCommand::Atmos(mbar) => {
                debug!("ambient {mbar} mbar");
                self.atmos_mbar = mbar;
            }
            ControllerCommand::Calibrate(req) => {
                // Acked even for a duplicate: the handset resends until it hears one.
                self.send(board, &tx::cal_ack(self.ours()));
                if self.calibration.request(req) {
                    self.cal_accepted_at = Some(now);
                }
            }
            ControllerCommand::SetGain(term, value) => {
                info!("gain {term:?} = {value}");
                self.pid.set_gain(term, value);
            }
            ControllerCommand::Shutdown => self.shutdown(board, sink),
            ControllerCommand::Menu(frame) => {
                let ctx = MenuContext {
                    ours: self.settings.identity.device_type,
                    config: &self.config,
                    commit: self.settings.identity.commit.as_str(),
                    pace_timeout: Duration::from_millis(u64::from(self.settings.menu_pace_timeout_ms)),
                };
                if let Some(edit) = self.menu.handle(&frame, &ctx, board, &mut self.counters) {
                    self.apply_config_edit(edit, store, sink);
                }
            }
            ControllerCommand::Ignored => {}
            ControllerCommand::Unknown(class) => {
                debug!("unhandled class 0x{class:08x}");
                self.counters.record(NonFatalError::UnknownMessage);
            }
        }
    }

    /// Identity, status, name and legacy battery, in that order.
    fn send_identity(&mut self, board: &mut (impl BusPort + SupplyVoltage)) {
        let ours = self.ours();
        let volts = board.supply_voltage();
        let battery_ok = self.config.battery_threshold.battery_ok(volts);
        let identity = &self.settings.identity;
        let frames = [
            tx::id(ours, identity.manufacturer_id, identity.firmware_version),
            tx::status(ours, volts, self.setpoint, self.status_error(battery_ok)),
            tx::name(ours, identity.name.as_str()),
            tx::legacy_battery(ours, battery_ok),
        ];
        for f in &frames {
            self.send(board, f);
        }
    }

    fn status_error(&self, battery_ok: bool) -> u8 {
        if !battery_ok {
            tx::ERR_LOW_BATTERY
        } else if self.pid.saturation_count >= SOLENOID_FAULT_STEPS {
            tx::ERR_SOLENOID
        } else {
            tx::ERR_NONE_SHOW_BATT
        }
    }

    /// Poll the bus-enable line; power off only once it drops.
    fn shutdown(&mut self, board: &mut impl Board, sink: &mut impl EventSink) {
        info!("shutdown requested, watching bus enable");
        for _ in 0..self.settings.shutdown_polls {
            if !board.bus_enabled() {
                info!("bus disabled, powering off");
                sink.emit(&ControllerEvent::ShutdownRequested);
                board.shutdown();
                return;
            }
            board.delay_ms(self.settings.shutdown_poll_ms);
        }
        warn!("bus still enabled, shutdown abandoned");
        self.counters.record(NonFatalError::ShutdownAbandoned);
        sink.emit(&ControllerEvent::ShutdownAbandoned);
    }

    fn apply_config_edit(&mut self, edit: ConfigEdit, store: &mut impl Store, sink: &mut impl EventSink) {
        let updated = self
            .config
            .with_byte(edit.byte, edit.value)
            .and_then(|config| store.save(&config).map(|()| config));
        match updated {
            Ok(config) => {
                info!("config byte {} = 0x{:02x}", edit.byte, edit.value);
                if config.cells != self.config.cells {
                    self.hub = SensorHub::from_config(&config, &self.settings);
                    self.hub.load_coefficients(&*store);
                }
                self.config = config;
                sink.emit(&ControllerEvent::ConfigChanged {
                    config_bits: config.to_bits(),
                });
            }
            Err(e) => {
                warn!("config byte {} = 0x{:02x} rejected ({e})", edit.byte, edit.value);
                self.counters.record(NonFatalError::ConfigRejected);
            }
        }
    }

    // ── Periodic activities ───────────────────────────────────

    /// Sample the cells, vote, step the PID when due and drive the valve.
    pub fn control_tick(&mut self, now: Tick, solenoid: &mut impl SolenoidPort) {
        let readings = self.hub.sample_all(self.inputs, now);
        let consensus = vote(&readings, now, &self.settings.consensus);
        self.consensus = Some(consensus);

        if due(self.last_pid, now, self.settings.pid_period_ms) {
            self.last_pid = Some(now);
            let setpoint = f64::from(self.setpoint) / 100.0;
            self.duty = step_pid(setpoint, consensus.precision_ppo2, &mut self.pid);
        }

        let enabled = self.config.solenoid_enabled() && !self.reset_required;
        let requested = if self.config.depth_compensation {
            depth_compensated(self.duty, self.atmos_mbar)
        } else {
            self.duty
        };
        self.solenoid.poll(now, requested, enabled, solenoid);
    }

    /// Run a queued calibration once its settle time has passed.
    pub fn calibration_tick(
        &mut self,
        now: Tick,
        board: &mut (impl BusPort + SupplyVoltage),
        store: &mut impl CoefficientStore,
        sink: &mut impl EventSink,
    ) {
        let Some(accepted) = self.cal_accepted_at else {
            return;
        };
        if now.wrapping_sub(accepted) < self.settings.cal_settle_ms {
            return;
        }
        self.cal_accepted_at = None;

        let readings = self.hub.sample_all(self.inputs, now);
        let ctx = CalContext {
            method: self.config.cal_method,
            readings: &readings,
            battery_ok: self.config.battery_threshold.battery_ok(board.supply_voltage()),
            epsilon: self.settings.cal_epsilon,
        };
        let Some(outcome) = self.calibration.run(&ctx, &mut self.hub, store) else {
            return;
        };
        for kind in self.calibration.take_raised() {
            self.counters.record(kind);
        }

        let result = tx::cal_result(
            self.ours(),
            outcome.code.code(),
            outcome.millivolts,
            outcome.fo2,
            outcome.pressure_mbar,
        );
        self.send(board, &result);
        sink.emit(&ControllerEvent::CalibrationFinished(outcome));
    }

    /// Send the PPO2 broadcast and telemetry when due.
    pub fn broadcast_tick(&mut self, now: Tick, board: &mut (impl BusPort + SupplyVoltage), sink: &mut impl EventSink) {
        if !due(self.last_broadcast, now, self.settings.broadcast_period_ms) {
            return;
        }
        self.last_broadcast = Some(now);

        let consensus = vote(&self.hub.readings(), now, &self.settings.consensus);
        self.consensus = Some(consensus);
        let telemetry = self.config.extended_messages.then_some(Telemetry {
            pid: &self.pid,
            duty: self.duty,
        });
        let frames = broadcast_frames(self.ours(), &consensus, self.calibrating(), telemetry);
        for f in &frames {
            self.send(board, f);
        }

        sink.emit(&ControllerEvent::Telemetry(TelemetryData {
            consensus_ppo2: consensus.consensus_ppo2,
            precision_ppo2: consensus.precision_ppo2,
            confidence: cell_confidence(&consensus),
            setpoint: self.setpoint,
            duty: self.solenoid.latched_duty(),
            solenoid_on: self.solenoid.is_energised(),
            supply_volts: board.supply_voltage(),
        }));
    }

    // ── Diagnostics ───────────────────────────────────────────

    /// Send free text as a run of log frames.
    pub fn log_to_bus(&mut self, bus: &mut impl BusPort, text: &str) {
        for f in tx::log_text_frames(self.ours(), text) {
            self.send(bus, &f);
        }
    }

    /// Record a fatal condition and stop actuating.  The caller resets.
    pub fn record_fatal(
        &mut self,
        fatal: FatalError,
        now: Tick,
        solenoid: &mut impl SolenoidPort,
        store: &mut impl Store,
        sink: &mut impl EventSink,
    ) -> Error {
        error!("fatal: {fatal}");
        self.solenoid.stop(solenoid);
        self.crash_log.write_entry(store, &CrashEntry::new(now, fatal));
        self.reset_required = true;
        sink.emit(&ControllerEvent::Fatal(fatal));
        Error::Fatal(fatal)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn setpoint(&self) -> u8 {
        self.setpoint
    }

    pub fn atmos_mbar(&self) -> u16 {
        self.atmos_mbar
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Last vote, `None` before the first control tick.
    pub fn consensus(&self) -> Option<&Consensus> {
        self.consensus.as_ref()
    }

    pub fn pid(&self) -> &PidState {
        &self.pid
    }

    /// Unclamped duty from the last PID step.
    pub fn duty(&self) -> f64 {
        self.duty
    }

    pub fn solenoid(&self) -> &SolenoidScheduler {
        &self.solenoid
    }

    pub fn calibration_state(&self) -> CalState {
        self.calibration.state()
    }

    pub fn calibration(&self) -> &CalibrationMachine {
        &self.calibration
    }

    pub fn counters(&self) -> &ErrorCounters {
        &self.counters
    }

    pub fn crash_log(&self) -> &CrashLog {
        &self.crash_log
    }

    pub fn hub(&self) -> &SensorHub {
        &self.hub
    }

    pub fn reset_required(&self) -> bool {
        self.reset_required
    }

    // ── Internal ──────────────────────────────────────────────

    fn ours(&self) -> DeviceType {
        self.settings.identity.device_type
    }

    fn calibrating(&self) -> bool {
        self.calibration.is_running()
    }

    fn send(&mut self, bus: &mut impl BusPort, frame: &BusFrame) {
        if let Err(e) = bus.send(frame) {
            warn!("tx {frame:?} failed ({e})");
            self.counters.record(NonFatalError::CanTx);
        }
    }
}

/// Whether a period of `period_ms` has elapsed since `last`.
fn due(last: Option<Tick>, now: Tick, period_ms: u32) -> bool {
    last.is_none_or(|t| now.wrapping_sub(t) >= period_ms)
}
