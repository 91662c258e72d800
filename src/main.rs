//! o2sim: host simulator for the oxygen controller core.
//!
//! Wires a [`Controller`] to three simulated cells, an in-memory store, a
//! stdout logger and a console bus, then runs a scripted dive on a virtual
//! millisecond clock:
//!
//! ```text
//!  t=0.2s   handset pings
//!  t=1s     calibration request (runs after the 4 s settle)
//!  t=10s    setpoint 0.70 -> 1.30 bar
//!  t=20s    handset browses the menu
//!  t=30s    cell 3 stops reporting
//!  t=50s    bus shutdown, line drops
//! ```
//!
//! Transmitted frames are printed in candump style.  `O2SIM_LOG` sets the
//! log level and `O2SIM_SETTINGS` points at a JSON settings file.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Result, anyhow};
use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use log::{LevelFilter, Log, Metadata, Record, info};

use o2control::adapters::activity::{ActivityFlag, ActivityWaiter};
use o2control::adapters::gpio::{GpioBusEnable, GpioSolenoid};
use o2control::adapters::log_sink::LogEventSink;
use o2control::adapters::nvs::NvsAdapter;
use o2control::app::ports::{BusActivity, BusEnable, BusError, BusPort, PowerPort, SolenoidPort, SupplyVoltage};
use o2control::cells::{CellIndex, CellInputs, RawSample, SelfReport, Tick};
use o2control::config::ControllerSettings;
use o2control::divecan::frame::BusFrame;
use o2control::divecan::ids;
use o2control::divecan::menu::OP_REQ;
use o2control::Controller;

// ── Logger ────────────────────────────────────────────────────

struct StdoutLogger;

static LOGGER: StdoutLogger = StdoutLogger;

impl Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            println!("{:<5} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger() -> Result<()> {
    let level = match std::env::var("O2SIM_LOG").as_deref() {
        Ok("debug") => LevelFilter::Debug,
        Ok("trace") => LevelFilter::Trace,
        Ok("warn") => LevelFilter::Warn,
        _ => LevelFilter::Info,
    };
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

// ── Settings ──────────────────────────────────────────────────

/// `O2SIM_SETTINGS` names a JSON file of overrides; otherwise the sim
/// uses the defaults with a 4 s calibration settle.
fn load_settings() -> Result<ControllerSettings> {
    let Ok(path) = std::env::var("O2SIM_SETTINGS") else {
        return Ok(ControllerSettings {
            cal_settle_ms: 4000,
            ..ControllerSettings::default()
        });
    };
    let text = std::fs::read_to_string(&path)?;
    let settings: ControllerSettings = serde_json::from_str(&text).map_err(|e| anyhow!("{path}: {e}"))?;
    settings.validate().map_err(|e| anyhow!("{path}: {e}"))?;
    info!("settings from {path}");
    Ok(settings)
}

// ── Virtual time ──────────────────────────────────────────────

#[derive(Clone, Default)]
struct SimClock(Rc<Cell<Tick>>);

impl SimClock {
    fn now(&self) -> Tick {
        self.0.get()
    }

    fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

/// Blocking waits advance the virtual clock instead of sleeping.  A
/// pending handset ack lands during the first wait after it was queued.
struct SimDelay {
    clock: SimClock,
    handset_ack: Rc<Cell<bool>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.advance(ns.div_ceil(1_000_000));
        if self.handset_ack.replace(false) {
            ACTIVITY.notify();
        }
    }
}

// ── Pins ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct SimPin(Rc<Cell<bool>>);

impl ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set(true);
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.get())
    }
}

// ── Board ─────────────────────────────────────────────────────

static ACTIVITY: ActivityFlag = ActivityFlag::new();

struct ConsoleBoard {
    activity: ActivityWaiter<'static, SimDelay>,
    solenoid: GpioSolenoid<SimPin>,
    bus_enable: GpioBusEnable<SimPin>,
    supply_volts: f32,
    powered: bool,
    tx_count: usize,
    handset_ack: Rc<Cell<bool>>,
}

impl BusPort for ConsoleBoard {
    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
        self.tx_count += 1;
        // Broadcasts go out ten times a second; only print the rest.
        let class = frame.class();
        let periodic = matches!(class, ids::PPO2 | ids::CELL_MILLIS | ids::CELL_STATE)
            || (class & 0xFF00_0000 == 0x0F00_0000 && class != ids::LOG_TEXT);
        if !periodic {
            println!("  TX {frame:?}");
        }
        // The simulated handset acks the first fragment of a menu reply.
        if class == ids::MENU && frame.byte(0) == 0x10 {
            self.handset_ack.set(true);
        }
        Ok(())
    }
}

impl BusActivity for ConsoleBoard {
    fn wait_for_activity(&mut self, timeout: Duration) -> bool {
        self.activity.wait_for_activity(timeout)
    }
}

impl BusEnable for ConsoleBoard {
    fn bus_enabled(&mut self) -> bool {
        self.bus_enable.bus_enabled()
    }
}

impl SupplyVoltage for ConsoleBoard {
    fn supply_voltage(&mut self) -> f32 {
        self.supply_volts
    }
}

impl PowerPort for ConsoleBoard {
    fn shutdown(&mut self) {
        self.solenoid.set_solenoid(false);
        self.powered = false;
    }
}

impl SolenoidPort for ConsoleBoard {
    fn set_solenoid(&mut self, on: bool) {
        self.solenoid.set_solenoid(on);
    }
}

impl DelayNs for ConsoleBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.activity.delay_mut().delay_ns(ns);
    }
}

// ── Loop model ────────────────────────────────────────────────

/// Loop PPO2 in bar: metabolic draw, solenoid injection.
struct Loop {
    ppo2: f64,
    ambient_ubar: u32,
}

impl Loop {
    const DRAW_PER_TICK: f64 = 0.000_8;
    const INJECT_PER_TICK: f64 = 0.006;

    fn step(&mut self, solenoid_on: bool) {
        self.ppo2 -= Self::DRAW_PER_TICK;
        if solenoid_on {
            self.ppo2 += Self::INJECT_PER_TICK;
        }
        self.ppo2 = self.ppo2.max(0.0);
    }
}

/// Sensor transport stand-in.  Analog cells have a fixed true sensitivity.
fn publish_cells(inputs: &CellInputs, lp: &Loop, now: Tick, cell3_alive: bool) {
    let centibar = lp.ppo2 * 100.0;
    inputs.publish(
        CellIndex::C1,
        RawSample {
            value: lp.ppo2 * 1_000_000.0,
            pressure_ubar: lp.ambient_ubar,
            report: SelfReport::Healthy,
            timestamp: now,
        },
    );
    for (cell, sensitivity, alive) in [(CellIndex::C2, 0.052, true), (CellIndex::C3, 0.047, cell3_alive)] {
        if alive {
            inputs.publish(
                cell,
                RawSample {
                    value: centibar / sensitivity,
                    pressure_ubar: 0,
                    report: SelfReport::Healthy,
                    timestamp: now,
                },
            );
        }
    }
}

// ── Main ──────────────────────────────────────────────────────

const HANDSET: u32 = 1;
const TICK_MS: u32 = 100;
const END_MS: u32 = 60_000;
const SHUTDOWN_MS: u32 = 50_000;

fn main() -> Result<()> {
    init_logger()?;
    info!("o2sim v{}", env!("CARGO_PKG_VERSION"));

    let clock = SimClock::default();
    let bus_line = SimPin::default();
    bus_line.0.set(true);

    let handset_ack = Rc::new(Cell::new(false));
    let delay = SimDelay {
        clock: clock.clone(),
        handset_ack: handset_ack.clone(),
    };
    let mut board = ConsoleBoard {
        activity: ActivityWaiter::new(&ACTIVITY, delay),
        solenoid: GpioSolenoid::new(SimPin::default()),
        bus_enable: GpioBusEnable::new(bus_line.clone()),
        supply_volts: 8.9,
        powered: true,
        tx_count: 0,
        handset_ack,
    };
    let mut store = NvsAdapter::new();
    let mut sink = LogEventSink::new();
    let inputs = CellInputs::new();

    let settings = load_settings()?;
    let mut controller = Controller::from_storage(&inputs, settings, &mut store)
        .map_err(|e| anyhow!("controller init: {e}"))?;
    controller.start(&mut board, &mut sink);
    controller.log_to_bus(&mut board, "o2sim up");

    let mut lp = Loop {
        ppo2: 0.70,
        ambient_ubar: 1_013_000,
    };

    while board.powered && clock.now() < END_MS {
        let now = clock.now();
        publish_cells(&inputs, &lp, now, now < 30_000);

        if now == SHUTDOWN_MS {
            bus_line.0.set(false);
        }
        for frame in script(now) {
            println!("  RX {frame:?}");
            ACTIVITY.notify();
            controller.handle_frame(&frame, now, &mut board, &mut store, &mut sink);
        }

        controller.poll(clock.now(), &mut board, &mut store, &mut sink);
        lp.step(board.solenoid.is_on());

        if now % 5000 == 0 {
            if let Some(c) = controller.consensus() {
                info!(
                    "t={:>5}ms loop={:.3}bar consensus={}cb mask=0b{:03b} duty={:.2}",
                    now,
                    lp.ppo2,
                    c.consensus_ppo2,
                    c.included_mask(),
                    controller.solenoid().latched_duty(),
                );
            }
        }

        // Bounded waits may already have moved the clock on; stay on the
        // tick grid so the script lines up.
        let next = (clock.now() / TICK_MS + 1) * TICK_MS;
        clock.advance(next - clock.now());
    }

    info!("sim ended at {} ms, {} frames sent", clock.now(), board.tx_count);
    for (kind, n) in controller.counters().nonzero() {
        info!("  {kind}: {n}");
    }
    Ok(())
}

/// Frames the handset sends at `now`.
fn script(now: Tick) -> Vec<BusFrame> {
    let from_handset = |class: u32, data: &[u8]| BusFrame::new(class | HANDSET, data);
    let menu = |req: u8| {
        BusFrame::new(
            ids::menu_id(ids::DeviceType::Controller, ids::DeviceType::Solo.id()),
            &[OP_REQ, 0, 0, 0, req, 0, 0, 0],
        )
    };
    match now {
        200 => vec![from_handset(ids::BUS_ID, &[])],
        1000 => vec![from_handset(ids::CAL_REQ, &[99, 0x03, 0xF5])],
        10_000 => vec![from_handset(ids::SETPOINT, &[130])],
        15_000 => vec![from_handset(ids::ATMOS, &[0, 0, 0x03, 0xF5])],
        20_000 => vec![menu(0x00), menu(0x10), menu(0x31), menu(0x50)],
        40_000 => vec![from_handset(ids::BUS_ID, &[])],
        SHUTDOWN_MS => vec![from_handset(ids::BUS_OFF, &[])],
        _ => Vec::new(),
    }
}
