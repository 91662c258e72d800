//! Controller end to end: bus frames in, bus frames and valve edges out.

use o2control::Controller;
use o2control::adapters::nvs::NvsAdapter;
use o2control::app::events::ControllerEvent;
use o2control::app::ports::ConfigPort;
use o2control::cells::{CellIndex, CellInputs, PPO2_FAIL};
use o2control::config::{Configuration, ControllerSettings};
use o2control::control::ControlScheme;
use o2control::divecan::frame::BusFrame;
use o2control::divecan::ids::{self, DeviceType};
use o2control::divecan::tx;
use o2control::error::{FatalError, NonFatalError};
use o2control::power::PowerMode;

use crate::mock_hw::{MockBoard, RecordingSink, publish_default_cells};

const HANDSET: u32 = 1;

struct Rig {
    board: MockBoard,
    store: NvsAdapter,
    sink: RecordingSink,
}

impl Rig {
    fn new() -> Self {
        Self {
            board: MockBoard::new(),
            store: NvsAdapter::new(),
            sink: RecordingSink::new(),
        }
    }

    fn controller<'a>(&mut self, inputs: &'a CellInputs) -> Controller<'a> {
        Controller::from_storage(inputs, ControllerSettings::default(), &mut self.store).unwrap()
    }
}

fn frame(class: u32, data: &[u8]) -> BusFrame {
    BusFrame::new(class | HANDSET, data)
}

// ── Identity ──────────────────────────────────────────────────

#[test]
fn ping_with_low_battery_reports_low_battery() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);
    // 9 V alarm threshold is 7.7 V.
    rig.board.supply_volts = 7.0;

    ctl.handle_frame(&frame(ids::BUS_ID, &[]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    let classes: Vec<u32> = rig.board.sent.iter().map(BusFrame::class).collect();
    assert_eq!(classes, [ids::BUS_ID, ids::BUS_STATUS, ids::BUS_NAME, ids::LEGACY_BATTERY]);

    let status = rig.board.sent[1];
    assert_eq!(status.id, ids::BUS_STATUS | u32::from(DeviceType::Solo.id()));
    assert_eq!(status.byte(0), 70);
    assert_eq!(status.byte(5), 70, "default setpoint");
    assert_eq!(status.byte(7), tx::ERR_LOW_BATTERY);
    assert_eq!(rig.board.sent[3].payload(), &[0]);
}

#[test]
fn ping_with_good_battery_shows_battery() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&frame(ids::BUS_ID, &[]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(rig.board.sent[0].payload(), &[0x00, 0x00, 8]);
    assert_eq!(rig.board.sent[1].byte(7), tx::ERR_NONE_SHOW_BATT);
    assert_eq!(rig.board.sent[2].payload(), b"DC_HEAD\0");
    assert_eq!(rig.board.sent[3].payload(), &[1]);
}

#[test]
fn unrecognised_pinger_gets_no_reply() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&BusFrame::new(ids::BUS_ID | 5, &[]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert!(rig.board.sent.is_empty());
    assert_eq!(ctl.counters().total(), 0);
}

#[test]
fn bus_init_is_answered_like_a_ping() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&frame(ids::BUS_INIT, &[0x8a, 0xf3, 0x00]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(rig.board.sent.len(), 4);
    assert_eq!(rig.board.sent[0].class(), ids::BUS_ID);
}

#[test]
fn start_announces_to_controller() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.start(&mut rig.board, &mut rig.sink);

    assert_eq!(rig.board.sent[0].id, 0x0D37_0401);
    assert!(matches!(
        rig.sink.events[0],
        ControllerEvent::Started {
            device: DeviceType::Solo,
            ..
        }
    ));
}

// ── Process values ────────────────────────────────────────────

#[test]
fn setpoint_atmos_and_gains_are_applied() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&frame(ids::SETPOINT, &[130]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
    ctl.handle_frame(&frame(ids::ATMOS, &[0, 0, 0x04, 0x00]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
    ctl.handle_frame(&frame(ids::PID_P_GAIN, &2.5f64.to_le_bytes()), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(ctl.setpoint(), 130);
    assert_eq!(ctl.atmos_mbar(), 1024);
    assert_eq!(ctl.pid().gains.kp, 2.5);
    assert!(rig.sink.events.contains(&ControllerEvent::SetpointChanged(130)));
    assert!(rig.board.sent.is_empty(), "no replies to process values");
}

#[test]
fn unknown_message_is_counted_and_ignored() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&BusFrame::new(0x0D20_0001, &[1, 2]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(ctl.counters().count(NonFatalError::UnknownMessage), 1);
    assert!(rig.board.sent.is_empty());
}

// ── Broadcast ─────────────────────────────────────────────────

#[test]
fn uncalibrated_cells_blank_every_broadcast_ppo2() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);
    publish_default_cells(&inputs, 1.0, 1600.0, 3200.0, 0);

    ctl.poll(0, &mut rig.board, &mut rig.store, &mut rig.sink);

    let ppo2 = rig.board.last_with_class(ids::PPO2).unwrap();
    assert_eq!(ppo2.payload(), &[0, PPO2_FAIL, PPO2_FAIL, PPO2_FAIL]);
    // The vote itself still uses the healthy reference.
    let state = rig.board.last_with_class(ids::CELL_STATE).unwrap();
    assert_eq!(state.payload(), &[0b001, 100]);
}

#[test]
fn broadcast_runs_once_per_period() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    for now in (0..1000).step_by(10) {
        ctl.poll(now, &mut rig.board, &mut rig.store, &mut rig.sink);
    }

    assert_eq!(rig.board.sent_with_class(ids::PPO2).len(), 10);
    assert!(rig.board.sent_with_class(ids::SOLENOID_DUTY).is_empty(), "telemetry is opt-in");
}

#[test]
fn extended_messages_add_telemetry_frames() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let config = Configuration {
        extended_messages: true,
        ..Configuration::default()
    };
    rig.store.save(&config).unwrap();
    let mut ctl = rig.controller(&inputs);

    ctl.poll(0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(rig.board.sent.len(), 13);
    for class in [ids::PRECISION_CONSENSUS, ids::PID_INTEGRAL, ids::SOLENOID_DUTY, ids::PID_D_GAIN] {
        assert_eq!(rig.board.sent_with_class(class).len(), 1);
    }
}

#[test]
fn stale_cell_is_blanked_and_dropped_from_vote() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    rig.store.write_coefficient_pair();
    let mut ctl = rig.controller(&inputs);
    publish_default_cells(&inputs, 1.0, 1600.0, 3200.0, 0);
    ctl.poll(0, &mut rig.board, &mut rig.store, &mut rig.sink);
    assert_eq!(rig.board.last_with_class(ids::PPO2).unwrap().payload(), &[0, 100, 100, 100]);

    // C1 and C2 keep reporting, C3 goes quiet.
    let last_c3 = inputs.snapshot(CellIndex::C3).unwrap();
    publish_default_cells(&inputs, 1.0, 1600.0, 3200.0, 2000);
    inputs.publish(CellIndex::C3, last_c3);
    ctl.poll(2000, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(rig.board.last_with_class(ids::PPO2).unwrap().payload(), &[0, 100, 100, PPO2_FAIL]);
    assert_eq!(rig.board.last_with_class(ids::CELL_STATE).unwrap().payload(), &[0b011, 100]);
}

// ── Solenoid ──────────────────────────────────────────────────

#[test]
fn low_ppo2_fires_solenoid_within_period() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);
    publish_default_cells(&inputs, 0.7, 0.0, 0.0, 0);

    ctl.handle_frame(&frame(ids::SETPOINT, &[130]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
    ctl.poll(0, &mut rig.board, &mut rig.store, &mut rig.sink);
    assert!(rig.board.solenoid_on());
    assert_eq!(ctl.solenoid().latched_duty(), 0.5);

    // On for half the 5 s period.
    publish_default_cells(&inputs, 0.7, 0.0, 0.0, 2400);
    ctl.poll(2400, &mut rig.board, &mut rig.store, &mut rig.sink);
    assert!(rig.board.solenoid_on());
    publish_default_cells(&inputs, 0.7, 0.0, 0.0, 2600);
    ctl.poll(2600, &mut rig.board, &mut rig.store, &mut rig.sink);
    assert!(!rig.board.solenoid_on());
    assert_eq!(rig.board.solenoid_edges, [true, false]);
}

#[test]
fn power_mode_off_never_fires_solenoid() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let config = Configuration {
        power_mode: PowerMode::Off,
        ..Configuration::default()
    };
    rig.store.save(&config).unwrap();
    let mut ctl = rig.controller(&inputs);
    publish_default_cells(&inputs, 0.2, 0.0, 0.0, 0);

    ctl.handle_frame(&frame(ids::SETPOINT, &[130]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
    for now in (0..6000).step_by(100) {
        publish_default_cells(&inputs, 0.2, 0.0, 0.0, now);
        ctl.poll(now, &mut rig.board, &mut rig.store, &mut rig.sink);
    }

    assert!(rig.board.solenoid_edges.is_empty());
    assert!(ctl.duty() > 0.5, "PID still runs");
}

#[test]
fn control_scheme_off_never_fires_solenoid() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let config = Configuration {
        control_scheme: ControlScheme::Off,
        ..Configuration::default()
    };
    rig.store.save(&config).unwrap();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&frame(ids::SETPOINT, &[130]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
    for now in (0..6000).step_by(100) {
        publish_default_cells(&inputs, 0.2, 0.0, 0.0, now);
        ctl.poll(now, &mut rig.board, &mut rig.store, &mut rig.sink);
    }

    assert!(rig.board.solenoid_edges.is_empty());
}

#[test]
fn depth_compensation_scales_duty_by_ambient_pressure() {
    let run = |depth_compensation: bool| {
        let inputs = CellInputs::new();
        let mut rig = Rig::new();
        let config = Configuration {
            depth_compensation,
            ..Configuration::default()
        };
        rig.store.save(&config).unwrap();
        let mut ctl = rig.controller(&inputs);
        publish_default_cells(&inputs, 1.0, 0.0, 0.0, 0);

        ctl.handle_frame(&frame(ids::SETPOINT, &[130]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
        // 3000 mbar, about 20 m.
        ctl.handle_frame(&frame(ids::ATMOS, &[0, 0, 0x0B, 0xB8]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
        ctl.poll(0, &mut rig.board, &mut rig.store, &mut rig.sink);
        (ctl.duty(), ctl.solenoid().latched_duty())
    };

    let (pid_duty, plain) = run(false);
    assert!((plain - pid_duty).abs() < 1e-12);
    let (pid_duty, compensated) = run(true);
    assert!((compensated - pid_duty / 3.0).abs() < 1e-12);
    assert!(compensated > 0.0);
}

// ── Shutdown ──────────────────────────────────────────────────

#[test]
fn shutdown_waits_for_bus_to_drop() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);
    rig.board.bus_drops_after = Some(3);

    ctl.handle_frame(&frame(ids::BUS_OFF, &[]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(rig.board.shutdowns, 1);
    assert_eq!(rig.board.enable_polls, 4);
    assert_eq!(rig.board.delayed_ms, 300);
    assert!(rig.sink.events.contains(&ControllerEvent::ShutdownRequested));
}

#[test]
fn shutdown_abandoned_while_bus_stays_enabled() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);

    ctl.handle_frame(&frame(ids::BUS_OFF, &[]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(rig.board.shutdowns, 0);
    assert_eq!(rig.board.enable_polls, 20);
    assert_eq!(rig.board.delayed_ms, 2000);
    assert_eq!(ctl.counters().count(NonFatalError::ShutdownAbandoned), 1);
}

// ── Storage / diagnostics ─────────────────────────────────────

#[test]
fn first_boot_persists_default_config() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let ctl = rig.controller(&inputs);

    assert_eq!(rig.store.load(), Ok(Configuration::default()));
    assert_eq!(*ctl.config(), Configuration::default());
}

#[test]
fn tx_failure_is_counted() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);
    rig.board.fail_tx = true;

    ctl.handle_frame(&frame(ids::BUS_ID, &[]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(ctl.counters().count(NonFatalError::CanTx), 4);
}

#[test]
fn fatal_is_recorded_and_stops_the_valve() {
    let inputs = CellInputs::new();
    let mut rig = Rig::new();
    let mut ctl = rig.controller(&inputs);
    publish_default_cells(&inputs, 0.5, 0.0, 0.0, 0);
    ctl.handle_frame(&frame(ids::SETPOINT, &[130]), 0, &mut rig.board, &mut rig.store, &mut rig.sink);
    ctl.poll(0, &mut rig.board, &mut rig.store, &mut rig.sink);
    assert!(rig.board.solenoid_on());

    let err = ctl.record_fatal(FatalError::StorageCorrupted, 1234, &mut rig.board, &mut rig.store, &mut rig.sink);

    assert_eq!(err, o2control::Error::Fatal(FatalError::StorageCorrupted));
    assert!(ctl.reset_required());
    assert!(!rig.board.solenoid_on());
    let entries = ctl.crash_log().read_all(&rig.store);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].uptime_ms, 1234);

    // No further injection until reset.
    ctl.poll(100, &mut rig.board, &mut rig.store, &mut rig.sink);
    assert!(!rig.board.solenoid_on());
}

trait SeedCoefficients {
    fn write_coefficient_pair(&mut self);
}

impl SeedCoefficients for NvsAdapter {
    /// Coefficients that make 1600 and 3200 counts read 1.00 bar.
    fn write_coefficient_pair(&mut self) {
        use o2control::app::ports::CoefficientStore;
        self.write_coefficient(0x02, 0.0625).unwrap();
        self.write_coefficient(0x03, 0.031_25).unwrap();
    }
}
