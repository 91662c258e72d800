//! Calibration over the bus: request, ack, run, result frame, persistence.

use o2control::Controller;
use o2control::app::events::ControllerEvent;
use o2control::app::ports::{CoefficientStore, ConfigPort};
use o2control::calibration::{CalMethod, CalState};
use o2control::cells::{CellIndex, CellInputs, PPO2_FAIL, coefficient_key};
use o2control::config::{Configuration, ControllerSettings};
use o2control::divecan::frame::BusFrame;
use o2control::divecan::ids;
use o2control::error::{CalError, NonFatalError};

use crate::mock_hw::{LyingStore, MockBoard, RecordingSink, publish_default_cells};

/// 99 % at 1013 mbar.
fn cal_request() -> BusFrame {
    BusFrame::new(ids::CAL_REQ | 1, &[99, 0x03, 0xF5])
}

fn settings(settle_ms: u32) -> ControllerSettings {
    ControllerSettings {
        cal_settle_ms: settle_ms,
        ..ControllerSettings::default()
    }
}

/// DiveO2 at 1.00 bar; analog cells at 1600 and 3200 counts.
fn publish(inputs: &CellInputs, now: u32) {
    publish_default_cells(inputs, 1.0, 1600.0, 3200.0, now);
}

#[test]
fn successful_run_acks_reports_and_persists() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, settings(0), &mut store).unwrap();
    publish(&inputs, 0);

    ctl.handle_frame(&cal_request(), 0, &mut board, &mut store, &mut sink);
    assert_eq!(board.sent.len(), 1);
    assert_eq!(board.sent[0].payload(), &[0x05, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0x00]);
    assert_eq!(ctl.calibration_state(), CalState::Running);

    ctl.poll(0, &mut board, &mut store, &mut sink);

    let results: Vec<BusFrame> = board
        .sent_with_class(ids::CAL)
        .into_iter()
        .filter(|f| f.byte(0) != 0x05)
        .collect();
    assert_eq!(results.len(), 1);
    // 1600 counts is 12.5 mV, 3200 is 25 mV.
    assert_eq!(results[0].payload(), &[0x01, 0, 12, 25, 99, 0x03, 0xF5, 0x07]);
    assert_eq!(ctl.calibration_state(), CalState::Idle);

    assert_eq!(store.read_coefficient(coefficient_key(CellIndex::C2)), Ok(0.0625));
    assert_eq!(store.read_coefficient(coefficient_key(CellIndex::C3)), Ok(0.031_25));
    assert_eq!(store.read_coefficient(coefficient_key(CellIndex::C1)).ok(), None);

    let finished = sink
        .events
        .iter()
        .find_map(|e| match e {
            ControllerEvent::CalibrationFinished(outcome) => Some(*outcome),
            _ => None,
        })
        .unwrap();
    assert!(finished.succeeded());
    assert_eq!(finished.calibrated.0, [false, true, true]);

    // Next broadcast shows every cell.
    publish(&inputs, 100);
    ctl.poll(100, &mut board, &mut store, &mut sink);
    assert_eq!(board.last_with_class(ids::PPO2).unwrap().payload(), &[0, 100, 100, 100]);
    assert_eq!(board.last_with_class(ids::CELL_STATE).unwrap().payload(), &[0b111, 100]);
}

#[test]
fn coefficients_survive_a_restart() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    {
        let mut ctl = Controller::from_storage(&inputs, settings(0), &mut store).unwrap();
        publish(&inputs, 0);
        ctl.handle_frame(&cal_request(), 0, &mut board, &mut store, &mut sink);
        ctl.poll(0, &mut board, &mut store, &mut sink);
    }

    board.clear();
    let mut ctl = Controller::from_storage(&inputs, settings(0), &mut store).unwrap();
    publish(&inputs, 0);
    ctl.poll(0, &mut board, &mut store, &mut sink);
    assert_eq!(board.last_with_class(ids::PPO2).unwrap().payload(), &[0, 100, 100, 100]);
}

#[test]
fn duplicate_request_is_acked_but_runs_once() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, settings(4000), &mut store).unwrap();
    publish(&inputs, 0);

    ctl.handle_frame(&cal_request(), 0, &mut board, &mut store, &mut sink);
    ctl.handle_frame(&cal_request(), 500, &mut board, &mut store, &mut sink);
    for now in (0..=4000).step_by(100) {
        publish(&inputs, now);
        ctl.poll(now, &mut board, &mut store, &mut sink);
    }

    let cal = board.sent_with_class(ids::CAL);
    assert_eq!(cal.iter().filter(|f| f.byte(0) == 0x05).count(), 2);
    assert_eq!(cal.iter().filter(|f| f.byte(0) == 0x01).count(), 1);
    assert_eq!(sink.count(|e| matches!(e, ControllerEvent::CalibrationFinished(_))), 1);
}

#[test]
fn run_waits_for_settle_time() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, settings(4000), &mut store).unwrap();

    publish(&inputs, 1000);
    ctl.handle_frame(&cal_request(), 1000, &mut board, &mut store, &mut sink);

    publish(&inputs, 1100);
    ctl.poll(1100, &mut board, &mut store, &mut sink);
    // While running, the uncalibrated analog cells no longer blank the reference.
    assert_eq!(board.last_with_class(ids::PPO2).unwrap().payload(), &[0, 100, PPO2_FAIL, PPO2_FAIL]);

    publish(&inputs, 4900);
    ctl.poll(4900, &mut board, &mut store, &mut sink);
    assert_eq!(ctl.calibration_state(), CalState::Running);

    publish(&inputs, 5000);
    ctl.poll(5000, &mut board, &mut store, &mut sink);
    assert_eq!(ctl.calibration_state(), CalState::Idle);
    assert_eq!(board.sent_with_class(ids::CAL).len(), 2);
}

#[test]
fn store_that_drops_writes_fails_the_run() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, settings(0), &mut store).unwrap();
    store.lie = true;
    publish(&inputs, 0);

    ctl.handle_frame(&cal_request(), 0, &mut board, &mut store, &mut sink);
    ctl.poll(0, &mut board, &mut store, &mut sink);

    let result = board.last_with_class(ids::CAL).unwrap();
    assert_eq!(result.byte(0), 0x09);
    assert_eq!(ctl.counters().count(NonFatalError::CalMismatch), 2);
    let outcome = ctl.calibration().last_outcome().unwrap();
    assert_eq!(outcome.error, Some(CalError::Mismatch(CellIndex::C2)));

    // Both analog cells are latched failed.
    publish(&inputs, 100);
    ctl.poll(100, &mut board, &mut store, &mut sink);
    assert_eq!(board.last_with_class(ids::PPO2).unwrap().payload(), &[0, 100, PPO2_FAIL, PPO2_FAIL]);
    assert_eq!(board.last_with_class(ids::CELL_STATE).unwrap().payload(), &[0b001, 100]);
}

#[test]
fn low_battery_refuses_to_calibrate() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, settings(0), &mut store).unwrap();
    board.supply_volts = 7.0;
    publish(&inputs, 0);

    ctl.handle_frame(&cal_request(), 0, &mut board, &mut store, &mut sink);
    ctl.poll(0, &mut board, &mut store, &mut sink);

    assert_eq!(board.last_with_class(ids::CAL).unwrap().byte(0), 0x10);
    assert!(store.read_coefficient(coefficient_key(CellIndex::C2)).is_err());
}

#[test]
fn absolute_method_is_rejected() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = LyingStore::default();
    let mut sink = RecordingSink::new();
    let config = Configuration {
        cal_method: CalMethod::AnalogAbsolute,
        ..Configuration::default()
    };
    store.save(&config).unwrap();
    let mut ctl = Controller::from_storage(&inputs, settings(0), &mut store).unwrap();
    publish(&inputs, 0);

    ctl.handle_frame(&cal_request(), 0, &mut board, &mut store, &mut sink);
    ctl.poll(0, &mut board, &mut store, &mut sink);

    assert_eq!(board.last_with_class(ids::CAL).unwrap().byte(0), 0x08);
    assert_eq!(ctl.counters().count(NonFatalError::UndefinedCalMethod), 1);
}
