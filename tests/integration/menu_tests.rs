//! Bus menu through the controller: browsing, pacing and config saves.

use o2control::Controller;
use o2control::adapters::nvs::NvsAdapter;
use o2control::app::events::ControllerEvent;
use o2control::app::ports::ConfigPort;
use o2control::cells::{CellIndex, CellInputs, CellKind};
use o2control::config::{Configuration, ControllerSettings};
use o2control::control::ControlScheme;
use o2control::divecan::frame::BusFrame;
use o2control::divecan::ids;
use o2control::divecan::menu::{OP_REQ, OP_RESP_BODY, OP_RESP_HEADER};
use o2control::error::NonFatalError;

use crate::mock_hw::{MockBoard, RecordingSink};

const HANDSET: u32 = 1;

fn request(req: u8) -> BusFrame {
    BusFrame::new(ids::MENU | HANDSET, &[OP_REQ, 0x00, 0x62, 0x91, req])
}

/// Header plus body writing `value` into config item `item`.
fn save(item: u8, value: u8) -> [BusFrame; 2] {
    [
        BusFrame::new(ids::MENU | HANDSET, &[OP_RESP_HEADER, 0x08, 0x00, 0x62, 0x91, 0x10 | item, 0, 0]),
        BusFrame::new(ids::MENU | HANDSET, &[OP_RESP_BODY, 0x00, value]),
    ]
}

#[test]
fn item_reply_is_paced_and_addressed_to_peer() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();

    ctl.handle_frame(&request(0x11), 0, &mut board, &mut store, &mut sink);

    let lens: Vec<u8> = board.sent.iter().map(|f| f.len).collect();
    assert_eq!(lens, [8, 8, 4]);
    assert!(board.sent.iter().all(|f| f.id == 0x0D0A_0104));
    assert_eq!(board.waits, [1]);
    assert_eq!(ctl.counters().total(), 0);
}

#[test]
fn silent_handset_is_counted_but_served() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    board.handset_acks = false;
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();

    ctl.handle_frame(&request(0x31), 0, &mut board, &mut store, &mut sink);

    assert_eq!(board.sent.len(), 3);
    assert_eq!(ctl.counters().count(NonFatalError::MenuPacing), 1);
}

#[test]
fn save_updates_and_persists_config() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();

    // Config 3 is byte 2; bits 6..=7 there are the control scheme.
    assert_eq!(ctl.config().byte(2), 0x40);
    for f in save(3, 0x00) {
        ctl.handle_frame(&f, 0, &mut board, &mut store, &mut sink);
    }

    assert_eq!(ctl.config().control_scheme, ControlScheme::Off);
    assert!(!ctl.config().solenoid_enabled());
    assert_eq!(store.load().map(|c| c.control_scheme), Ok(ControlScheme::Off));
    assert!(sink.events.contains(&ControllerEvent::ConfigChanged {
        config_bits: ctl.config().to_bits(),
    }));
    // Only the header is acknowledged.
    assert_eq!(board.sent.len(), 1);
    assert_eq!(board.sent[0].byte(0), 0x30);
}

#[test]
fn config_4_turns_on_extended_messages() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();

    // Byte 3: bit 0 extended messages, bit 1 depth compensation.
    for f in save(4, 0x03) {
        ctl.handle_frame(&f, 0, &mut board, &mut store, &mut sink);
    }

    assert!(ctl.config().extended_messages);
    assert!(ctl.config().depth_compensation);
    assert_eq!(store.load().map(|c| c.to_bits() >> 24), Ok(0b11));
}

#[test]
fn cell_kind_edit_rebuilds_drivers() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();
    assert_eq!(ctl.hub().kind(CellIndex::C3), CellKind::Analog);

    // Byte 1 default 0x54; cell 3 field (bits 4..=5) from analog to O2S.
    for f in save(2, 0x64) {
        ctl.handle_frame(&f, 0, &mut board, &mut store, &mut sink);
    }

    assert_eq!(ctl.hub().kind(CellIndex::C3), CellKind::O2s);
    assert_eq!(ctl.config().cell_kind(CellIndex::C3), CellKind::O2s);
}

#[test]
fn invalid_edit_is_rejected_and_not_stored() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();

    // Calibration method 3 does not exist.
    for f in save(3, 0x03) {
        ctl.handle_frame(&f, 0, &mut board, &mut store, &mut sink);
    }
    // Cell 1 becoming analog leaves no DiveO2 for the digital reference.
    for f in save(2, 0x55) {
        ctl.handle_frame(&f, 0, &mut board, &mut store, &mut sink);
    }

    assert_eq!(ctl.counters().count(NonFatalError::ConfigRejected), 2);
    assert_eq!(*ctl.config(), Configuration::default());
    assert_eq!(store.load(), Ok(Configuration::default()));
    assert_eq!(sink.count(|e| matches!(e, ControllerEvent::ConfigChanged { .. })), 0);
}

#[test]
fn firmware_commit_item_cannot_be_saved() {
    let inputs = CellInputs::new();
    let mut board = MockBoard::new();
    let mut store = NvsAdapter::new();
    let mut sink = RecordingSink::new();
    let mut ctl = Controller::from_storage(&inputs, ControllerSettings::default(), &mut store).unwrap();

    for f in save(0, 0x42) {
        ctl.handle_frame(&f, 0, &mut board, &mut store, &mut sink);
    }

    assert_eq!(ctl.counters().count(NonFatalError::Menu), 1);
    assert_eq!(*ctl.config(), Configuration::default());
}
