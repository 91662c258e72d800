//! Mock board, store and sink for integration tests.
//!
//! Records every frame, solenoid edge, delay and power call so tests can
//! assert on the full history without touching a transceiver.

use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use o2control::adapters::nvs::NvsAdapter;
use o2control::app::events::ControllerEvent;
use o2control::app::ports::{
    BusActivity, BusEnable, BusError, BusPort, CoefficientStore, ConfigError, ConfigPort, EventSink, PowerPort,
    SolenoidPort, StorageError, StoragePort, SupplyVoltage,
};
use o2control::cells::{CellIndex, CellInputs, RawSample, SelfReport, Tick};
use o2control::config::Configuration;
use o2control::divecan::frame::BusFrame;

// ── MockBoard ─────────────────────────────────────────────────

pub struct MockBoard {
    pub sent: Vec<BusFrame>,
    pub supply_volts: f32,
    /// Bus-enable reads return `true` this many times, then `false`.
    /// `None` keeps the bus enabled forever.
    pub bus_drops_after: Option<usize>,
    pub enable_polls: usize,
    pub delayed_ms: u64,
    pub shutdowns: usize,
    pub solenoid_edges: Vec<bool>,
    pub handset_acks: bool,
    /// `sent.len()` at each pacing wait.
    pub waits: Vec<usize>,
    pub fail_tx: bool,
}

#[allow(dead_code)]
impl MockBoard {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            supply_volts: 9.0,
            bus_drops_after: None,
            enable_polls: 0,
            delayed_ms: 0,
            shutdowns: 0,
            solenoid_edges: Vec::new(),
            handset_acks: true,
            waits: Vec::new(),
            fail_tx: false,
        }
    }

    pub fn sent_with_class(&self, class: u32) -> Vec<BusFrame> {
        self.sent.iter().filter(|f| f.class() == class).copied().collect()
    }

    pub fn last_with_class(&self, class: u32) -> Option<BusFrame> {
        self.sent.iter().rev().find(|f| f.class() == class).copied()
    }

    pub fn solenoid_on(&self) -> bool {
        self.solenoid_edges.last().copied().unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.waits.clear();
    }
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPort for MockBoard {
    fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
        if self.fail_tx {
            return Err(BusError::QueueFull);
        }
        self.sent.push(*frame);
        Ok(())
    }
}

impl BusActivity for MockBoard {
    fn wait_for_activity(&mut self, _timeout: Duration) -> bool {
        self.waits.push(self.sent.len());
        self.handset_acks
    }
}

impl BusEnable for MockBoard {
    fn bus_enabled(&mut self) -> bool {
        self.enable_polls += 1;
        self.bus_drops_after.is_none_or(|n| self.enable_polls <= n)
    }
}

impl SupplyVoltage for MockBoard {
    fn supply_voltage(&mut self) -> f32 {
        self.supply_volts
    }
}

impl PowerPort for MockBoard {
    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

impl SolenoidPort for MockBoard {
    fn set_solenoid(&mut self, on: bool) {
        self.solenoid_edges.push(on);
    }
}

impl DelayNs for MockBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.delayed_ms += u64::from(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delayed_ms += u64::from(ms);
    }
}

// ── LyingStore ────────────────────────────────────────────────

/// Wraps the in-memory store.  While `lie` is set, coefficient writes
/// report success without applying.
#[derive(Default)]
pub struct LyingStore {
    pub inner: NvsAdapter,
    pub lie: bool,
}

impl CoefficientStore for LyingStore {
    fn write_coefficient(&mut self, key: u8, value: f64) -> Result<(), StorageError> {
        if self.lie {
            return Ok(());
        }
        self.inner.write_coefficient(key, value)
    }

    fn read_coefficient(&self, key: u8) -> Result<f64, StorageError> {
        self.inner.read_coefficient(key)
    }
}

impl ConfigPort for LyingStore {
    fn load(&self) -> Result<Configuration, ConfigError> {
        self.inner.load()
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        self.inner.save(config)
    }
}

impl StoragePort for LyingStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.inner.read(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.inner.write(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.inner.delete(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.inner.exists(namespace, key)
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ControllerEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&ControllerEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ControllerEvent) {
        self.events.push(event.clone());
    }
}

// ── Cells ─────────────────────────────────────────────────────

/// Default layout: DiveO2 on C1, analog on C2 and C3.
#[allow(dead_code)]
pub fn publish_default_cells(inputs: &CellInputs, dive_o2_bar: f64, c2_counts: f64, c3_counts: f64, now: Tick) {
    inputs.publish(
        CellIndex::C1,
        RawSample {
            value: dive_o2_bar * 1_000_000.0,
            pressure_ubar: 1_013_000,
            report: SelfReport::Healthy,
            timestamp: now,
        },
    );
    for (cell, counts) in [(CellIndex::C2, c2_counts), (CellIndex::C3, c3_counts)] {
        inputs.publish(
            cell,
            RawSample {
                value: counts,
                pressure_ubar: 0,
                report: SelfReport::Healthy,
                timestamp: now,
            },
        );
    }
}
