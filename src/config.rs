//! Controller configuration.
//!
//! Two layers:
//!
//! * [`Configuration`]: the persisted, bus-editable record.  On the wire
//!   and in storage it is a packed `u32` (see the table below); in memory
//!   it is a typed struct so nothing downstream deals in bit offsets.
//! * [`ControllerSettings`]: build-time tunables (loop timing, PID
//!   defaults, device identity).  Not editable over the bus.
//!
//! ```text
//!  bits  0..=7   firmware version
//!  bits  8..=13  cell 1/2/3 kind, 2 bits each
//!  bits 14..=15  power mode
//!  bits 16..=18  calibration method
//!  bit  19       uart printing
//!  bits 20..=21  battery alarm threshold
//!  bits 22..=23  PPO2 control scheme
//!  bit  24       extended telemetry messages
//!  bit  25       depth-compensated solenoid duty
//! ```

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;
use crate::calibration::CalMethod;
use crate::cells::{CellIndex, CellKind, PerCell};
use crate::consensus::ConsensusParams;
use crate::control::ControlScheme;
use crate::control::pid::PidGains;
use crate::control::solenoid::SolenoidParams;
use crate::divecan::ids::DeviceType;
use crate::power::{BatteryThreshold, PowerMode};

/// Layout version of the packed record.  A stored record with another
/// version is out of date and replaced by the default.
pub const FIRMWARE_VERSION: u8 = 8;

const CELL_SHIFT: u32 = 8;
const POWER_SHIFT: u32 = 14;
const CAL_SHIFT: u32 = 16;
const UART_BIT: u32 = 19;
const BATTERY_SHIFT: u32 = 20;
const CONTROL_SHIFT: u32 = 22;
const EXTENDED_BIT: u32 = 24;
const DEPTH_COMP_BIT: u32 = 25;

/// Bytes of the packed record exposed through the bus menu.
pub const CONFIG_BYTES: usize = 4;

// ───────────────────────────────────────────────────────────────
// Persisted record
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub firmware_version: u8,
    pub cells: PerCell<CellKind>,
    pub power_mode: PowerMode,
    pub cal_method: CalMethod,
    /// Debug printing on the UART shared with cell 2.
    pub uart_printing: bool,
    pub battery_threshold: BatteryThreshold,
    pub control_scheme: ControlScheme,
    /// Send the precision and PID telemetry frames with each broadcast.
    pub extended_messages: bool,
    /// Scale solenoid duty by ambient pressure.
    pub depth_compensation: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            firmware_version: FIRMWARE_VERSION,
            cells: PerCell([CellKind::DiveO2, CellKind::Analog, CellKind::Analog]),
            power_mode: PowerMode::BatteryThenCan,
            cal_method: CalMethod::DigitalReference,
            uart_printing: false,
            battery_threshold: BatteryThreshold::NineVolt,
            control_scheme: ControlScheme::SolenoidPid,
            extended_messages: false,
            depth_compensation: false,
        }
    }
}

impl Configuration {
    /// Unpack a record.  Fails only on encodings with no meaning; use
    /// [`validate`](Self::validate) for the cross-field rules.
    pub fn from_bits(bits: u32) -> Result<Self, ConfigError> {
        let field = |shift: u32, width: u32| ((bits >> shift) & ((1 << width) - 1)) as u8;

        let mut cells = PerCell([CellKind::Analog; 3]);
        for cell in CellIndex::ALL {
            let shift = CELL_SHIFT + 2 * cell.index() as u32;
            cells[cell] = CellKind::from_bits(field(shift, 2)).ok_or(ConfigError::ValidationFailed("cell type"))?;
        }

        Ok(Self {
            firmware_version: field(0, 8),
            cells,
            power_mode: PowerMode::from_bits(field(POWER_SHIFT, 2)),
            cal_method: CalMethod::from_bits(field(CAL_SHIFT, 3))
                .ok_or(ConfigError::ValidationFailed("calibration method"))?,
            uart_printing: field(UART_BIT, 1) != 0,
            battery_threshold: BatteryThreshold::from_bits(field(BATTERY_SHIFT, 2)),
            control_scheme: ControlScheme::from_bits(field(CONTROL_SHIFT, 2))
                .ok_or(ConfigError::ValidationFailed("control scheme"))?,
            extended_messages: field(EXTENDED_BIT, 1) != 0,
            depth_compensation: field(DEPTH_COMP_BIT, 1) != 0,
        })
    }

    pub fn to_bits(&self) -> u32 {
        let mut bits = u32::from(self.firmware_version);
        for (cell, kind) in self.cells.iter() {
            bits |= (*kind as u32) << (CELL_SHIFT + 2 * cell.index() as u32);
        }
        bits |= (self.power_mode as u32) << POWER_SHIFT;
        bits |= (self.cal_method as u32) << CAL_SHIFT;
        bits |= u32::from(self.uart_printing) << UART_BIT;
        bits |= (self.battery_threshold as u32) << BATTERY_SHIFT;
        bits |= (self.control_scheme as u32) << CONTROL_SHIFT;
        bits |= u32::from(self.extended_messages) << EXTENDED_BIT;
        bits |= u32::from(self.depth_compensation) << DEPTH_COMP_BIT;
        bits
    }

    pub fn cell_kind(&self, cell: CellIndex) -> CellKind {
        self.cells[cell]
    }

    /// Whether the control scheme and power policy let the solenoid fire.
    pub fn solenoid_enabled(&self) -> bool {
        self.control_scheme == ControlScheme::SolenoidPid && self.power_mode.allows_solenoid()
    }

    /// Cross-field rules.  A record that fails here is never applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.firmware_version != FIRMWARE_VERSION {
            return Err(ConfigError::ValidationFailed("firmware version"));
        }
        if self.uart_printing && self.cells[CellIndex::C2] != CellKind::Analog {
            return Err(ConfigError::ValidationFailed("uart printing needs an analog cell 2"));
        }
        if self.cal_method == CalMethod::DigitalReference
            && !self.cells.iter().any(|(_, k)| *k == CellKind::DiveO2)
        {
            return Err(ConfigError::ValidationFailed("digital reference needs a DiveO2 cell"));
        }
        Ok(())
    }

    /// Byte `n` (0 = least significant) of the packed record.
    pub fn byte(&self, n: usize) -> u8 {
        if n >= CONFIG_BYTES {
            return 0;
        }
        self.to_bits().to_le_bytes()[n]
    }

    /// Copy with byte `n` replaced, decoded and validated.
    pub fn with_byte(&self, n: usize, value: u8) -> Result<Self, ConfigError> {
        if n >= CONFIG_BYTES {
            return Err(ConfigError::ValidationFailed("config byte index"));
        }
        let mut bytes = self.to_bits().to_le_bytes();
        bytes[n] = value;
        let updated = Self::from_bits(u32::from_le_bytes(bytes))?;
        updated.validate()?;
        Ok(updated)
    }
}

// ───────────────────────────────────────────────────────────────
// Tunables
// ───────────────────────────────────────────────────────────────

/// How this node introduces itself on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_type: DeviceType,
    pub manufacturer_id: u8,
    pub firmware_version: u8,
    /// Up to 8 bytes, zero padded on the wire.
    pub name: heapless::String<8>,
    /// Shown read-only in the bus menu.
    pub commit: heapless::String<10>,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Solo,
            manufacturer_id: 0x00,
            firmware_version: FIRMWARE_VERSION,
            name: bounded("DC_HEAD"),
            commit: bounded(option_env!("O2_COMMIT").unwrap_or("dev")),
        }
    }
}

/// Copy as much of `s` as fits.
pub(crate) fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Missing fields take their default, so a settings file only needs the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    // --- Cells ---
    pub consensus: ConsensusParams,
    /// Raw sample age (ms) after which a driver reports `Fail`.
    pub cell_timeout_ms: u32,

    // --- PID ---
    pub pid_gains: PidGains,
    pub integral_min: f64,
    pub integral_max: f64,
    pub pid_period_ms: u32,

    // --- Solenoid ---
    pub solenoid: SolenoidParams,

    // --- Bus ---
    pub broadcast_period_ms: u32,
    pub shutdown_polls: u8,
    pub shutdown_poll_ms: u32,
    /// Longest wait for the peer between menu fragments.
    pub menu_pace_timeout_ms: u32,

    // --- Calibration ---
    /// Delay between accepting a request and sampling the cells.
    pub cal_settle_ms: u32,
    /// Relative tolerance when verifying a persisted coefficient.
    pub cal_epsilon: f64,

    // --- Boot values ---
    /// Centibar.
    pub default_setpoint: u8,
    /// Millibar.
    pub default_atmos_mbar: u16,

    pub identity: DeviceIdentity,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            consensus: ConsensusParams::default(),
            cell_timeout_ms: 1000,

            pid_gains: PidGains::default(),
            integral_min: 0.0,
            integral_max: 1.0,
            pid_period_ms: 100,

            solenoid: SolenoidParams::default(),

            broadcast_period_ms: 100,
            shutdown_polls: 20,
            shutdown_poll_ms: 100,
            menu_pace_timeout_ms: 500,

            cal_settle_ms: 0,
            cal_epsilon: 1e-5,

            default_setpoint: 70,
            default_atmos_mbar: 1000,

            identity: DeviceIdentity::default(),
        }
    }
}

impl ControllerSettings {
    /// Range checks.  Invalid values are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pid_period_ms == 0 || self.broadcast_period_ms == 0 {
            return Err(ConfigError::ValidationFailed("loop periods must be non-zero"));
        }
        if self.solenoid.period_ms == 0 {
            return Err(ConfigError::ValidationFailed("solenoid period must be non-zero"));
        }
        let s = &self.solenoid;
        if !(0.0..=1.0).contains(&s.min_duty) || !(0.0..=1.0).contains(&s.max_duty) || s.min_duty > s.max_duty {
            return Err(ConfigError::ValidationFailed("solenoid duty bounds"));
        }
        if self.integral_min > self.integral_max {
            return Err(ConfigError::ValidationFailed("integral bounds"));
        }
        if self.shutdown_polls == 0 {
            return Err(ConfigError::ValidationFailed("shutdown_polls must be non-zero"));
        }
        if self.cal_epsilon.is_nan() || self.cal_epsilon <= 0.0 {
            return Err(ConfigError::ValidationFailed("cal_epsilon must be positive"));
        }
        Ok(())
    }
}
