//! Driver Capabilities
//!
//! This module defines the traits the control core uses to reach the vendor
//! device driver. The traits mirror the T-Cube driver objects one-to-one:
//!
//! - [`KinesisBackend`]: process-wide enumeration and device construction
//! - [`KinesisDevice`]: connect / settings wait / polling / enable lifecycle
//!   shared by every T-Cube device
//! - [`PiezoDriver`]: the piezo controller (voltage, percentage travel, jog,
//!   voltage source, hub input, position control mode)
//! - [`StrainGaugeDriver`]: the strain gauge reader (reading, zeroing,
//!   display mode, LEDs)
//!
//! The hardware binding implements these against the vendor library; the
//! simulated backend in `piezo-driver-mock` implements them in memory.
//!
//! # Design Philosophy
//!
//! Each trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; implementations use interior mutability
//! - Returns [`DriverResult`] so every call is fallible and typed
//!
//! # Example
//!
//! ```rust,ignore
//! async fn voltage_or_percent(device: &dyn PiezoDriver) -> DriverResult<f64> {
//!     if device.is_closed_loop().await? {
//!         device.percentage_travel().await
//!     } else {
//!         device.output_voltage().await
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverResult;
use crate::units::{ControlMode, HubAnalogueInput, JogDirection, VoltageSource};

// =============================================================================
// Settings Objects
// =============================================================================

/// Identity reported by a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial number as reported by the firmware.
    pub serial_number: String,
    /// Model name, e.g. `TPZ001`.
    pub name: String,
}

/// Mutable piezo settings object.
///
/// Fetched once after configuration, edited locally and written back with
/// [`PiezoDriver::apply_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PiezoSettings {
    /// Output voltage range ceiling in volts.
    pub max_output_voltage: f64,
    /// Jog step in open loop, volts.
    pub voltage_step: f64,
    /// Jog step in closed loop, percent of travel.
    pub percentage_step: f64,
    /// Hub analogue input the controller reads.
    pub hub_mode: HubAnalogueInput,
}

/// Input/output settings as currently reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IoSettings {
    /// Active hub analogue input.
    pub hub_analogue_input: HubAnalogueInput,
    /// Active output voltage ceiling in volts.
    pub voltage_limit: f64,
}

// =============================================================================
// KinesisBackend - Enumeration
// =============================================================================

/// Process-wide driver entry point.
///
/// `build_device_list` must run once before any device is created.
#[async_trait]
pub trait KinesisBackend: Send + Sync {
    /// Rebuild the driver's list of attached devices.
    async fn build_device_list(&self) -> DriverResult<()>;

    /// Serials found by the last `build_device_list`.
    async fn device_list(&self) -> DriverResult<Vec<String>>;

    /// Construct a piezo controller object for `serial`.
    ///
    /// Returns `None` when the driver hands back a null device.
    fn create_piezo(&self, serial: &str) -> Option<Box<dyn PiezoDriver>>;

    /// Construct a strain gauge reader object for `serial`.
    ///
    /// Returns `None` when the driver hands back a null device.
    fn create_strain_gauge(&self, serial: &str) -> Option<Box<dyn StrainGaugeDriver>>;
}

// =============================================================================
// KinesisDevice - Lifecycle
// =============================================================================

/// Lifecycle primitives shared by every T-Cube device.
#[async_trait]
pub trait KinesisDevice: Send + Sync {
    /// Open the USB connection to `serial`.
    async fn connect(&self, serial: &str) -> DriverResult<()>;

    /// Whether the device has finished loading its settings.
    async fn is_settings_initialized(&self) -> DriverResult<bool>;

    /// Block until settings are initialized or `timeout` elapses.
    ///
    /// Returns a [`crate::error::DriverErrorKind::Timeout`] error on expiry.
    async fn wait_for_settings_initialized(&self, timeout: Duration) -> DriverResult<()>;

    /// Start the driver's background status polling.
    async fn start_polling(&self, interval: Duration) -> DriverResult<()>;

    /// Enable the output channel.
    async fn enable_device(&self) -> DriverResult<()>;

    /// Read the device identity.
    async fn device_info(&self) -> DriverResult<DeviceInfo>;
}

// =============================================================================
// PiezoDriver - Piezo Controller
// =============================================================================

/// T-Cube piezo controller.
#[async_trait]
pub trait PiezoDriver: KinesisDevice {
    /// Load the device configuration for `serial`.
    async fn load_piezo_configuration(&self, serial: &str) -> DriverResult<()>;

    /// Fetch the mutable settings object.
    async fn settings(&self) -> DriverResult<PiezoSettings>;

    /// Write settings; `persist` stores them as device startup defaults.
    async fn apply_settings(&self, settings: &PiezoSettings, persist: bool) -> DriverResult<()>;

    /// Current output voltage in volts.
    async fn output_voltage(&self) -> DriverResult<f64>;

    /// Command the output voltage in volts (open loop).
    async fn set_output_voltage(&self, volts: f64) -> DriverResult<()>;

    /// Current position in percent of travel.
    async fn percentage_travel(&self) -> DriverResult<f64>;

    /// Command the position in percent of travel (closed loop).
    async fn set_percentage_travel(&self, percent: f64) -> DriverResult<()>;

    /// Jog one step in `direction`.
    async fn jog(&self, direction: JogDirection) -> DriverResult<()>;

    /// Current voltage source.
    async fn voltage_source(&self) -> DriverResult<VoltageSource>;

    /// Select the voltage source.
    async fn set_voltage_source(&self, source: VoltageSource) -> DriverResult<()>;

    /// Input/output settings as reported by the device.
    async fn io_settings(&self) -> DriverResult<IoSettings>;

    /// Configured position control mode.
    async fn position_control_mode(&self) -> DriverResult<ControlMode>;

    /// Select the position control mode.
    async fn set_position_control_mode(&self, mode: ControlMode) -> DriverResult<()>;

    /// Live closed-loop status flag.
    async fn is_closed_loop(&self) -> DriverResult<bool>;
}

// =============================================================================
// StrainGaugeDriver - Position Reader
// =============================================================================

/// T-Cube strain gauge reader.
#[async_trait]
pub trait StrainGaugeDriver: KinesisDevice {
    /// Load the device configuration for `serial`.
    async fn load_strain_gauge_configuration(&self, serial: &str) -> DriverResult<()>;

    /// Set the front panel LED brightness.
    async fn set_leds(&self, brightness: u8) -> DriverResult<()>;

    /// Live reading in the current display units.
    async fn reading(&self) -> DriverResult<f64>;

    /// Start zeroing the reading. Returns before zeroing completes.
    async fn set_zero(&self) -> DriverResult<()>;

    /// Whether zeroing is in progress.
    async fn is_zeroing(&self) -> DriverResult<bool>;

    /// Raw display mode code (1 position, 2 voltage, 3 force).
    async fn display_mode(&self) -> DriverResult<i32>;
}
