//! Error types for the piezo stage control core.
//!
//! Two layers of errors exist:
//!
//! - [`DriverError`] describes a single failed call into the vendor driver
//!   binding (connect, set voltage, read strain, ...). Every capability trait
//!   method in [`crate::capabilities`] returns [`DriverResult`].
//! - [`PiezoError`] is the error of the control core itself. It covers the
//!   lifecycle failures (discovery, connection, null handles), calibration
//!   results, and the "not connected" state a component falls into after a
//!   failed initialization.
//!
//! `DriverError` converts into `PiezoError::Driver` with `?`, so operations
//! that have no more specific failure mode simply propagate the driver error.
//!
//! # Example
//!
//! ```rust,ignore
//! use piezo_core::error::{PiezoError, PiezoResult};
//!
//! async fn read(controller: &PiezoController) -> PiezoResult<f64> {
//!     match controller.get_value().await {
//!         Err(PiezoError::NotConnected { serial }) => {
//!             eprintln!("controller {serial} offline");
//!             Err(PiezoError::NotConnected { serial })
//!         }
//!         other => other,
//!     }
//! }
//! ```

use thiserror::Error;

use crate::units::ControlMode;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a failed driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Device object could not be created or opened.
    Initialization,
    /// Device rejected or could not load its configuration.
    Configuration,
    /// USB/transport failure talking to the device.
    Communication,
    /// Device reported a fault.
    Hardware,
    /// A bounded wait expired.
    Timeout,
    /// Argument outside the range the device accepts.
    InvalidParameter,
    /// Anything the binding could not classify.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A failed call into the vendor driver binding.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver family that failed, e.g. `tcube_piezo`.
    pub driver_type: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Message reported by the binding.
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`DriverErrorKind::Timeout`] error.
    pub fn timeout(driver_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver_type, DriverErrorKind::Timeout, message)
    }

    /// Shorthand for a [`DriverErrorKind::Communication`] error.
    pub fn communication(driver_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver_type, DriverErrorKind::Communication, message)
    }
}

/// Result of a single driver call.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

// =============================================================================
// Core Errors
// =============================================================================

/// Result of a control core operation.
pub type PiezoResult<T> = std::result::Result<T, PiezoError>;

/// Error type of the piezo stage control core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PiezoError {
    /// Device enumeration failed or found no devices.
    ///
    /// No connect attempt is made after this error.
    #[error("Device discovery failed: {reason}")]
    DiscoveryFailed {
        /// What went wrong during enumeration.
        reason: String,
    },

    /// The driver refused the connection to the given serial.
    ///
    /// Nothing after the connect step of the session runs.
    #[error("Failed to connect to device {serial}: {source}")]
    ConnectFailed {
        /// Serial that was addressed.
        serial: String,
        /// Underlying driver failure.
        #[source]
        source: DriverError,
    },

    /// Device settings did not report initialized within the bounded wait.
    ///
    /// Non-fatal: the session logs it and continues enabling the device.
    #[error("Settings for device {serial} did not initialize within {timeout_ms} ms")]
    SettingsInitTimeout {
        /// Serial of the device.
        serial: String,
        /// Wait bound in milliseconds.
        timeout_ms: u64,
    },

    /// Driver-level device construction returned no handle.
    #[error("Driver returned no {device} handle for serial {serial}")]
    NullDevice {
        /// Device family, e.g. `piezo` or `strain gauge`.
        device: &'static str,
        /// Serial that was addressed.
        serial: String,
    },

    /// The strain gauge reported a display mode outside 1/2/3.
    #[error("Unrecognized strain gauge display mode {code}")]
    UnitsUnrecognized {
        /// Raw display mode code.
        code: i32,
    },

    /// The two calibration samples do not produce a usable linear fit.
    #[error("Calibration failed: reader positions x1={x1} and x2={x2} give no usable slope")]
    CalibrationFailed {
        /// Reader position sampled at the low set-point.
        x1: f64,
        /// Reader position sampled at the high set-point.
        x2: f64,
    },

    /// The reader returned a position that cannot be stepped from.
    #[error("Reader {serial} returned non-finite position {value}")]
    InvalidReading {
        /// Reader serial.
        serial: String,
        /// Value as read.
        value: f64,
    },

    /// A calibrated move was requested without a valid calibration.
    #[error("Position model is not calibrated")]
    ModelNotCalibrated,

    /// The component never reached the enabled state or failed on the way.
    #[error("Device {serial} is not connected")]
    NotConnected {
        /// Serial of the component.
        serial: String,
    },

    /// A reader-backed operation was requested on a controller without a reader.
    #[error("No strain gauge reader is configured for this controller")]
    ReaderNotConfigured,

    /// The operation requires the controller to be in another control mode.
    #[error("Operation requires {expected} mode")]
    WrongMode {
        /// Mode the operation needs.
        expected: ControlMode,
    },

    /// A long-running operation was cancelled at a settle step.
    #[error("Operation cancelled")]
    Cancelled,

    /// Semantic configuration error.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A driver call failed outside of the lifecycle steps.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl PiezoError {
    /// Whether the caller may carry on after this error.
    ///
    /// `SettingsInitTimeout` is logged and tolerated during connection.
    /// `ModelNotCalibrated` and `Cancelled` leave the device usable. Driver
    /// timeouts and communication errors may succeed on retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PiezoError::SettingsInitTimeout { .. }
            | PiezoError::ModelNotCalibrated
            | PiezoError::Cancelled
            | PiezoError::CalibrationFailed { .. } => true,
            PiezoError::Driver(err) => matches!(
                err.kind,
                DriverErrorKind::Timeout | DriverErrorKind::Communication
            ),
            _ => false,
        }
    }
}
