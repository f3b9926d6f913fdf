//! Core types and traits for the piezo stage controller.
//!
//! - [`error`]: driver and core error types
//! - [`capabilities`]: traits the control core uses to reach the device driver
//! - [`units`]: control modes, units and driver codes
//! - [`limits`]: fixed timing and travel constants
//! - [`cancel`]: cancellation for long settle sequences

pub mod cancel;
pub mod capabilities;
pub mod error;
pub mod limits;
pub mod units;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::{DriverError, DriverErrorKind, DriverResult, PiezoError, PiezoResult};
pub use units::{ControlMode, JogDirection, Unit};
