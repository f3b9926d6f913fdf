//! Thorlabs T-Cube piezo stage control.
//!
//! This crate provides the control core for a T-Cube piezo controller with an
//! optional T-Cube strain gauge reader:
//! - [`session`]: connect/enable lifecycle of one device
//! - [`StrainReader`]: position reading, zeroing, display units
//! - [`PiezoController`]: voltage/percentage control, jog, loop mode switching
//! - [`CalibrationModel`]: two-point fit from reader units to percentage travel
//!
//! All hardware access goes through the `piezo-core` capability traits, so the
//! same code runs against the vendor binding or the simulated backend.
//!
//! # Usage
//!
//! ```rust,ignore
//! use piezo_driver_thorlabs::PiezoController;
//!
//! let mut controller = PiezoController::new("81858318", Some("84858066".into()));
//! controller.initialize(&backend, &CancelToken::never()).await?;
//! let reading = controller.read_value().await?;
//! println!("{} {}", reading.value, reading.unit);
//! ```

pub mod calibration;
pub mod controller;
pub mod session;
pub mod strain_reader;

pub use calibration::{CalibrationModel, CalibrationPoint, LinearFit};
pub use controller::{PiezoController, PiezoTuning, ValueReading};
pub use session::{discover_devices, DeviceSession, SessionStage, SessionTiming};
pub use strain_reader::StrainReader;

