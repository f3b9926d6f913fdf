//! Simulated Kinesis hardware for the piezo stage controller.
//!
//! This crate provides an in-memory stand-in for the vendor driver so the
//! control core, the actor and the CLI run without a T-Cube attached. All
//! simulated delays use `tokio::time`, so tests with a paused clock see exact
//! timestamps.
//!
//! # Available Devices
//!
//! - [`MockKinesis`] - enumeration and device construction
//! - [`MockPiezo`] - T-Cube piezo controller (TPZ001-like)
//! - [`MockStrainGauge`] - T-Cube strain gauge reader (TSG001-like)
//!
//! The two devices share one [`SimulatedAxis`]: what the controller does to
//! the extension, the reader sees through its [`ResponseCurve`].
//!
//! # Test Support
//!
//! - [`CallJournal`] records every lifecycle call and command with a timestamp
//! - [`ErrorConfig`] injects typed driver failures

pub mod common;
mod journal;
mod mock_backend;
mod mock_piezo;
mod mock_strain_gauge;
mod response;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use journal::{CallJournal, DriverCall, JournalEntry};
pub use mock_backend::{MockKinesis, MockKinesisBuilder, SimulatedAxis, SimulationConfig};
pub use mock_piezo::{MockPiezo, FACTORY_SETTINGS};
pub use mock_strain_gauge::MockStrainGauge;
pub use response::ResponseCurve;
