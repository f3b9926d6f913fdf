//! # Piezo Stage
//!
//! Presentation runtime for a Thorlabs T-Cube piezo controller with an
//! optional strain gauge reader. The control core lives in the
//! `piezo-driver-thorlabs` crate; this crate runs it:
//!
//! - **`config`**: layered TOML + environment configuration (`StageConfig`)
//! - **`logging`**: `tracing-subscriber` setup driven by the configuration
//! - **`messages`**: commands and replies exchanged with the stage actor
//! - **`actor`**: `StageActor`, the single owner of the controller, and its
//!   `StageHandle`
//! - **`monitor`**: `PollMonitor`, periodic snapshots rendered to a sink
//!
//! The `piezo-stage` binary wires these to the simulated Kinesis backend.

pub mod actor;
pub mod config;
pub mod logging;
pub mod messages;
pub mod monitor;

pub use actor::{StageActor, StageHandle};
pub use config::StageConfig;
pub use messages::{StageCommand, StageError, StageResult};
pub use monitor::{
    format_snapshot, ConsoleSink, MemorySink, MonitorSnapshot, PollMonitor, SnapshotSink,
    TickOutcome,
};
