//! Operational modes for the simulated devices.
//!
//! - **Instant**: no driver latency, deterministic; for unit tests
//! - **Realistic**: T-Cube-like latency, settings load time and zeroing time
//! - **Chaos**: realistic timing plus random injected driver failures

use serde::{Deserialize, Serialize};

/// Operational mode of a simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic.
    #[default]
    Instant,
    /// Hardware-like timing.
    Realistic,
    /// Hardware-like timing with random failures.
    Chaos,
}

impl MockMode {
    /// Whether driver calls should take simulated time.
    pub fn is_timed(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}
