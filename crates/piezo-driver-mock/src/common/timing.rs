//! Timing configuration for realistic mode.
//!
//! Delays the simulated T-Cube devices apply when not in instant mode.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing configuration for realistic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// USB round trip per driver call in milliseconds.
    pub communication_delay_ms: u64,
    /// Time after connect until settings report initialized, in milliseconds.
    pub settings_init_ms: u64,
    /// Duration of a strain gauge zeroing cycle in milliseconds.
    pub zeroing_ms: u64,
}

impl TimingConfig {
    /// Timing of a T-Cube piezo controller.
    pub fn tcube_piezo() -> Self {
        Self {
            communication_delay_ms: 2,
            settings_init_ms: 300,
            zeroing_ms: 0,
        }
    }

    /// Timing of a T-Cube strain gauge reader.
    pub fn tcube_strain_gauge() -> Self {
        Self {
            communication_delay_ms: 2,
            settings_init_ms: 300,
            zeroing_ms: 2000,
        }
    }

    /// Communication delay as a [`Duration`].
    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    /// Settings load time as a [`Duration`].
    pub fn settings_init(&self) -> Duration {
        Duration::from_millis(self.settings_init_ms)
    }

    /// Zeroing cycle as a [`Duration`].
    pub fn zeroing(&self) -> Duration {
        Duration::from_millis(self.zeroing_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            communication_delay_ms: 0,
            settings_init_ms: 0,
            zeroing_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = TimingConfig::default();
        assert_eq!(config.communication_delay(), Duration::ZERO);
        assert_eq!(config.settings_init(), Duration::ZERO);
        assert_eq!(config.zeroing(), Duration::ZERO);
    }

    #[test]
    fn test_strain_gauge_timing() {
        let config = TimingConfig::tcube_strain_gauge();
        assert_eq!(config.zeroing(), Duration::from_secs(2));
        assert_eq!(TimingConfig::tcube_piezo().zeroing_ms, 0);
    }
}
