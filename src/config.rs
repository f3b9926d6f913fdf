//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`StageConfig::default`])
//! 2. `config/piezo_stage.toml`
//! 3. Environment variables prefixed with `PIEZO_STAGE_`, nested keys
//!    separated by `__` (e.g. `PIEZO_STAGE_MONITOR__INTERVAL_MS=250`)
//!
//! # Example
//! ```no_run
//! use piezo_stage::config::StageConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StageConfig::load()?;
//! config.validate()?;
//! println!("Controller: {}", config.controller.serial);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use piezo_core::error::{PiezoError, PiezoResult};
use piezo_core::limits::MONITOR_INTERVAL;
use piezo_driver_mock::SimulationConfig;
use piezo_driver_thorlabs::PiezoTuning;
use serde::{Deserialize, Serialize};

use crate::logging::OutputFormat;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/piezo_stage.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PIEZO_STAGE_";

/// Highest output voltage a T-Cube piezo driver can produce.
const HARDWARE_MAX_VOLTAGE: f64 = 150.0;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Controller and reader addressing
    pub controller: ControllerConfig,
    /// Poll monitor settings
    pub monitor: MonitorConfig,
    /// Devices presented by the bundled simulated backend
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Piezo Stage".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Which devices to drive and how the controller is tuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Piezo controller serial number
    pub serial: String,
    /// Strain gauge reader serial number, if one is attached
    pub reader_serial: Option<String>,
    /// Settings applied at initialization (never persisted to the device)
    pub tuning: PiezoTuning,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            serial: "81858318".to_string(),
            reader_serial: Some("84858066".to_string()),
            tuning: PiezoTuning::default(),
        }
    }
}

/// Poll monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Tick interval in milliseconds
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: MONITOR_INTERVAL.as_millis() as u64,
        }
    }
}

impl MonitorConfig {
    /// Tick interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl StageConfig {
    /// Load configuration from `config/piezo_stage.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The layered provider, exposed for inspection.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(StageConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PiezoResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        validate_serial("controller.serial", &self.controller.serial)?;
        if let Some(reader) = &self.controller.reader_serial {
            validate_serial("controller.reader_serial", reader)?;
            if *reader == self.controller.serial {
                return Err(invalid(format!(
                    "controller.reader_serial must differ from controller.serial ({})",
                    reader
                )));
            }
        }

        let tuning = &self.controller.tuning;
        if !(tuning.max_output_voltage > 0.0 && tuning.max_output_voltage <= HARDWARE_MAX_VOLTAGE)
        {
            return Err(invalid(format!(
                "Invalid max_output_voltage {}. Must be in (0, {}]",
                tuning.max_output_voltage, HARDWARE_MAX_VOLTAGE
            )));
        }
        if !(tuning.voltage_step > 0.0 && tuning.voltage_step <= tuning.max_output_voltage) {
            return Err(invalid(format!(
                "Invalid voltage_step {}. Must be positive and at most max_output_voltage",
                tuning.voltage_step
            )));
        }
        if !(tuning.percentage_step > 0.0 && tuning.percentage_step <= 100.0) {
            return Err(invalid(format!(
                "Invalid percentage_step {}. Must be in (0, 100]",
                tuning.percentage_step
            )));
        }

        if self.monitor.interval_ms == 0 {
            return Err(invalid("monitor.interval_ms must be non-zero"));
        }

        let simulation = &self.simulation;
        if !(0.0..=1.0).contains(&simulation.failure_rate) {
            return Err(invalid(format!(
                "Invalid simulation.failure_rate {}. Must be 0-1",
                simulation.failure_rate
            )));
        }
        if !(simulation.noise >= 0.0 && simulation.noise.is_finite()) {
            return Err(invalid(format!(
                "Invalid simulation.noise {}. Must be non-negative",
                simulation.noise
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> PiezoError {
    PiezoError::Configuration(message.into())
}

fn validate_serial(field: &str, serial: &str) -> PiezoResult<()> {
    if serial.is_empty() || !serial.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(format!(
            "Invalid {} '{}'. Must be a non-empty digit string",
            field, serial
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.interval(), Duration::from_millis(100));
        assert_eq!(config.controller.tuning.max_output_voltage, 75.0);
        assert_eq!(config.controller.tuning.voltage_step, 1.0);
        assert_eq!(config.controller.tuning.percentage_step, 1.0);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = StageConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(PiezoError::Configuration(_))));
    }

    #[test]
    fn test_serials_must_be_digits() {
        let mut config = StageConfig::default();
        config.controller.serial = "81-858318".to_string();
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.controller.reader_serial = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.controller.reader_serial = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reader_must_be_a_different_device() {
        let mut config = StageConfig::default();
        config.controller.reader_serial = Some(config.controller.serial.clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tuning_ranges() {
        let mut config = StageConfig::default();
        config.controller.tuning.percentage_step = 0.0;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.controller.tuning.max_output_voltage = 200.0;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.controller.tuning.voltage_step = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_monitor_interval() {
        let mut config = StageConfig::default();
        config.monitor.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_simulation_ranges() {
        let mut config = StageConfig::default();
        config.simulation.failure_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.simulation.noise = -0.1;
        assert!(config.validate().is_err());
    }
}
