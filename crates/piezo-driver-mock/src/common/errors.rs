//! Error injection framework for the simulated devices.
//!
//! Produces typed [`DriverError`]s from `piezo-core`, so the control core sees
//! exactly what a failing vendor binding would hand it.

use super::rng::MockRng;
use parking_lot::Mutex;
use piezo_core::error::{DriverError, DriverErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration for simulated devices.
///
/// Clones share scenario state, so one config can be handed to both devices
/// of a controller/reader pair.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); `*` applies to all operations.
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios.
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions.
    rng: Arc<MockRng>,
    /// State tracking for scenarios.
    state: Arc<Mutex<ErrorState>>,
}

/// A scripted driver failure.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail after N successful calls of `operation`.
    FailAfterN {
        /// Operation name, e.g. `set_percentage_travel`.
        operation: &'static str,
        /// Successful calls before failures start.
        count: u32,
    },
    /// Every call of `operation` times out.
    Timeout {
        /// Operation name.
        operation: &'static str,
    },
    /// Every call of `operation` reports a communication failure.
    Refuse {
        /// Operation name.
        operation: &'static str,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Check whether `operation` should fail and return the injected error.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            driver_type,
                            DriverErrorKind::Hardware,
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::timeout(
                        driver_type,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::Refuse { operation: op } if *op == operation => {
                    return Err(DriverError::communication(
                        driver_type,
                        format!("Operation '{}' refused", operation),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("tcube_piezo", "connect").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("tcube_piezo", "jog").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "reading",
            count: 2,
        });
        assert!(config.check_operation("tcube_strain", "reading").is_ok());
        assert!(config.check_operation("tcube_strain", "reading").is_ok());
        assert!(config.check_operation("tcube_strain", "reading").is_err());
        // Other operations are untouched
        assert!(config.check_operation("tcube_strain", "set_zero").is_ok());
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "wait_for_settings_initialized",
        });
        let err = config
            .check_operation("tcube_piezo", "wait_for_settings_initialized")
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_refuse_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Refuse { operation: "connect" });
        let err = config.check_operation("tcube_piezo", "connect").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        assert!(config.check_operation("tcube_piezo", "enable_device").is_ok());
    }
}
