//! Fixed timing and travel constants of the stage hardware.
//!
//! This module centralizes:
//! - Session sequencing delays (polling, settle, settings wait)
//! - Calibration set-points and settle times
//! - Soft travel bounds for reader-driven stepping
//! - Tuning applied to the controller at startup
//!
//! Keeping them in one place makes the hardware timing auditable.

use std::time::Duration;

// =============================================================================
// Session Timing
// =============================================================================

/// Device status polling interval requested at `StartPolling` (250 ms).
pub const POLLING_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on the settings-initialization wait (5 seconds).
///
/// Only waited when the device does not already report initialized settings.
pub const SETTINGS_INIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Settle delay after starting polling and again after enabling (500 ms).
pub const ENABLE_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Presentation monitor sampling interval (100 ms).
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Calibration
// =============================================================================

/// Lead-in settle before the first calibration set-point (1 second).
pub const CALIBRATION_LEAD_IN: Duration = Duration::from_secs(1);

/// Settle after commanding each calibration set-point (4 seconds).
pub const CALIBRATION_SETTLE: Duration = Duration::from_secs(4);

/// Gap after sampling the reader at a set-point (10 ms).
pub const CALIBRATION_SAMPLE_GAP: Duration = Duration::from_millis(10);

/// Low calibration set-point in percent of travel.
pub const CALIBRATION_LOW_PERCENT: f64 = 10.0;

/// High calibration set-point in percent of travel.
pub const CALIBRATION_HIGH_PERCENT: f64 = 70.0;

/// Physical position the stage is parked at after a successful calibration.
pub const CALIBRATION_PARK_POSITION: f64 = 1.0;

// =============================================================================
// Soft Travel
// =============================================================================

/// Reader position at or above which `move_pos_up` refuses to step.
pub const SOFT_TRAVEL_MAX: f64 = 19.0;

/// Reader position at or below which `move_pos_down` refuses to step.
pub const SOFT_TRAVEL_MIN: f64 = 1.0;

/// Physical step of `move_pos_up` / `move_pos_down` in reader units.
pub const POSITION_STEP: f64 = 1.0;

// =============================================================================
// Startup Tuning
// =============================================================================

/// Maximum output voltage applied at initialization (75 V).
pub const MAX_OUTPUT_VOLTAGE: f64 = 75.0;

/// Jog step in open loop (1 V).
pub const VOLTAGE_STEP: f64 = 1.0;

/// Jog step in closed loop (1 %).
pub const PERCENTAGE_STEP: f64 = 1.0;

/// Strain gauge front panel LED brightness.
pub const READER_LED_BRIGHTNESS: u8 = 120;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_points_are_ordered() {
        assert!(CALIBRATION_LOW_PERCENT < CALIBRATION_HIGH_PERCENT);
        assert!(SOFT_TRAVEL_MIN < SOFT_TRAVEL_MAX);
    }

    #[test]
    fn test_enable_sequence_fits_in_settings_timeout() {
        assert!(ENABLE_SETTLE_DELAY * 2 < SETTINGS_INIT_TIMEOUT);
        assert!(MONITOR_INTERVAL < POLLING_INTERVAL);
    }
}
