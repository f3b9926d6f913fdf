//! Two-point linear calibration from reader units to percentage travel.
//!
//! The fit maps a physical reader position `x` to the closed-loop command
//! `percentage = slope * x + intercept`. It is only valid while the
//! controller stays in closed loop.

use serde::Serialize;

use piezo_core::error::{PiezoError, PiezoResult};

/// A commanded percentage and the reader position measured there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    /// Commanded percentage travel.
    pub percentage: f64,
    /// Reader position after settling.
    pub reader_position: f64,
}

/// Slope and intercept of a successful calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    /// Percent of travel per reader unit.
    pub slope: f64,
    /// Percent of travel at reader position zero.
    pub intercept: f64,
}

impl LinearFit {
    /// Fit the line through two calibration points.
    ///
    /// Fails with [`PiezoError::CalibrationFailed`] when the reader positions
    /// coincide or the result is not finite. Nothing is defaulted.
    pub fn from_points(low: CalibrationPoint, high: CalibrationPoint) -> PiezoResult<Self> {
        let x1 = low.reader_position;
        let x2 = high.reader_position;
        let failed = PiezoError::CalibrationFailed { x1, x2 };

        let span = x2 - x1;
        if span == 0.0 || !span.is_finite() {
            return Err(failed);
        }
        let slope = (high.percentage - low.percentage) / span;
        let intercept = -slope * x1 + low.percentage;
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(failed);
        }
        Ok(Self { slope, intercept })
    }

    /// Percentage travel that puts the stage at reader position `position`.
    pub fn percentage_for(&self, position: f64) -> f64 {
        self.slope * position + self.intercept
    }
}

/// Calibration state owned by a controller. Unset until a fit succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationModel {
    fit: Option<LinearFit>,
}

impl CalibrationModel {
    /// Uncalibrated model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fit is held.
    pub fn is_calibrated(&self) -> bool {
        self.fit.is_some()
    }

    /// Current fit, if any.
    pub fn fit(&self) -> Option<LinearFit> {
        self.fit
    }

    /// Replace the model with the fit through `low` and `high`.
    ///
    /// The previous fit is dropped first, so a failed fit leaves the model
    /// uncalibrated.
    pub fn fit_points(
        &mut self,
        low: CalibrationPoint,
        high: CalibrationPoint,
    ) -> PiezoResult<LinearFit> {
        self.fit = None;
        let fit = LinearFit::from_points(low, high)?;
        self.fit = Some(fit);
        Ok(fit)
    }

    /// Discard the fit. Returns whether one was held.
    pub fn invalidate(&mut self) -> bool {
        self.fit.take().is_some()
    }

    /// Percentage travel for reader position `position`.
    pub fn percentage_for(&self, position: f64) -> PiezoResult<f64> {
        self.fit
            .map(|fit| fit.percentage_for(position))
            .ok_or(PiezoError::ModelNotCalibrated)
    }
}
