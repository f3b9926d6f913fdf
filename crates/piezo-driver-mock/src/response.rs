//! Strain gauge response to piezo extension.
//!
//! The simulated reader does not see the commanded percentage directly. It
//! sees the physical extension through a piecewise linear response curve, so
//! tests can script exact sensor values at the calibration set-points.

use serde::{Deserialize, Serialize};

/// Piecewise linear map from extension (percent of travel) to reader position.
///
/// Points are kept sorted by extension. Outside the first and last point the
/// end segments are extrapolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct ResponseCurve {
    points: Vec<(f64, f64)>,
}

impl ResponseCurve {
    /// Build a curve from `(extension_percent, reader_position)` points.
    ///
    /// Needs at least two points with distinct extensions.
    pub fn new(mut points: Vec<(f64, f64)>) -> Result<Self, String> {
        if points.len() < 2 {
            return Err(format!(
                "response curve needs at least 2 points, got {}",
                points.len()
            ));
        }
        if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err("response curve points must be finite".to_string());
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if points.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err("response curve extensions must be distinct".to_string());
        }
        Ok(Self { points })
    }

    /// Linear 0-100 % to `0..=full_scale`.
    pub fn linear(full_scale: f64) -> Self {
        Self {
            points: vec![(0.0, 0.0), (100.0, full_scale)],
        }
    }

    /// A sensor stuck at `position` regardless of extension.
    pub fn flat(position: f64) -> Self {
        Self {
            points: vec![(0.0, position), (100.0, position)],
        }
    }

    /// Reader position at `extension` percent.
    pub fn position_at(&self, extension: f64) -> f64 {
        let last = self.points.len() - 1;
        let segment = self
            .points
            .windows(2)
            .position(|w| extension <= w[1].0)
            .unwrap_or(last - 1);
        let (x0, y0) = self.points[segment];
        let (x1, y1) = self.points[segment + 1];
        y0 + (extension - x0) * (y1 - y0) / (x1 - x0)
    }

    /// Curve points, sorted by extension.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}

impl Default for ResponseCurve {
    /// 0-100 % extension to 0-20 µm.
    fn default() -> Self {
        Self::linear(20.0)
    }
}

impl TryFrom<Vec<(f64, f64)>> for ResponseCurve {
    type Error = String;

    fn try_from(points: Vec<(f64, f64)>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<ResponseCurve> for Vec<(f64, f64)> {
    fn from(curve: ResponseCurve) -> Self {
        curve.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_twenty_micron_full_scale() {
        let curve = ResponseCurve::default();
        assert_eq!(curve.position_at(0.0), 0.0);
        assert_eq!(curve.position_at(50.0), 10.0);
        assert_eq!(curve.position_at(100.0), 20.0);
    }

    #[test]
    fn test_exact_values_at_points() {
        let curve = ResponseCurve::new(vec![(70.0, 25.0), (10.0, 5.0)]).unwrap();
        assert_eq!(curve.position_at(10.0), 5.0);
        assert_eq!(curve.position_at(70.0), 25.0);
        assert_eq!(curve.position_at(40.0), 15.0);
    }

    #[test]
    fn test_extrapolates_end_segments() {
        let curve = ResponseCurve::new(vec![(10.0, 5.0), (70.0, 25.0)]).unwrap();
        assert!((curve.position_at(-2.0) - 1.0).abs() < 1e-12);
        assert!((curve.position_at(100.0) - 35.0).abs() < 1e-12);
    }

    #[test]
    fn test_piecewise_segments() {
        let curve = ResponseCurve::new(vec![(0.0, 0.0), (50.0, 5.0), (100.0, 25.0)]).unwrap();
        assert_eq!(curve.position_at(25.0), 2.5);
        assert_eq!(curve.position_at(75.0), 15.0);
    }

    #[test]
    fn test_flat_curve() {
        let curve = ResponseCurve::flat(12.0);
        assert_eq!(curve.position_at(10.0), 12.0);
        assert_eq!(curve.position_at(70.0), 12.0);
    }

    #[test]
    fn test_rejects_degenerate_curves() {
        assert!(ResponseCurve::new(vec![(0.0, 0.0)]).is_err());
        assert!(ResponseCurve::new(vec![(5.0, 0.0), (5.0, 1.0)]).is_err());
        assert!(ResponseCurve::new(vec![(0.0, f64::NAN), (5.0, 1.0)]).is_err());
    }

    #[test]
    fn test_deserializes_from_point_list() {
        let curve: ResponseCurve = serde_json::from_str("[[0.0, 0.0], [100.0, 30.0]]").unwrap();
        assert_eq!(curve.position_at(50.0), 15.0);
        assert!(serde_json::from_str::<ResponseCurve>("[[1.0, 0.0]]").is_err());
    }
}
