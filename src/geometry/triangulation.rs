//! Rectified stereo triangulation into laser aim angles.

use std::sync::Arc;

use thiserror::Error;

use super::model::{CalibrationModel, SharedCalibration};

/// Disparity below which a correspondence is not triangulable (pixels).
pub const DEFAULT_MIN_DISPARITY_PX: f64 = 0.5;

/// Distances at or below this are treated as degenerate (metres).
const MIN_DISTANCE_M: f64 = 1e-9;

/// Triangulation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TriangulationError {
    #[error("Calibration missing: intrinsics are not loaded")]
    CalibrationMissing,
    #[error("Degenerate geometry: disparity {disparity:.3} px is below {min_disparity:.3} px")]
    DisparityTooSmall { disparity: f64, min_disparity: f64 },
    #[error("Degenerate geometry: triangulated distance {0:e} m is too small")]
    DistanceTooSmall(f64),
}

impl TriangulationError {
    /// Whether the failure comes from the geometry rather than a missing model.
    pub fn is_degenerate(&self) -> bool {
        !matches!(self, Self::CalibrationMissing)
    }
}

/// Triangulated point and the aim angles towards it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimSolution {
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub distance_m: f64,
    /// Point in the left camera frame `(X, Y, Z)` in metres.
    pub point_m: [f64; 3],
    pub disparity_px: f64,
}

/// Converts left/right pixel correspondences into pitch, yaw and distance.
#[derive(Debug, Clone)]
pub struct TriangulationEngine {
    calibration: SharedCalibration,
    min_disparity_px: f64,
}

impl TriangulationEngine {
    /// Create an engine reading from `calibration`.
    pub fn new(calibration: SharedCalibration) -> Self {
        Self {
            calibration,
            min_disparity_px: DEFAULT_MIN_DISPARITY_PX,
        }
    }

    /// Set the minimum accepted disparity.
    pub fn with_min_disparity(mut self, min_disparity_px: f64) -> Self {
        self.min_disparity_px = min_disparity_px;
        self
    }

    pub fn min_disparity_px(&self) -> f64 {
        self.min_disparity_px
    }

    /// Current calibration snapshot.
    pub fn model(&self) -> Option<Arc<CalibrationModel>> {
        self.calibration.load()
    }

    /// Triangulate with whatever model is currently loaded.
    pub fn compute_angles(
        &self,
        lx: f64,
        ly: f64,
        rx: f64,
        ry: f64,
    ) -> Result<AimSolution, TriangulationError> {
        let model = self.model().ok_or(TriangulationError::CalibrationMissing)?;
        self.compute_angles_with(&model, lx, ly, rx, ry)
    }

    /// Triangulate against an explicit model snapshot.
    pub fn compute_angles_with(
        &self,
        model: &CalibrationModel,
        lx: f64,
        ly: f64,
        rx: f64,
        ry: f64,
    ) -> Result<AimSolution, TriangulationError> {
        triangulate(model, self.min_disparity_px, lx, ly, rx, ry)
    }
}

/// Pinhole triangulation of a rectified correspondence.
///
/// `ry` is not used: on a rectified pair both rows agree and the left row is
/// authoritative.
pub fn triangulate(
    model: &CalibrationModel,
    min_disparity_px: f64,
    lx: f64,
    ly: f64,
    rx: f64,
    _ry: f64,
) -> Result<AimSolution, TriangulationError> {
    let disparity = lx - rx;
    // Written negated so a NaN disparity is rejected too.
    if !(disparity >= min_disparity_px) {
        return Err(TriangulationError::DisparityTooSmall {
            disparity,
            min_disparity: min_disparity_px,
        });
    }

    let z = model.fx() * model.baseline_m() / disparity;
    let x = (lx - model.cx()) * z / model.fx();
    let y = (ly - model.cy()) * z / model.fy();

    let distance = (x * x + y * y + z * z).sqrt();
    if !(distance > MIN_DISTANCE_M) || !distance.is_finite() {
        return Err(TriangulationError::DistanceTooSmall(distance));
    }

    let ratio_vert = (y / distance).clamp(-1.0, 1.0);
    let ratio_horiz = (x / distance).clamp(-1.0, 1.0);

    // Side view: horizontal projection of the line of sight.
    let add = ratio_vert.asin().cos() * distance;
    let pitch_deg = (model.vertical_offset_m() + y).atan2(add).to_degrees();
    // Top view.
    let yaw_deg = ratio_horiz.asin().to_degrees();

    tracing::debug!(
        x_m = x,
        y_m = y,
        z_m = z,
        disparity_px = disparity,
        distance_m = distance,
        pitch_deg,
        yaw_deg,
        "Triangulated target"
    );

    Ok(AimSolution {
        pitch_deg,
        yaw_deg,
        distance_m: distance,
        point_m: [x, y, z],
        disparity_px: disparity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_model() -> CalibrationModel {
        CalibrationModel::new(2000.0, 2000.0, 320.0, 240.0, 0.10, 0.0, 640, 480).unwrap()
    }

    fn engine() -> TriangulationEngine {
        TriangulationEngine::new(SharedCalibration::with_model(reference_model()))
    }

    /// Project a 3D point in the left camera frame onto both rectified images.
    fn project(model: &CalibrationModel, p: [f64; 3]) -> (f64, f64, f64, f64) {
        let [x, y, z] = p;
        let lx = model.cx() + model.fx() * x / z;
        let ly = model.cy() + model.fy() * y / z;
        let rx = lx - model.fx() * model.baseline_m() / z;
        (lx, ly, rx, ly)
    }

    #[test]
    fn test_synthetic_point_round_trip() {
        let model = reference_model();
        let (lx, ly, rx, ry) = project(&model, [0.2, 0.0, 20.0]);
        assert!((lx - 340.0).abs() < 1e-9);
        assert!((rx - 330.0).abs() < 1e-9);
        assert!((ly - 240.0).abs() < 1e-9);

        let solution = engine().compute_angles(lx, ly, rx, ry).unwrap();
        let expected_yaw = (0.2f64 / 20.0).asin().to_degrees();
        assert!((solution.distance_m - 20.0).abs() < 1e-3);
        assert!((solution.yaw_deg - expected_yaw).abs() < 1e-3);
        assert!(solution.pitch_deg.abs() < 1e-9);
        assert!((solution.point_m[2] - 20.0).abs() < 1e-9);
        assert!((solution.disparity_px - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_offset_raises_pitch() {
        let model =
            CalibrationModel::new(2000.0, 2000.0, 320.0, 240.0, 0.10, 0.5, 640, 480).unwrap();
        let engine = TriangulationEngine::new(SharedCalibration::with_model(model));
        let solution = engine.compute_angles(320.0, 240.0, 310.0, 240.0).unwrap();
        // Point straight ahead at Z = 20 m, laser 0.5 m below the camera.
        let expected = (0.5f64).atan2(20.0).to_degrees();
        assert!((solution.pitch_deg - expected).abs() < 1e-6);
    }

    #[test]
    fn test_small_disparity_is_degenerate() {
        let err = engine().compute_angles(320.2, 240.0, 320.0, 240.0).unwrap_err();
        assert!(matches!(err, TriangulationError::DisparityTooSmall { .. }));
        assert!(err.is_degenerate());
    }

    #[test]
    fn test_negative_disparity_is_degenerate() {
        let err = engine().compute_angles(300.0, 240.0, 330.0, 240.0).unwrap_err();
        match err {
            TriangulationError::DisparityTooSmall { disparity, .. } => {
                assert!((disparity + 30.0).abs() < 1e-9)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nan_input_is_degenerate() {
        let err = engine()
            .compute_angles(f64::NAN, 240.0, 300.0, 240.0)
            .unwrap_err();
        assert!(err.is_degenerate());
    }

    #[test]
    fn test_missing_calibration() {
        let engine = TriangulationEngine::new(SharedCalibration::new());
        let err = engine.compute_angles(340.0, 240.0, 330.0, 240.0).unwrap_err();
        assert_eq!(err, TriangulationError::CalibrationMissing);
        assert!(!err.is_degenerate());
    }

    #[test]
    fn test_custom_min_disparity() {
        let engine = engine().with_min_disparity(20.0);
        assert!(engine.compute_angles(340.0, 240.0, 330.0, 240.0).is_err());
        assert!(engine.compute_angles(360.0, 240.0, 330.0, 240.0).is_ok());
    }

    #[test]
    fn test_outputs_finite_over_image_grid() {
        let engine = engine();
        for lx in (0..=640).step_by(40) {
            for ly in (0..=480).step_by(40) {
                for disparity in [0.5, 1.0, 3.7, 25.0, 200.0, 640.0] {
                    let lx = lx as f64;
                    let ly = ly as f64;
                    let s = engine
                        .compute_angles(lx, ly, lx - disparity, ly)
                        .unwrap();
                    assert!(s.yaw_deg.is_finite() && s.pitch_deg.is_finite());
                    assert!((-90.0..=90.0).contains(&s.yaw_deg));
                    assert!(s.distance_m > 0.0);
                }
            }
        }
    }

    #[test]
    fn test_engine_follows_recalibration() {
        let shared = SharedCalibration::with_model(reference_model());
        let engine = TriangulationEngine::new(shared.clone());
        let before = engine.compute_angles(340.0, 240.0, 330.0, 240.0).unwrap();

        let wider =
            CalibrationModel::new(2000.0, 2000.0, 320.0, 240.0, 0.20, 0.0, 640, 480).unwrap();
        shared.swap(wider);
        let after = engine.compute_angles(340.0, 240.0, 330.0, 240.0).unwrap();
        assert!((after.point_m[2] - 2.0 * before.point_m[2]).abs() < 1e-9);
    }
}
