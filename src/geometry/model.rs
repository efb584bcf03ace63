//! Stereo calibration model and its shared, swappable holder.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;

/// Default lens focal length used by the datasheet fallback (millimetres).
pub const DATASHEET_FOCAL_LENGTH_MM: f64 = 4.74;

/// Default sensor pixel pitch used by the datasheet fallback (millimetres).
pub const DATASHEET_PIXEL_SIZE_MM: f64 = 0.00155;

/// Calibration model validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Focal lengths must be positive and finite (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("Principal point must be finite (cx={cx}, cy={cy})")]
    InvalidPrincipalPoint { cx: f64, cy: f64 },
    #[error("Baseline must be positive and finite, got {0} m")]
    InvalidBaseline(f64),
    #[error("Vertical offset must be finite, got {0} m")]
    InvalidVerticalOffset(f64),
    #[error("Image size must be non-zero, got {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
}

/// Rectified stereo intrinsics/extrinsics of the left camera.
///
/// The model is immutable once built. A successful recalibration produces a
/// new instance which is swapped into [`SharedCalibration`]; nothing mutates
/// a model in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationModel {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    baseline_m: f64,
    vertical_offset_m: f64,
    image_width: u32,
    image_height: u32,
}

impl CalibrationModel {
    /// Build a model, rejecting non-physical values.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        baseline_m: f64,
        vertical_offset_m: f64,
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, ModelError> {
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            return Err(ModelError::InvalidFocalLength { fx, fy });
        }
        if !(cx.is_finite() && cy.is_finite()) {
            return Err(ModelError::InvalidPrincipalPoint { cx, cy });
        }
        if !(baseline_m.is_finite() && baseline_m > 0.0) {
            return Err(ModelError::InvalidBaseline(baseline_m));
        }
        if !vertical_offset_m.is_finite() {
            return Err(ModelError::InvalidVerticalOffset(vertical_offset_m));
        }
        if image_width == 0 || image_height == 0 {
            return Err(ModelError::InvalidImageSize {
                width: image_width,
                height: image_height,
            });
        }

        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            baseline_m,
            vertical_offset_m,
            image_width,
            image_height,
        })
    }

    /// Intrinsics derived from the lens/sensor datasheet when no calibration
    /// artifact exists: `fx = fy = focal / pixel_size`, principal point at the
    /// image centre.
    pub fn from_datasheet(
        image_width: u32,
        image_height: u32,
        baseline_m: f64,
        vertical_offset_m: f64,
    ) -> Result<Self, ModelError> {
        Self::from_lens(
            image_width,
            image_height,
            baseline_m,
            vertical_offset_m,
            DATASHEET_FOCAL_LENGTH_MM,
            DATASHEET_PIXEL_SIZE_MM,
        )
    }

    /// Same as [`CalibrationModel::from_datasheet`] with explicit optics.
    pub fn from_lens(
        image_width: u32,
        image_height: u32,
        baseline_m: f64,
        vertical_offset_m: f64,
        focal_length_mm: f64,
        pixel_size_mm: f64,
    ) -> Result<Self, ModelError> {
        let f_px = focal_length_mm / pixel_size_mm;
        Self::new(
            f_px,
            f_px,
            image_width as f64 / 2.0,
            image_height as f64 / 2.0,
            baseline_m,
            vertical_offset_m,
            image_width,
            image_height,
        )
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    /// Distance between the two optical centres (metres).
    pub fn baseline_m(&self) -> f64 {
        self.baseline_m
    }

    /// Vertical offset between the laser and the left camera (metres).
    pub fn vertical_offset_m(&self) -> f64 {
        self.vertical_offset_m
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Image dimensions the model was calibrated for.
    pub fn frame(&self) -> super::Frame {
        super::Frame::new(self.image_width, self.image_height)
    }
}

/// Read-shared handle to the current calibration model.
///
/// Readers take a cheap `Arc` snapshot; a recalibration replaces the whole
/// reference in one step, so a reader never sees a half-updated model.
#[derive(Debug, Clone, Default)]
pub struct SharedCalibration {
    current: Arc<RwLock<Option<Arc<CalibrationModel>>>>,
}

impl SharedCalibration {
    /// Create an empty holder (no calibration loaded).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a holder already containing `model`.
    pub fn with_model(model: CalibrationModel) -> Self {
        let shared = Self::new();
        shared.swap(model);
        shared
    }

    /// Snapshot of the current model, if any.
    pub fn load(&self) -> Option<Arc<CalibrationModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current model, returning the previous one.
    pub fn swap(&self, model: CalibrationModel) -> Option<Arc<CalibrationModel>> {
        let next = Arc::new(model);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        guard.replace(next)
    }

    /// Whether a model has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.load().is_some()
    }
}
