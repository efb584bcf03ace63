//! Capture and solver seams used by the acceptance loop.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{CalibrationModel, Frame};

/// Capture errors. Fatal to the acceptance loop.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device error: {0}")]
    Device(String),
    #[error("Left/right frame sizes differ: {left:?} vs {right:?}")]
    MismatchedFrames { left: Frame, right: Frame },
}

/// Solver errors. A failed solve counts as a rejected attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Pattern found in {found} pairs, at least {required} needed")]
    InsufficientPatternDetections { found: usize, required: usize },
    #[error("Calibration solver failed: {0}")]
    Failed(String),
}

/// A synchronized left/right frame pair.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub left: RgbImage,
    pub right: RgbImage,
}

impl FramePair {
    /// Pair two frames, which must have the same size.
    pub fn new(left: RgbImage, right: RgbImage) -> Result<Self, CaptureError> {
        let l = Frame::new(left.width(), left.height());
        let r = Frame::new(right.width(), right.height());
        if l != r {
            return Err(CaptureError::MismatchedFrames { left: l, right: r });
        }
        Ok(Self { left, right })
    }

    pub fn frame(&self) -> Frame {
        Frame::new(self.left.width(), self.left.height())
    }
}

/// Chessboard inner-corner grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub cols: u32,
    pub rows: u32,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self { cols: 9, rows: 6 }
    }
}

/// Solver result: reprojection error and the calibrated model.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutput {
    pub rms_error: f64,
    pub model: CalibrationModel,
}

/// Source of synchronized stereo frames.
pub trait CaptureSource {
    fn capture_pair(&mut self) -> Result<FramePair, CaptureError>;
}

/// Stereo calibration numerics.
pub trait CalibrationSolver {
    fn calibrate(
        &mut self,
        pairs: &[FramePair],
        pattern: PatternSpec,
        square_size_m: f64,
    ) -> Result<SolverOutput, SolverError>;
}
