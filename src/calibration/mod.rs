//! Stereo calibration acceptance and artifact persistence.
//!
//! The numerics (corner detection, stereo solve) live behind
//! [`CalibrationSolver`]; this module decides when a result is good enough
//! and makes it available to triangulation.

mod acceptance;
mod artifact;
mod collaborators;

pub use acceptance::{
    unique_capture_dir, AcceptanceConfig, CalibrationAcceptanceLoop, CalibrationAttemptResult,
    CalibrationError,
};
pub use artifact::{ArtifactError, CalibrationArtifact};
pub use collaborators::{
    CalibrationSolver, CaptureError, CaptureSource, FramePair, PatternSpec, SolverError,
    SolverOutput,
};
