//! Stereo geometry: calibration model, triangulation and the safety zone.

mod model;
mod safe_zone;
mod triangulation;

pub use model::{
    CalibrationModel, ModelError, SharedCalibration, DATASHEET_FOCAL_LENGTH_MM,
    DATASHEET_PIXEL_SIZE_MM,
};
pub use safe_zone::{Frame, SafeZoneRect, SafetyZoneFilter};
pub use triangulation::{
    triangulate, AimSolution, TriangulationEngine, TriangulationError, DEFAULT_MIN_DISPARITY_PX,
};
