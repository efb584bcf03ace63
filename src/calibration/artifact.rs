//! Persisted calibration record.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::collaborators::PatternSpec;
use crate::geometry::{CalibrationModel, ModelError};
use crate::persist::write_atomic;

/// Artifact I/O errors.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to access calibration artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid calibration artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Calibration artifact holds an invalid model: {0}")]
    Model(#[from] ModelError),
}

/// Calibration model plus provenance, as stored on disk (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub baseline_m: f64,
    pub vertical_offset_m: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub rms_error: f64,
    /// Directory holding the frames this model was solved from.
    pub capture_dir: Option<PathBuf>,
    pub pattern: PatternSpec,
    pub square_size_m: f64,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl CalibrationArtifact {
    pub fn new(
        model: &CalibrationModel,
        rms_error: f64,
        capture_dir: Option<PathBuf>,
        pattern: PatternSpec,
        square_size_m: f64,
        attempt: u32,
    ) -> Self {
        Self {
            fx: model.fx(),
            fy: model.fy(),
            cx: model.cx(),
            cy: model.cy(),
            baseline_m: model.baseline_m(),
            vertical_offset_m: model.vertical_offset_m(),
            image_width: model.image_width(),
            image_height: model.image_height(),
            rms_error,
            capture_dir,
            pattern,
            square_size_m,
            attempt,
            created_at: Utc::now(),
        }
    }

    /// Rebuild the (validated) model.
    pub fn model(&self) -> Result<CalibrationModel, ModelError> {
        CalibrationModel::new(
            self.fx,
            self.fy,
            self.cx,
            self.cy,
            self.baseline_m,
            self.vertical_offset_m,
            self.image_width,
            self.image_height,
        )
    }

    /// Write atomically: readers never observe a partial artifact.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes()).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), rms = self.rms_error, "Calibration artifact saved");
        Ok(())
    }

    /// Read an artifact and check that it describes a valid model.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let content = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: Self = serde_json::from_str(&content)?;
        artifact.model()?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("st_artifact_{}_{}", std::process::id(), name))
    }

    fn model() -> CalibrationModel {
        CalibrationModel::new(1510.0, 1505.0, 318.25, 241.75, 0.125, 0.03125, 640, 480).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_file("ok.json");
        let artifact = CalibrationArtifact::new(
            &model(),
            0.4375,
            Some(PathBuf::from("photos_calibration1")),
            PatternSpec::default(),
            0.0625,
            2,
        );
        artifact.save(&path).unwrap();

        let loaded = CalibrationArtifact::load(&path).unwrap();
        assert_eq!(loaded, artifact);
        assert_eq!(loaded.model().unwrap(), model());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_invalid_model() {
        let path = temp_file("bad.json");
        let mut artifact =
            CalibrationArtifact::new(&model(), 0.42, None, PatternSpec::default(), 0.025, 1);
        artifact.baseline_m = -0.1;
        fs::write(&path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let err = CalibrationArtifact::load(&path).unwrap_err();
        assert!(matches!(err, ArtifactError::Model(ModelError::InvalidBaseline(_))));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CalibrationArtifact::load(&temp_file("missing.json")).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }
}
