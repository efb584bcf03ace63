//! Rig settings shared by the CLI and library users.
//! Persisted as JSON in the platform-specific config directory via `directories::ProjectDirs`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::{AcceptanceConfig, ArtifactError, CalibrationArtifact, PatternSpec};
use crate::controller::TargetingConfig;
use crate::detection::FeedConfig;
use crate::geometry::{CalibrationModel, ModelError};
use crate::persist::write_atomic;

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_ENV: &str = "STEREO_TARGETING_CONFIG";

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Failed to load calibration: {0}")]
    Calibration(#[from] ArtifactError),
    #[error("Invalid optics settings: {0}")]
    Model(#[from] ModelError),
}

/// Detection and pairing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum detection score in `[0, 1]`
    pub score_min_detection: f64,
    /// Pairing gate on the vertical offset (pixels)
    pub pair_max_dist_px: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            score_min_detection: 0.5,
            pair_max_dist_px: 40.0,
        }
    }
}

/// Wall rectangle the mirror range was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub distance_wall_m: f64,
    pub rect_w_m: f64,
    pub rect_h_m: f64,
}

/// Laser and mirror options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSettings {
    /// Laser on-time per shot (seconds)
    pub shoot_duration_s: f64,
    /// Mirror range (degrees)
    pub max_angle_deg: f64,
    /// Wait between aiming and firing (milliseconds)
    pub settle_ms: u64,
    /// Wait after a missed cycle (milliseconds)
    pub backoff_ms: u64,
    /// Set by the `max-angle` command
    pub alignment: Option<AlignmentRecord>,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            shoot_duration_s: 0.5,
            max_angle_deg: 20.0,
            settle_ms: 50,
            backoff_ms: 50,
            alignment: None,
        }
    }
}

/// Safe zone options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Border excluded from targeting, as a fraction of each dimension
    pub safe_zone_padding_fraction: f64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            safe_zone_padding_fraction: 0.2,
        }
    }
}

/// Stereo geometry options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticsSettings {
    /// Camera baseline (metres)
    pub baseline_m: f64,
    /// Laser to left camera vertical offset (metres)
    pub vertical_offset_m: f64,
    /// Smallest disparity that is triangulated (pixels)
    pub min_disparity_px: f64,
    /// Lens focal length for the datasheet fallback (millimetres)
    pub focal_length_mm: f64,
    /// Sensor pixel size for the datasheet fallback (millimetres)
    pub pixel_size_mm: f64,
    /// Calibration artifact written by the acceptance loop
    pub calibration_path: Option<PathBuf>,
}

impl Default for OpticsSettings {
    fn default() -> Self {
        Self {
            baseline_m: 0.10,
            vertical_offset_m: 0.0,
            min_disparity_px: crate::geometry::DEFAULT_MIN_DISPARITY_PX,
            focal_length_mm: crate::geometry::DATASHEET_FOCAL_LENGTH_MM,
            pixel_size_mm: crate::geometry::DATASHEET_PIXEL_SIZE_MM,
            calibration_path: None,
        }
    }
}

/// Camera options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Frames pulled per second per camera
    pub frame_rate_hz: u32,
    pub left_index: u32,
    pub right_index: u32,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            frame_rate_hz: 8,
            left_index: 0,
            right_index: 1,
            image_width: 640,
            image_height: 480,
        }
    }
}

/// Calibration acceptance options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Largest accepted RMS reprojection error (pixels)
    pub rms_threshold: f64,
    pub max_attempts: u32,
    /// Frame pairs per attempt
    pub pair_count: usize,
    /// Pause between captures (milliseconds)
    pub capture_interval_ms: u64,
    pub pattern_cols: u32,
    pub pattern_rows: u32,
    /// Chessboard square edge (metres)
    pub square_size_m: f64,
    /// Base name of the per-attempt capture directories
    pub capture_root: PathBuf,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            rms_threshold: 0.8,
            max_attempts: 10,
            pair_count: 120,
            capture_interval_ms: 200,
            pattern_cols: 9,
            pattern_rows: 6,
            square_size_m: 0.025,
            capture_root: PathBuf::from("photos_calibration"),
        }
    }
}

/// Controller options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Consecutive detector failures tolerated before the loop stops
    pub max_detection_failures: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_detection_failures: 20,
        }
    }
}

/// All rig settings. Missing sections and fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detection: DetectionSettings,
    pub laser: LaserSettings,
    pub security: SecuritySettings,
    pub optics: OpticsSettings,
    pub camera: CameraSettings,
    pub calibration: CalibrationSettings,
    pub controller: ControllerSettings,
}

/// Where the calibration model came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationSource {
    Artifact(PathBuf),
    Datasheet,
}

impl Settings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "stereo-targeting")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Settings file path: `$STEREO_TARGETING_CONFIG`, else `config.json` in
    /// the config directory.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| Self::config_dir().map(|dir| dir.join("config.json")))
    }

    /// Load and validate settings from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "No settings file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save settings atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, content.as_bytes()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: reason.into(),
            })
        }

        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.score_min_detection) {
            return invalid("detection.score_min_detection", "must be within [0, 1]");
        }
        if !(d.pair_max_dist_px > 0.0) {
            return invalid("detection.pair_max_dist_px", "must be positive");
        }

        let l = &self.laser;
        if !(l.shoot_duration_s > 0.0 && l.shoot_duration_s.is_finite()) {
            return invalid("laser.shoot_duration_s", "must be positive");
        }
        if !(l.max_angle_deg > 0.0 && l.max_angle_deg <= 90.0) {
            return invalid("laser.max_angle_deg", "must be within (0, 90]");
        }
        if l.settle_ms == 0 {
            return invalid("laser.settle_ms", "must be at least 1 ms");
        }

        let padding = self.security.safe_zone_padding_fraction;
        if !(0.0..0.5).contains(&padding) {
            return invalid("security.safe_zone_padding_fraction", "must be within [0, 0.5)");
        }

        let o = &self.optics;
        if !(o.baseline_m > 0.0 && o.baseline_m.is_finite()) {
            return invalid("optics.baseline_m", "must be positive");
        }
        if !o.vertical_offset_m.is_finite() {
            return invalid("optics.vertical_offset_m", "must be finite");
        }
        if !(o.min_disparity_px > 0.0) {
            return invalid("optics.min_disparity_px", "must be positive");
        }
        if !(o.focal_length_mm > 0.0 && o.pixel_size_mm > 0.0) {
            return invalid("optics.focal_length_mm", "focal length and pixel size must be positive");
        }

        let c = &self.camera;
        if c.frame_rate_hz == 0 {
            return invalid("camera.frame_rate_hz", "must be at least 1");
        }
        if c.image_width == 0 || c.image_height == 0 {
            return invalid("camera.image_width", "image size must be non-zero");
        }
        if c.left_index == c.right_index {
            return invalid("camera.right_index", "left and right cameras must differ");
        }

        let k = &self.calibration;
        if !(k.rms_threshold > 0.0) {
            return invalid("calibration.rms_threshold", "must be positive");
        }
        if k.max_attempts == 0 {
            return invalid("calibration.max_attempts", "must be at least 1");
        }
        if k.pair_count == 0 {
            return invalid("calibration.pair_count", "must be at least 1");
        }
        if k.pattern_cols < 2 || k.pattern_rows < 2 {
            return invalid("calibration.pattern_cols", "pattern needs at least 2x2 inner corners");
        }
        if !(k.square_size_m > 0.0) {
            return invalid("calibration.square_size_m", "must be positive");
        }

        if self.controller.max_detection_failures == 0 {
            return invalid("controller.max_detection_failures", "must be at least 1");
        }

        Ok(())
    }

    /// Targeting loop configuration.
    pub fn targeting_config(&self) -> TargetingConfig {
        TargetingConfig::default()
            .with_score_threshold(self.detection.score_min_detection)
            .with_pair_max_gate(self.detection.pair_max_dist_px)
            .with_shoot_duration(Duration::from_secs_f64(self.laser.shoot_duration_s))
            .with_max_angle(self.laser.max_angle_deg)
            .with_settle(Duration::from_millis(self.laser.settle_ms))
            .with_backoff(Duration::from_millis(self.laser.backoff_ms))
            .with_safe_zone_padding(self.security.safe_zone_padding_fraction)
            .with_max_detection_failures(self.controller.max_detection_failures)
    }

    /// Acceptance loop configuration, writing to `artifact_path`.
    pub fn acceptance_config(&self, artifact_path: impl Into<PathBuf>) -> AcceptanceConfig {
        let k = &self.calibration;
        AcceptanceConfig::default()
            .with_pair_count(k.pair_count)
            .with_rms_threshold(k.rms_threshold)
            .with_max_attempts(k.max_attempts)
            .with_pattern(
                PatternSpec {
                    cols: k.pattern_cols,
                    rows: k.pattern_rows,
                },
                k.square_size_m,
            )
            .with_capture_interval(Duration::from_millis(k.capture_interval_ms))
            .with_capture_root(k.capture_root.clone())
            .with_artifact_path(artifact_path)
    }

    /// Detection feed configuration.
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig::default().with_frame_rate(self.camera.frame_rate_hz as f64)
    }

    /// Calibration model: the persisted artifact if there is one, otherwise
    /// datasheet intrinsics for the configured camera.
    pub fn calibration_model(&self) -> Result<(CalibrationModel, CalibrationSource), ConfigError> {
        if let Some(path) = &self.optics.calibration_path {
            if path.exists() {
                let model = CalibrationArtifact::load(path)?.model()?;
                return Ok((model, CalibrationSource::Artifact(path.clone())));
            }
            tracing::warn!(
                path = %path.display(),
                "Calibration artifact missing, falling back to datasheet intrinsics"
            );
        }

        let model = CalibrationModel::from_lens(
            self.camera.image_width,
            self.camera.image_height,
            self.optics.baseline_m,
            self.optics.vertical_offset_m,
            self.optics.focal_length_mm,
            self.optics.pixel_size_mm,
        )?;
        Ok((model, CalibrationSource::Datasheet))
    }
}
