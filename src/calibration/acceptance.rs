//! Capture, solve, validate: repeated until the reprojection error is good
//! enough or the attempt budget runs out.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::artifact::{ArtifactError, CalibrationArtifact};
use super::collaborators::{
    CalibrationSolver, CaptureError, CaptureSource, FramePair, PatternSpec,
};
use crate::controller::StopSignal;
use crate::geometry::{CalibrationModel, SharedCalibration};
use crate::rig::{RigBusy, RigLease, RigMode};

/// Acceptance loop errors.
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration failed after {attempts} attempts (best rms: {best_rms:?})")]
    Failed { attempts: u32, best_rms: Option<f64> },
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("Failed to prepare capture directory {path}: {source}")]
    CaptureDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to save capture {path}: {source}")]
    SaveFrame {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Calibration cancelled during attempt {0}")]
    Cancelled(u32),
    #[error(transparent)]
    RigBusy(#[from] RigBusy),
}

/// Configuration for the acceptance loop.
#[derive(Debug, Clone)]
pub struct AcceptanceConfig {
    /// Frame pairs captured per attempt.
    pub target_pair_count: usize,
    /// Largest accepted RMS reprojection error (pixels).
    pub rms_threshold: f64,
    pub max_attempts: u32,
    pub pattern: PatternSpec,
    /// Chessboard square edge (metres).
    pub square_size_m: f64,
    /// Pause between two captures, so the board can be moved.
    pub capture_interval: Duration,
    /// Where captured frames are kept. `None` keeps them in memory only.
    pub capture_root: Option<PathBuf>,
    /// Where the accepted model is written.
    pub artifact_path: PathBuf,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            target_pair_count: 120,
            rms_threshold: 0.8,
            max_attempts: 10,
            pattern: PatternSpec::default(),
            square_size_m: 0.025,
            capture_interval: Duration::from_millis(200),
            capture_root: None,
            artifact_path: PathBuf::from("calibration.json"),
        }
    }
}

impl AcceptanceConfig {
    pub fn with_pair_count(mut self, count: usize) -> Self {
        self.target_pair_count = count;
        self
    }

    pub fn with_rms_threshold(mut self, threshold: f64) -> Self {
        self.rms_threshold = threshold;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_pattern(mut self, pattern: PatternSpec, square_size_m: f64) -> Self {
        self.pattern = pattern;
        self.square_size_m = square_size_m;
        self
    }

    pub fn with_capture_interval(mut self, interval: Duration) -> Self {
        self.capture_interval = interval;
        self
    }

    pub fn with_capture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.capture_root = Some(root.into());
        self
    }

    pub fn with_artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = path.into();
        self
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationAttemptResult {
    pub attempt: u32,
    /// `None` when the solver produced no result.
    pub rms_error: Option<f64>,
    pub accepted: bool,
    /// Only kept for the accepted attempt.
    pub model: Option<CalibrationModel>,
    pub capture_dir: Option<PathBuf>,
    /// Why the attempt was rejected.
    pub rejection: Option<String>,
}

/// Runs capture/solve/validate rounds until a model is accepted.
pub struct CalibrationAcceptanceLoop {
    config: AcceptanceConfig,
    stop: StopSignal,
    publish_to: Option<SharedCalibration>,
    attempts: Vec<CalibrationAttemptResult>,
}

impl CalibrationAcceptanceLoop {
    pub fn new(config: AcceptanceConfig) -> Self {
        Self {
            config,
            stop: StopSignal::new(),
            publish_to: None,
            attempts: Vec::new(),
        }
    }

    /// Use an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Swap the accepted model into `shared` once it is persisted.
    pub fn publish_to(mut self, shared: SharedCalibration) -> Self {
        self.publish_to = Some(shared);
        self
    }

    pub fn config(&self) -> &AcceptanceConfig {
        &self.config
    }

    /// Attempts of the last run, oldest first.
    pub fn attempts(&self) -> &[CalibrationAttemptResult] {
        &self.attempts
    }

    /// Capture and solve until `rms_error <= rms_threshold`.
    ///
    /// Each attempt starts from a fresh capture set. Solver failures count as
    /// rejected attempts; capture failures end the run. The accepted model is
    /// persisted atomically before it is returned.
    pub fn run_until_accepted<C, S>(
        &mut self,
        lease: &RigLease,
        capture: &mut C,
        solver: &mut S,
    ) -> Result<CalibrationModel, CalibrationError>
    where
        C: CaptureSource + ?Sized,
        S: CalibrationSolver + ?Sized,
    {
        if lease.mode() != RigMode::Calibration {
            return Err(RigBusy {
                held: lease.mode(),
                requested: RigMode::Calibration,
            }
            .into());
        }
        self.attempts.clear();
        tracing::info!(
            rig = %lease.mode(),
            pairs = self.config.target_pair_count,
            rms_threshold = self.config.rms_threshold,
            max_attempts = self.config.max_attempts,
            "Calibration started"
        );

        for attempt in 1..=self.config.max_attempts {
            if self.stop.is_stopped() {
                return Err(CalibrationError::Cancelled(attempt));
            }

            let capture_dir = match &self.config.capture_root {
                Some(root) => Some(unique_capture_dir(root).map_err(|source| {
                    CalibrationError::CaptureDir {
                        path: root.clone(),
                        source,
                    }
                })?),
                None => None,
            };

            let pairs = self.capture_set(attempt, capture, capture_dir.as_deref())?;
            let mut result = CalibrationAttemptResult {
                attempt,
                rms_error: None,
                accepted: false,
                model: None,
                capture_dir,
                rejection: None,
            };

            match solver.calibrate(&pairs, self.config.pattern, self.config.square_size_m) {
                Ok(output) if output.rms_error <= self.config.rms_threshold => {
                    let artifact = CalibrationArtifact::new(
                        &output.model,
                        output.rms_error,
                        result.capture_dir.clone(),
                        self.config.pattern,
                        self.config.square_size_m,
                        attempt,
                    );
                    artifact.save(&self.config.artifact_path)?;
                    if let Some(shared) = &self.publish_to {
                        shared.swap(output.model);
                    }

                    tracing::info!(attempt, rms = output.rms_error, "Calibration accepted");
                    result.rms_error = Some(output.rms_error);
                    result.accepted = true;
                    result.model = Some(output.model);
                    self.attempts.push(result);
                    return Ok(output.model);
                }
                Ok(output) => {
                    tracing::warn!(
                        attempt,
                        rms = output.rms_error,
                        threshold = self.config.rms_threshold,
                        "Calibration rejected, retrying"
                    );
                    result.rms_error = Some(output.rms_error);
                    result.rejection = Some(format!(
                        "rms {} above threshold {}",
                        output.rms_error, self.config.rms_threshold
                    ));
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Calibration solve failed, retrying");
                    result.rejection = Some(e.to_string());
                }
            }
            self.attempts.push(result);
        }

        let best_rms = self
            .attempts
            .iter()
            .filter_map(|a| a.rms_error)
            .filter(|rms| !rms.is_nan())
            .reduce(f64::min);
        tracing::error!(attempts = self.config.max_attempts, ?best_rms, "Calibration failed");
        Err(CalibrationError::Failed {
            attempts: self.config.max_attempts,
            best_rms,
        })
    }

    fn capture_set<C: CaptureSource + ?Sized>(
        &self,
        attempt: u32,
        capture: &mut C,
        dir: Option<&Path>,
    ) -> Result<Vec<FramePair>, CalibrationError> {
        let count = self.config.target_pair_count;
        let mut pairs = Vec::with_capacity(count);

        for index in 0..count {
            if index > 0 && !self.stop.wait(self.config.capture_interval) {
                return Err(CalibrationError::Cancelled(attempt));
            }

            let pair = capture.capture_pair()?;
            if let Some(first) = pairs.first().map(FramePair::frame) {
                if first != pair.frame() {
                    return Err(CaptureError::MismatchedFrames {
                        left: first,
                        right: pair.frame(),
                    }
                    .into());
                }
            }
            if let Some(dir) = dir {
                save_pair(dir, index, &pair)?;
            }
            pairs.push(pair);
            tracing::debug!(attempt, captured = index + 1, total = count, "Pair captured");
        }
        Ok(pairs)
    }
}

/// Create a fresh directory: `root` itself, else `root1`, `root2`, ...
pub fn unique_capture_dir(root: &Path) -> io::Result<PathBuf> {
    if let Some(parent) = root.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut candidate = root.to_path_buf();
    let mut suffix = 0u32;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                suffix += 1;
                let mut name = root.as_os_str().to_os_string();
                name.push(suffix.to_string());
                candidate = PathBuf::from(name);
            }
            Err(e) => return Err(e),
        }
    }
}

fn save_pair(dir: &Path, index: usize, pair: &FramePair) -> Result<(), CalibrationError> {
    for (side, image) in [("left", &pair.left), ("right", &pair.right)] {
        let path = dir.join(format!("{side}_{index:03}.png"));
        image
            .save(&path)
            .map_err(|source| CalibrationError::SaveFrame { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{SolverError, SolverOutput};
    use crate::rig::RigLock;
    use image::RgbImage;
    use std::collections::VecDeque;

    struct BlankCapture {
        captured: usize,
        fail_after: Option<usize>,
    }

    impl BlankCapture {
        fn new() -> Self {
            Self {
                captured: 0,
                fail_after: None,
            }
        }
    }

    impl CaptureSource for BlankCapture {
        fn capture_pair(&mut self) -> Result<FramePair, CaptureError> {
            if self.fail_after.is_some_and(|n| self.captured >= n) {
                return Err(CaptureError::Device("camera unplugged".into()));
            }
            self.captured += 1;
            FramePair::new(RgbImage::new(8, 6), RgbImage::new(8, 6))
        }
    }

    /// Replays a fixed list of solver results.
    struct ScriptedSolver {
        results: VecDeque<Result<f64, SolverError>>,
        calls: Vec<usize>,
    }

    impl ScriptedSolver {
        fn new(results: Vec<Result<f64, SolverError>>) -> Self {
            Self {
                results: results.into(),
                calls: Vec::new(),
            }
        }
    }

    impl CalibrationSolver for ScriptedSolver {
        fn calibrate(
            &mut self,
            pairs: &[FramePair],
            _pattern: PatternSpec,
            _square_size_m: f64,
        ) -> Result<SolverOutput, SolverError> {
            self.calls.push(pairs.len());
            let rms = self
                .results
                .pop_front()
                .unwrap_or(Err(SolverError::Failed("script exhausted".into())))?;
            Ok(SolverOutput {
                rms_error: rms,
                model: CalibrationModel::new(1500.0, 1500.0, 4.0, 3.0, 0.1, 0.0, 8, 6).unwrap(),
            })
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("st_accept_{}_{}", std::process::id(), name))
    }

    fn config(name: &str) -> AcceptanceConfig {
        AcceptanceConfig::default()
            .with_pair_count(3)
            .with_rms_threshold(0.8)
            .with_max_attempts(3)
            .with_capture_interval(Duration::ZERO)
            .with_artifact_path(temp_path(name).join("calibration.json"))
    }

    fn lease(rig: &RigLock) -> RigLease {
        rig.try_acquire(RigMode::Calibration).unwrap()
    }

    #[test]
    fn test_accepts_good_rms_and_persists() {
        let config = config("accept");
        let artifact_path = config.artifact_path.clone();
        let shared = SharedCalibration::new();
        let mut acceptance = CalibrationAcceptanceLoop::new(config).publish_to(shared.clone());
        let mut solver = ScriptedSolver::new(vec![Ok(0.5)]);
        let rig = RigLock::new();

        let model = acceptance
            .run_until_accepted(&lease(&rig), &mut BlankCapture::new(), &mut solver)
            .unwrap();

        assert_eq!(acceptance.attempts().len(), 1);
        assert!(acceptance.attempts()[0].accepted);
        assert_eq!(solver.calls, vec![3]);

        let artifact = CalibrationArtifact::load(&artifact_path).unwrap();
        assert_eq!(artifact.rms_error, 0.5);
        assert_eq!(artifact.model().unwrap(), model);
        assert_eq!(*shared.load().unwrap(), model);

        let _ = fs::remove_dir_all(temp_path("accept"));
    }

    #[test]
    fn test_rejects_targeting_lease() {
        let mut acceptance = CalibrationAcceptanceLoop::new(config("lease"));
        let mut capture = BlankCapture::new();
        let mut solver = ScriptedSolver::new(vec![Ok(0.5)]);
        let rig = RigLock::new();
        let lease = rig.try_acquire(RigMode::Targeting).unwrap();

        let err = acceptance
            .run_until_accepted(&lease, &mut capture, &mut solver)
            .unwrap_err();

        assert!(matches!(
            err,
            CalibrationError::RigBusy(RigBusy {
                held: RigMode::Targeting,
                requested: RigMode::Calibration,
            })
        ));
        assert_eq!(capture.captured, 0);
        assert!(solver.calls.is_empty());
        assert!(acceptance.attempts().is_empty());
    }

    #[test]
    fn test_rejects_high_rms_then_retries() {
        let config = config("retry");
        let artifact_path = config.artifact_path.clone();
        let mut acceptance = CalibrationAcceptanceLoop::new(config);
        let mut capture = BlankCapture::new();
        let mut solver = ScriptedSolver::new(vec![Ok(1.2), Ok(0.5)]);
        let rig = RigLock::new();

        acceptance
            .run_until_accepted(&lease(&rig), &mut capture, &mut solver)
            .unwrap();

        let attempts = acceptance.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].accepted);
        assert_eq!(attempts[0].rms_error, Some(1.2));
        assert!(attempts[0].model.is_none());
        assert!(attempts[1].accepted);
        // A fresh capture set per attempt.
        assert_eq!(capture.captured, 6);
        assert_eq!(CalibrationArtifact::load(&artifact_path).unwrap().attempt, 2);

        let _ = fs::remove_dir_all(temp_path("retry"));
    }

    #[test]
    fn test_fails_after_max_attempts() {
        let config = config("fail");
        let artifact_path = config.artifact_path.clone();
        let mut acceptance = CalibrationAcceptanceLoop::new(config);
        let mut solver = ScriptedSolver::new(vec![Ok(1.2), Ok(1.2), Ok(1.2), Ok(0.5)]);
        let rig = RigLock::new();

        let err = acceptance
            .run_until_accepted(&lease(&rig), &mut BlankCapture::new(), &mut solver)
            .unwrap_err();

        match err {
            CalibrationError::Failed { attempts, best_rms } => {
                assert_eq!(attempts, 3);
                assert_eq!(best_rms, Some(1.2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(solver.calls.len(), 3);
        assert!(!artifact_path.exists());
    }

    #[test]
    fn test_solver_failure_counts_as_rejection() {
        let config = config("solver");
        let mut acceptance = CalibrationAcceptanceLoop::new(config);
        let mut solver = ScriptedSolver::new(vec![
            Err(SolverError::InsufficientPatternDetections {
                found: 2,
                required: 10,
            }),
            Ok(f64::NAN),
            Ok(0.8),
        ]);
        let rig = RigLock::new();

        acceptance
            .run_until_accepted(&lease(&rig), &mut BlankCapture::new(), &mut solver)
            .unwrap();

        let attempts = acceptance.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts[0].rms_error.is_none());
        assert!(attempts[0].rejection.as_deref().unwrap().contains("at least 10"));
        assert!(!attempts[1].accepted);
        assert!(attempts[2].accepted);

        let _ = fs::remove_dir_all(temp_path("solver"));
    }

    #[test]
    fn test_capture_failure_is_fatal() {
        let mut acceptance = CalibrationAcceptanceLoop::new(config("capture"));
        let mut capture = BlankCapture {
            captured: 0,
            fail_after: Some(4),
        };
        let mut solver = ScriptedSolver::new(vec![Ok(1.2), Ok(0.5)]);
        let rig = RigLock::new();

        let err = acceptance
            .run_until_accepted(&lease(&rig), &mut capture, &mut solver)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Capture(CaptureError::Device(_))));
        assert_eq!(solver.calls.len(), 1);
    }

    #[test]
    fn test_cancelled_before_capture() {
        let stop = StopSignal::new();
        stop.stop();
        let mut acceptance = CalibrationAcceptanceLoop::new(config("cancel")).with_stop_signal(stop);
        let mut capture = BlankCapture::new();
        let rig = RigLock::new();

        let err = acceptance
            .run_until_accepted(&lease(&rig), &mut capture, &mut ScriptedSolver::new(vec![]))
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Cancelled(1)));
        assert_eq!(capture.captured, 0);
    }

    #[test]
    fn test_capture_provenance_in_unique_dirs() {
        let root_base = temp_path("frames");
        let root = root_base.join("photos_calibration");
        let config = config("frames").with_capture_root(&root).with_pair_count(2);
        let mut acceptance = CalibrationAcceptanceLoop::new(config);
        let mut solver = ScriptedSolver::new(vec![Ok(1.5), Ok(0.3)]);
        let rig = RigLock::new();

        acceptance
            .run_until_accepted(&lease(&rig), &mut BlankCapture::new(), &mut solver)
            .unwrap();

        let first = root.clone();
        let second = root_base.join("photos_calibration1");
        assert_eq!(acceptance.attempts()[0].capture_dir.as_ref(), Some(&first));
        assert_eq!(acceptance.attempts()[1].capture_dir.as_ref(), Some(&second));
        for dir in [&first, &second] {
            for name in ["left_000.png", "right_000.png", "left_001.png", "right_001.png"] {
                assert!(dir.join(name).exists(), "missing {}", dir.join(name).display());
            }
        }

        let artifact = CalibrationArtifact::load(&acceptance.config().artifact_path).unwrap();
        assert_eq!(artifact.capture_dir, Some(second));

        let _ = fs::remove_dir_all(&root_base);
    }

    #[test]
    fn test_unique_capture_dir_suffixes() {
        let base = temp_path("unique");
        let root = base.join("shots");
        assert_eq!(unique_capture_dir(&root).unwrap(), root);
        assert_eq!(unique_capture_dir(&root).unwrap(), base.join("shots1"));
        assert_eq!(unique_capture_dir(&root).unwrap(), base.join("shots2"));
        let _ = fs::remove_dir_all(&base);
    }
}
