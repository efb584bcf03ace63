// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Stereo Targeting
//!
//! Stereo-camera laser targeting rig.
//!
//! Two cameras detect the same object, the detections are paired across the
//! views, triangulated into a 3D point and turned into mirror angles for a
//! galvanometer-steered laser. A safety zone keeps the laser away from the
//! edges of the field of view, and a calibration acceptance loop produces the
//! stereo model everything else depends on.
//!
//! Camera drivers, the object detector and the galvo hardware are external:
//! they plug in through the [`Detector`], [`CaptureSource`],
//! [`CalibrationSolver`] and [`Actuator`] traits.
//!
//! ## Targeting Example
//!
//! ```rust,no_run
//! use stereo_targeting::{
//!     Detector, DryRunActuator, RigLock, RigMode, Settings, SharedCalibration,
//!     TargetingController, TriangulationEngine,
//! };
//!
//! fn run(left: Box<dyn Detector>, right: Box<dyn Detector>) -> anyhow::Result<()> {
//!     let settings = Settings::default();
//!     let (model, _) = settings.calibration_model()?;
//!
//!     let engine = TriangulationEngine::new(SharedCalibration::with_model(model))
//!         .with_min_disparity(settings.optics.min_disparity_px);
//!     let rig = RigLock::new();
//!     let lease = rig.try_acquire(RigMode::Targeting)?;
//!
//!     let controller = TargetingController::new(
//!         settings.targeting_config(),
//!         engine,
//!         left,
//!         right,
//!         DryRunActuator::new(),
//!         lease,
//!     );
//!     let handle = controller.spawn();
//!
//!     // ... later
//!     handle.stop();
//!     let stats = handle.join()?;
//!     println!("Shots fired: {}", stats.shots);
//!     Ok(())
//! }
//! ```

pub mod actuator;
pub mod calibration;
pub mod controller;
pub mod detection;
pub mod geometry;
mod persist;
pub mod rig;
pub mod settings;

pub use actuator::{
    compute_max_angle_deg, run_alignment_pattern, safe_shutdown, Actuator, ActuatorError,
    AimCommand, AlignmentConfig, DryRunActuator, LaserGuard,
};

pub use calibration::{
    AcceptanceConfig, CalibrationAcceptanceLoop, CalibrationArtifact, CalibrationAttemptResult,
    CalibrationError, CalibrationSolver, CaptureSource, FramePair, PatternSpec,
};

pub use controller::{
    ControllerError, CycleOutcome, StopSignal, TargetingConfig, TargetingController,
    TargetingHandle, TargetingState, TargetingStats,
};

pub use detection::{
    find_best_pair, Detection, DetectionError, DetectionFeed, DetectionPair, DetectionPairer,
    Detector, FeedConfig, LockedDetector,
};

pub use geometry::{
    AimSolution, CalibrationModel, Frame, SafeZoneRect, SafetyZoneFilter, SharedCalibration,
    TriangulationEngine, TriangulationError,
};

pub use rig::{RigBusy, RigLease, RigLock, RigMode};
pub use settings::{ConfigError, Settings};
