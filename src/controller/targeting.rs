//! Targeting control loop.
//!
//! One cycle walks `Acquire -> Pair -> Aim -> Fire -> Cooldown`. Misses
//! (nothing detected, no pair, outside the safe zone, degenerate geometry)
//! end the cycle early and the loop backs off before the next one. Actuator
//! failures end the loop. Every exit path runs the shutdown sequence.

use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use super::state::{CycleOutcome, Side, TargetingState, TargetingStats};
use super::stop::StopSignal;
use crate::actuator::{safe_shutdown, Actuator, ActuatorError, AimCommand, LaserGuard};
use crate::detection::{Detection, DetectionError, DetectionPairer, Detector};
use crate::geometry::{SafetyZoneFilter, TriangulationEngine, TriangulationError};
use crate::rig::{RigBusy, RigLease};

/// Fatal controller errors.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Actuator failure: {0}")]
    Actuator(#[from] ActuatorError),
    #[error("Detection unavailable after {failures} consecutive failures: {source}")]
    DetectionUnavailable {
        failures: u32,
        #[source]
        source: DetectionError,
    },
    #[error(transparent)]
    RigBusy(#[from] RigBusy),
    #[error("Targeting thread panicked")]
    Panicked,
}

/// Targeting loop configuration.
#[derive(Debug, Clone)]
pub struct TargetingConfig {
    /// Minimum detection score.
    pub score_threshold: f64,
    /// Pairing gate on the vertical offset (pixels).
    pub pair_max_gate_px: f64,
    /// Laser on-time per shot.
    pub shoot_duration: Duration,
    /// Mechanical range of the mirror (degrees).
    pub max_angle_deg: f64,
    /// Wait between `set_angles` and `laser_on`.
    pub settle: Duration,
    /// Wait after a missed cycle.
    pub backoff: Duration,
    /// Fraction of each frame dimension excluded at the border.
    pub safe_zone_padding: f64,
    /// Consecutive detector failures tolerated before giving up.
    pub max_detection_failures: u32,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            pair_max_gate_px: 40.0,
            shoot_duration: Duration::from_millis(500),
            max_angle_deg: 20.0,
            settle: Duration::from_millis(50),
            backoff: Duration::from_millis(50),
            safe_zone_padding: 0.2,
            max_detection_failures: 20,
        }
    }
}

impl TargetingConfig {
    /// Set the minimum detection score.
    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Set the pairing gate.
    pub fn with_pair_max_gate(mut self, px: f64) -> Self {
        self.pair_max_gate_px = px;
        self
    }

    /// Set the shot duration.
    pub fn with_shoot_duration(mut self, duration: Duration) -> Self {
        self.shoot_duration = duration;
        self
    }

    /// Set the mirror range.
    pub fn with_max_angle(mut self, deg: f64) -> Self {
        self.max_angle_deg = deg;
        self
    }

    /// Set the settle time.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the backoff after a miss.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the safe zone padding.
    pub fn with_safe_zone_padding(mut self, fraction: f64) -> Self {
        self.safe_zone_padding = fraction;
        self
    }

    /// Set the detector failure limit.
    pub fn with_max_detection_failures(mut self, failures: u32) -> Self {
        self.max_detection_failures = failures;
        self
    }
}

/// Drives two detectors and one actuator through the targeting cycle.
///
/// The controller is the only owner of the actuator for its whole life and
/// holds the rig lease until it shuts down.
///
/// # Example
/// ```rust,no_run
/// use stereo_targeting::actuator::DryRunActuator;
/// use stereo_targeting::controller::{TargetingConfig, TargetingController};
/// use stereo_targeting::detection::Detector;
/// use stereo_targeting::geometry::{SharedCalibration, TriangulationEngine};
/// use stereo_targeting::rig::{RigLock, RigMode};
///
/// fn start(left: Box<dyn Detector>, right: Box<dyn Detector>) -> anyhow::Result<()> {
///     let rig = RigLock::new();
///     let engine = TriangulationEngine::new(SharedCalibration::new());
///     let controller = TargetingController::new(
///         TargetingConfig::default(),
///         engine,
///         left,
///         right,
///         DryRunActuator::new(),
///         rig.try_acquire(RigMode::Targeting)?,
///     );
///     let handle = controller.spawn();
///     handle.stop();
///     handle.join()?;
///     Ok(())
/// }
/// ```
pub struct TargetingController<A: Actuator> {
    config: TargetingConfig,
    engine: TriangulationEngine,
    pairer: DetectionPairer,
    safe_zone: SafetyZoneFilter,
    left: Box<dyn Detector>,
    right: Box<dyn Detector>,
    actuator: A,
    stop: StopSignal,
    state: TargetingState,
    stats: TargetingStats,
    /// Consecutive failures per side, indexed by [`Side::index`].
    consecutive_failures: [u32; 2],
    shut_down: bool,
    lease: Option<RigLease>,
}

impl<A: Actuator> TargetingController<A> {
    /// Create a controller in the `Idle` state.
    pub fn new(
        config: TargetingConfig,
        engine: TriangulationEngine,
        left: Box<dyn Detector>,
        right: Box<dyn Detector>,
        actuator: A,
        lease: RigLease,
    ) -> Self {
        Self {
            pairer: DetectionPairer::new(config.pair_max_gate_px),
            safe_zone: SafetyZoneFilter::new(config.safe_zone_padding),
            config,
            engine,
            left,
            right,
            actuator,
            stop: StopSignal::new(),
            state: TargetingState::Idle,
            stats: TargetingStats::default(),
            consecutive_failures: [0; 2],
            shut_down: false,
            lease: Some(lease),
        }
    }

    /// Use an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Signal that stops the loop at its next wait point.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> TargetingState {
        self.state
    }

    pub fn stats(&self) -> TargetingStats {
        self.stats
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Run cycles until stopped or a fatal error occurs, then shut down.
    pub fn run(&mut self) -> Result<TargetingStats, ControllerError> {
        tracing::info!("Targeting loop started");
        let result = self.run_loop();
        let shutdown = self.shutdown();

        match result {
            Ok(()) => {
                shutdown?;
                tracing::info!(stats = ?self.stats, "Targeting loop finished");
                Ok(self.stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "Targeting loop failed");
                Err(e)
            }
        }
    }

    /// Move the loop to a dedicated thread.
    pub fn spawn(mut self) -> TargetingHandle
    where
        A: 'static,
    {
        let stop = self.stop.clone();
        let thread = std::thread::spawn(move || self.run());
        TargetingHandle { stop, thread }
    }

    fn run_loop(&mut self) -> Result<(), ControllerError> {
        if self.shut_down {
            return Ok(());
        }

        // Safe start: mirror centred before anything is fired.
        AimCommand::neutral().apply(&mut self.actuator)?;

        while !self.stop.is_stopped() {
            let outcome = self.run_cycle()?;
            self.stats.record(&outcome);
            log_outcome(&outcome);

            if let CycleOutcome::Cancelled(_) = outcome {
                break;
            }
            if outcome.needs_backoff() && !self.stop.wait(self.config.backoff) {
                break;
            }
        }
        Ok(())
    }

    /// Run one full cycle.
    ///
    /// Misses come back as `Ok(outcome)`; only fatal conditions are errors.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, ControllerError> {
        if self.shut_down {
            return Ok(CycleOutcome::Cancelled(TargetingState::Shutdown));
        }

        self.transition(TargetingState::Acquire);
        let left = match self.poll(Side::Left)? {
            Ok(detections) if detections.is_empty() => {
                return Ok(CycleOutcome::NoDetections(Side::Left))
            }
            Ok(detections) => detections,
            Err(outcome) => return Ok(outcome),
        };

        self.transition(TargetingState::Pair);
        let right = match self.poll(Side::Right)? {
            Ok(detections) if detections.is_empty() => {
                return Ok(CycleOutcome::NoDetections(Side::Right))
            }
            Ok(detections) => detections,
            Err(outcome) => return Ok(outcome),
        };

        let Some(pair) = self.pairer.find_best_pair(&left, &right) else {
            return Ok(CycleOutcome::NoPair);
        };

        // One snapshot per cycle, so a recalibration cannot land between the
        // safe zone check and triangulation.
        let Some(model) = self.engine.model() else {
            return Ok(CycleOutcome::TriangulationFailed(
                TriangulationError::CalibrationMissing,
            ));
        };
        let frame = model.frame();
        if !self.safe_zone.is_inside(pair.left.center, frame) {
            return Ok(CycleOutcome::OutsideSafeZone(Side::Left));
        }
        if !self.safe_zone.is_inside(pair.right.center, frame) {
            return Ok(CycleOutcome::OutsideSafeZone(Side::Right));
        }

        self.transition(TargetingState::Aim);
        let solution = match self.engine.compute_angles_with(
            &model,
            pair.left.x(),
            pair.left.y(),
            pair.right.x(),
            pair.right.y(),
        ) {
            Ok(solution) => solution,
            Err(e) => return Ok(CycleOutcome::TriangulationFailed(e)),
        };

        let cmd = AimCommand::new(solution.yaw_deg, solution.pitch_deg, self.config.max_angle_deg);
        if cmd.clamped {
            tracing::warn!(
                yaw = solution.yaw_deg,
                pitch = solution.pitch_deg,
                max = self.config.max_angle_deg,
                "Aim clamped to mirror range"
            );
        }
        cmd.apply(&mut self.actuator)?;
        if !self.stop.wait(self.config.settle) {
            return Ok(CycleOutcome::Cancelled(TargetingState::Aim));
        }

        self.transition(TargetingState::Fire);
        tracing::info!(
            yaw = cmd.yaw_deg,
            pitch = cmd.pitch_deg,
            distance_m = solution.distance_m,
            label = %pair.left.label,
            "Firing"
        );
        let guard = LaserGuard::fire(&mut self.actuator)?;
        let completed = self.stop.wait(self.config.shoot_duration);
        guard.extinguish()?;
        if !completed {
            return Ok(CycleOutcome::Cancelled(TargetingState::Fire));
        }

        self.transition(TargetingState::Cooldown);
        if !self.stop.wait(self.config.shoot_duration * 2) {
            return Ok(CycleOutcome::Cancelled(TargetingState::Cooldown));
        }

        Ok(CycleOutcome::Fired(solution))
    }

    /// Laser off, mirror centred, actuator and detectors released.
    ///
    /// Safe to call from any state and more than once; only the first call
    /// does anything.
    pub fn shutdown(&mut self) -> Result<(), ActuatorError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.transition(TargetingState::Shutdown);

        let result = safe_shutdown(&mut self.actuator);
        self.left.stop();
        self.right.stop();
        self.lease.take();

        tracing::info!("Targeting controller shut down");
        result
    }

    /// Poll one detector. A failure below the limit becomes a cycle outcome.
    fn poll(&mut self, side: Side) -> Result<Result<Vec<Detection>, CycleOutcome>, ControllerError> {
        let detector = match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        };

        let result = detector.get_detections(self.config.score_threshold);
        let failures = &mut self.consecutive_failures[side.index()];

        match result {
            Ok(detections) => {
                *failures = 0;
                Ok(Ok(detections))
            }
            Err(e) => {
                *failures += 1;
                if *failures >= self.config.max_detection_failures {
                    return Err(ControllerError::DetectionUnavailable {
                        failures: *failures,
                        source: e,
                    });
                }
                Ok(Err(CycleOutcome::DetectorFailed(side, e)))
            }
        }
    }

    fn transition(&mut self, next: TargetingState) {
        if self.state != next {
            tracing::trace!(from = %self.state, to = %next, "State change");
            self.state = next;
        }
    }
}

impl<A: Actuator> Drop for TargetingController<A> {
    fn drop(&mut self) {
        if !self.shut_down {
            // Errors are already logged by the shutdown sequence.
            let _ = self.shutdown();
        }
    }
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Fired(s) => {
            tracing::info!(distance_m = s.distance_m, "Shot complete");
        }
        CycleOutcome::NoDetections(side) => tracing::debug!(%side, "No detections"),
        CycleOutcome::DetectorFailed(side, e) => {
            tracing::warn!(%side, error = %e, "Detector failed");
        }
        CycleOutcome::NoPair => tracing::debug!("No pair"),
        CycleOutcome::OutsideSafeZone(side) => {
            tracing::debug!(%side, "Target outside safe zone");
        }
        CycleOutcome::TriangulationFailed(e) => {
            tracing::warn!(error = %e, "Triangulation failed");
        }
        CycleOutcome::Cancelled(state) => tracing::info!(%state, "Stop requested"),
    }
}

/// Handle to a controller running on its own thread.
pub struct TargetingHandle {
    stop: StopSignal,
    thread: JoinHandle<Result<TargetingStats, ControllerError>>,
}

impl TargetingHandle {
    /// Ask the loop to stop; it shuts down within one wait tick.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Check if the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to exit.
    pub fn join(self) -> Result<TargetingStats, ControllerError> {
        self.thread.join().unwrap_or(Err(ControllerError::Panicked))
    }
}
