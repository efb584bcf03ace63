//! Controller states, per-cycle outcomes and run statistics.

use std::fmt;

use serde::Serialize;

use crate::detection::DetectionError;
use crate::geometry::{AimSolution, TriangulationError};

/// Targeting state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetingState {
    Idle,
    Acquire,
    Pair,
    Aim,
    Fire,
    Cooldown,
    Shutdown,
}

impl fmt::Display for TargetingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Acquire => "acquire",
            Self::Pair => "pair",
            Self::Aim => "aim",
            Self::Fire => "fire",
            Self::Cooldown => "cooldown",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Which camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Result of one control cycle.
///
/// Every variant is recoverable. Fatal conditions are reported through
/// [`super::ControllerError`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Target hit: laser fired and cooldown completed.
    Fired(AimSolution),
    /// A detector returned nothing above threshold.
    NoDetections(Side),
    /// A detector call failed; below the consecutive-failure limit.
    DetectorFailed(Side, DetectionError),
    /// No left/right pair passed the gate.
    NoPair,
    /// The paired detection lies outside the safe zone on this side.
    OutsideSafeZone(Side),
    /// Triangulation was degenerate or no calibration is loaded.
    TriangulationFailed(TriangulationError),
    /// A stop was requested while waiting in this state.
    Cancelled(TargetingState),
}

impl CycleOutcome {
    /// Misses are followed by a short backoff before the next cycle.
    pub fn needs_backoff(&self) -> bool {
        !matches!(self, Self::Fired(_) | Self::Cancelled(_))
    }
}

/// Counters accumulated over a controller run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TargetingStats {
    pub cycles: u64,
    pub shots: u64,
    pub no_detection: u64,
    pub no_pair: u64,
    pub outside_safe_zone: u64,
    pub triangulation_failures: u64,
    pub detection_failures: u64,
}

impl TargetingStats {
    pub(crate) fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Fired(_) => self.shots += 1,
            CycleOutcome::NoDetections(_) => self.no_detection += 1,
            CycleOutcome::DetectorFailed(..) => self.detection_failures += 1,
            CycleOutcome::NoPair => self.no_pair += 1,
            CycleOutcome::OutsideSafeZone(_) => self.outside_safe_zone += 1,
            CycleOutcome::TriangulationFailed(_) => self.triangulation_failures += 1,
            CycleOutcome::Cancelled(_) => {}
        }
    }
}
