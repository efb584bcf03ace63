//! Galvanometer/laser actuator seam.

mod alignment;
mod dry_run;
mod guard;

pub use alignment::{compute_max_angle_deg, run_alignment_pattern, AlignmentConfig};
pub use dry_run::{ActuatorCommand, DryRunActuator};
pub use guard::LaserGuard;

use thiserror::Error;

/// Actuator errors. Any of these is fatal to the targeting loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("Actuator unreachable: {0}")]
    Unreachable(String),
    #[error("Actuator rejected {command}: {reason}")]
    Rejected { command: String, reason: String },
}

/// Two-axis mirror plus laser.
///
/// Methods take `&mut self`: one owner drives the actuator at a time and
/// calls never overlap. `laser_off` must be safe to call when the laser is
/// already off.
pub trait Actuator: Send {
    /// Point the beam. Angles in degrees, already clamped by the caller.
    fn set_angles(&mut self, yaw_deg: f64, pitch_deg: f64) -> Result<(), ActuatorError>;
    fn laser_on(&mut self) -> Result<(), ActuatorError>;
    fn laser_off(&mut self) -> Result<(), ActuatorError>;
    /// Release the hardware.
    fn shutdown(&mut self) -> Result<(), ActuatorError>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_angles(&mut self, yaw_deg: f64, pitch_deg: f64) -> Result<(), ActuatorError> {
        (**self).set_angles(yaw_deg, pitch_deg)
    }

    fn laser_on(&mut self) -> Result<(), ActuatorError> {
        (**self).laser_on()
    }

    fn laser_off(&mut self) -> Result<(), ActuatorError> {
        (**self).laser_off()
    }

    fn shutdown(&mut self) -> Result<(), ActuatorError> {
        (**self).shutdown()
    }
}

/// Aim angles clamped to the mechanical range `[-max_angle, +max_angle]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimCommand {
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    /// Whether either axis had to be clamped.
    pub clamped: bool,
}

impl AimCommand {
    /// A non-finite `max_angle_deg` gives a zero range: the mirror stays centred.
    pub fn new(yaw_deg: f64, pitch_deg: f64, max_angle_deg: f64) -> Self {
        let max = if max_angle_deg.is_finite() {
            max_angle_deg.abs()
        } else {
            0.0
        };
        let yaw = yaw_deg.clamp(-max, max);
        let pitch = pitch_deg.clamp(-max, max);
        Self {
            yaw_deg: yaw,
            pitch_deg: pitch,
            clamped: yaw != yaw_deg || pitch != pitch_deg,
        }
    }

    /// Mirror centred.
    pub fn neutral() -> Self {
        Self {
            yaw_deg: 0.0,
            pitch_deg: 0.0,
            clamped: false,
        }
    }

    /// Send the command.
    pub fn apply<A: Actuator + ?Sized>(&self, actuator: &mut A) -> Result<(), ActuatorError> {
        actuator.set_angles(self.yaw_deg, self.pitch_deg)
    }
}

/// Laser off, mirror centred, hardware released.
///
/// Every step runs even if an earlier one fails; the first error is returned.
pub fn safe_shutdown<A: Actuator + ?Sized>(actuator: &mut A) -> Result<(), ActuatorError> {
    let off = actuator.laser_off();
    let neutral = AimCommand::neutral().apply(actuator);
    let release = actuator.shutdown();

    for (step, result) in [("laser_off", &off), ("center", &neutral), ("release", &release)] {
        if let Err(e) = result {
            tracing::error!(step, error = %e, "Actuator shutdown step failed");
        }
    }

    off.and(neutral).and(release)
}
