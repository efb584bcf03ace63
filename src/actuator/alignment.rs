//! Mechanical range and alignment helpers used during rig setup.

use std::time::Duration;

use super::{safe_shutdown, Actuator, ActuatorError, AimCommand, LaserGuard};
use crate::controller::StopSignal;

/// Largest mirror deflection (degrees) needed to cover a `rect_w_m` by
/// `rect_h_m` rectangle centred on a wall `distance_wall_m` away.
pub fn compute_max_angle_deg(distance_wall_m: f64, rect_w_m: f64, rect_h_m: f64) -> f64 {
    let ax = (rect_w_m / 2.0 / distance_wall_m).atan().to_degrees();
    let ay = (rect_h_m / 2.0 / distance_wall_m).atan().to_degrees();
    ax.max(ay)
}

/// Timing of the alignment pattern.
#[derive(Debug, Clone)]
pub struct AlignmentConfig {
    /// Wait after moving the mirror before lighting the laser.
    pub settle: Duration,
    /// How long the laser stays lit at each point.
    pub pulse: Duration,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(200),
            pulse: Duration::from_millis(200),
        }
    }
}

/// Pulse the laser at the centre, then at `+max` and `-max` yaw, so the
/// operator can check the mirror against the camera view.
///
/// The actuator is always left off, centred and released, also when the
/// pattern is cancelled or fails.
pub fn run_alignment_pattern<A: Actuator + ?Sized>(
    actuator: &mut A,
    max_angle_deg: f64,
    config: &AlignmentConfig,
    stop: &StopSignal,
) -> Result<(), ActuatorError> {
    let result = pulse_points(actuator, max_angle_deg, config, stop);
    let shutdown = safe_shutdown(actuator);
    result.and(shutdown)
}

fn pulse_points<A: Actuator + ?Sized>(
    actuator: &mut A,
    max_angle_deg: f64,
    config: &AlignmentConfig,
    stop: &StopSignal,
) -> Result<(), ActuatorError> {
    let points = [(0.0, 0.0), (max_angle_deg, 0.0), (-max_angle_deg, 0.0)];

    for (yaw, pitch) in points {
        let cmd = AimCommand::new(yaw, pitch, max_angle_deg);
        tracing::info!(yaw = cmd.yaw_deg, pitch = cmd.pitch_deg, "Alignment point");
        cmd.apply(actuator)?;
        if !stop.wait(config.settle) {
            tracing::info!("Alignment cancelled");
            return Ok(());
        }

        let guard = LaserGuard::fire(actuator)?;
        let completed = stop.wait(config.pulse);
        guard.extinguish()?;
        if !completed {
            tracing::info!("Alignment cancelled");
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorCommand, DryRunActuator};

    fn fast() -> AlignmentConfig {
        AlignmentConfig {
            settle: Duration::from_millis(1),
            pulse: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_max_angle_uses_larger_side() {
        let angle = compute_max_angle_deg(2.0, 2.0, 1.0);
        assert!((angle - (1.0f64 / 2.0).atan().to_degrees()).abs() < 1e-12);

        let tall = compute_max_angle_deg(2.0, 1.0, 4.0);
        assert!((tall - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_alignment_pattern_sequence() {
        let mut actuator = DryRunActuator::new();
        run_alignment_pattern(&mut actuator, 15.0, &fast(), &StopSignal::new()).unwrap();

        let yaws: Vec<f64> = actuator
            .commands()
            .iter()
            .filter_map(|c| match c {
                ActuatorCommand::SetAngles { yaw_deg, .. } => Some(*yaw_deg),
                _ => None,
            })
            .collect();
        // Three points, then centring during shutdown.
        assert_eq!(yaws, vec![0.0, 15.0, -15.0, 0.0]);
        assert_eq!(actuator.count(ActuatorCommand::LaserOn), 3);
        assert_eq!(actuator.count(ActuatorCommand::LaserOff), 4);
        assert!(actuator.is_shut_down());
    }

    #[test]
    fn test_alignment_cancelled_still_shuts_down() {
        let stop = StopSignal::new();
        stop.stop();
        let mut actuator = DryRunActuator::new();
        run_alignment_pattern(&mut actuator, 15.0, &fast(), &stop).unwrap();
        assert_eq!(actuator.count(ActuatorCommand::LaserOn), 0);
        assert!(!actuator.is_laser_lit());
        assert!(actuator.is_shut_down());
    }
}
