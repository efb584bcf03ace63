//! Actuator that only logs and records what it is asked to do.

use std::mem::discriminant;

use super::{Actuator, ActuatorError};

/// A command received by a [`DryRunActuator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    SetAngles { yaw_deg: f64, pitch_deg: f64 },
    LaserOn,
    LaserOff,
    Shutdown,
}

/// Stand-in for the galvo hardware, for dry runs and tests.
#[derive(Debug, Default)]
pub struct DryRunActuator {
    commands: Vec<ActuatorCommand>,
    laser_lit: bool,
    shut_down: bool,
    fail_on: Option<ActuatorCommand>,
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every command of the same kind as `command` (arguments ignored).
    pub fn failing_on(mut self, command: ActuatorCommand) -> Self {
        self.fail_on = Some(command);
        self
    }

    /// Everything received so far, in order.
    pub fn commands(&self) -> &[ActuatorCommand] {
        &self.commands
    }

    pub fn count(&self, kind: ActuatorCommand) -> usize {
        self.commands
            .iter()
            .filter(|c| discriminant(*c) == discriminant(&kind))
            .count()
    }

    pub fn is_laser_lit(&self) -> bool {
        self.laser_lit
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn record(&mut self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        self.commands.push(command);
        tracing::debug!(?command, "Dry-run actuator");
        match self.fail_on {
            Some(fail) if discriminant(&fail) == discriminant(&command) => {
                Err(ActuatorError::Rejected {
                    command: format!("{command:?}"),
                    reason: "injected failure".into(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Actuator for DryRunActuator {
    fn set_angles(&mut self, yaw_deg: f64, pitch_deg: f64) -> Result<(), ActuatorError> {
        self.record(ActuatorCommand::SetAngles { yaw_deg, pitch_deg })
    }

    fn laser_on(&mut self) -> Result<(), ActuatorError> {
        self.record(ActuatorCommand::LaserOn)?;
        self.laser_lit = true;
        Ok(())
    }

    fn laser_off(&mut self) -> Result<(), ActuatorError> {
        self.laser_lit = false;
        self.record(ActuatorCommand::LaserOff)
    }

    fn shutdown(&mut self) -> Result<(), ActuatorError> {
        self.shut_down = true;
        self.record(ActuatorCommand::Shutdown)
    }
}
