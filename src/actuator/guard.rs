//! Scoped laser emission.

use super::{Actuator, ActuatorError};

/// Keeps the laser lit for its lifetime.
///
/// [`LaserGuard::extinguish`] turns the laser off and reports failure. If the
/// guard is dropped instead (early return, panic unwinding), the drop turns
/// the laser off and logs any error.
pub struct LaserGuard<'a, A: Actuator + ?Sized> {
    actuator: &'a mut A,
    lit: bool,
}

impl<'a, A: Actuator + ?Sized> LaserGuard<'a, A> {
    /// Turn the laser on.
    ///
    /// If switching on fails the laser is switched off again before the
    /// error is returned.
    pub fn fire(actuator: &'a mut A) -> Result<Self, ActuatorError> {
        if let Err(e) = actuator.laser_on() {
            if let Err(off) = actuator.laser_off() {
                tracing::error!(error = %off, "Laser off after failed laser on");
            }
            return Err(e);
        }
        tracing::debug!("Laser on");
        Ok(Self {
            actuator,
            lit: true,
        })
    }

    /// Turn the laser off.
    pub fn extinguish(mut self) -> Result<(), ActuatorError> {
        self.lit = false;
        tracing::debug!("Laser off");
        self.actuator.laser_off()
    }
}

impl<A: Actuator + ?Sized> Drop for LaserGuard<'_, A> {
    fn drop(&mut self) {
        if self.lit {
            tracing::warn!("Laser guard dropped while lit, forcing laser off");
            if let Err(e) = self.actuator.laser_off() {
                tracing::error!(error = %e, "Failed to turn laser off");
            }
        }
    }
}
