//! Exclusive ownership of the camera/actuator rig.
//!
//! Targeting and calibration both drive the same cameras and mirror, so at
//! most one of them may run at a time.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

/// What the rig is being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigMode {
    Targeting,
    Calibration,
}

impl fmt::Display for RigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Targeting => write!(f, "targeting"),
            Self::Calibration => write!(f, "calibration"),
        }
    }
}

/// The rig is already leased.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Rig busy: {held} in progress, cannot start {requested}")]
pub struct RigBusy {
    pub held: RigMode,
    pub requested: RigMode,
}

/// Hands out at most one [`RigLease`] at a time.
#[derive(Debug, Clone, Default)]
pub struct RigLock {
    held: Arc<Mutex<Option<RigMode>>>,
}

impl RigLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the rig for `mode`.
    pub fn try_acquire(&self, mode: RigMode) -> Result<RigLease, RigBusy> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = *held {
            return Err(RigBusy {
                held: current,
                requested: mode,
            });
        }
        *held = Some(mode);
        tracing::debug!(%mode, "Rig leased");
        Ok(RigLease {
            held: self.held.clone(),
            mode,
        })
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<RigMode> {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of exclusive rig access; released on drop.
#[derive(Debug)]
pub struct RigLease {
    held: Arc<Mutex<Option<RigMode>>>,
    mode: RigMode,
}

impl RigLease {
    pub fn mode(&self) -> RigMode {
        self.mode
    }
}

impl Drop for RigLease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = None;
        tracing::debug!(mode = %self.mode, "Rig released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_lease() {
        let lock = RigLock::new();
        let lease = lock.try_acquire(RigMode::Targeting).unwrap();
        assert_eq!(lease.mode(), RigMode::Targeting);

        let err = lock.clone().try_acquire(RigMode::Calibration).unwrap_err();
        assert_eq!(
            err,
            RigBusy {
                held: RigMode::Targeting,
                requested: RigMode::Calibration
            }
        );

        drop(lease);
        assert_eq!(lock.holder(), None);
        assert!(lock.try_acquire(RigMode::Calibration).is_ok());
    }
}
