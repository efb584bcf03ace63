//! Targeting state machine and its cancellation signal.

mod state;
mod stop;
mod targeting;

pub use state::{CycleOutcome, Side, TargetingState, TargetingStats};
pub use stop::{StopSignal, MAX_WAIT_TICK};
pub use targeting::{ControllerError, TargetingConfig, TargetingController, TargetingHandle};
