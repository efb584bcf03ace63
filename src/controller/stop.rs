//! Cooperative cancellation shared between the rig loops and their owners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single sleep while waiting, so a stop request is seen promptly.
pub const MAX_WAIT_TICK: Duration = Duration::from_millis(10);

/// Stop flag observed at every wait point of a loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short ticks.
    ///
    /// Returns `true` if the full duration elapsed, `false` if a stop was
    /// requested before or during the wait.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(MAX_WAIT_TICK));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_completes() {
        let stop = StopSignal::new();
        assert!(stop.wait(Duration::from_millis(15)));
        assert!(stop.wait(Duration::ZERO));
    }

    #[test]
    fn test_wait_interrupted_promptly() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.stop();
        });

        let started = Instant::now();
        assert!(!stop.wait(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(2));
        stopper.join().unwrap();
    }

    #[test]
    fn test_stopped_before_wait() {
        let stop = StopSignal::new();
        stop.stop();
        stop.stop();
        assert!(stop.is_stopped());
        assert!(!stop.wait(Duration::ZERO));
    }
}
