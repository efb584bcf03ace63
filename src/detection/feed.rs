//! Background frame producer feeding a bounded channel.
//!
//! A camera thread pulls processed frames from a [`DetectionDevice`] at a
//! fixed rate and pushes them into a bounded channel. The controller side
//! drains the channel and keeps only the newest frame, so it never acts on a
//! stale detection and a slow consumer never blocks the camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use super::source::{DetectedFrame, DetectionDevice, DetectionError, Detector};
use super::types::Detection;

/// Configuration for a detection feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Frames pulled per second.
    pub frame_rate_hz: f64,
    /// Bounded channel capacity (frames).
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 8.0,
            capacity: 4,
        }
    }
}

impl FeedConfig {
    /// Set the frame rate.
    pub fn with_frame_rate(mut self, hz: f64) -> Self {
        self.frame_rate_hz = hz;
        self
    }

    /// Set the channel capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn period(&self) -> Duration {
        if self.frame_rate_hz > 0.0 && self.frame_rate_hz.is_finite() {
            Duration::from_secs_f64(1.0 / self.frame_rate_hz)
        } else {
            Duration::ZERO
        }
    }
}

type FrameResult = Result<DetectedFrame, DetectionError>;

/// [`Detector`] backed by a producer thread.
pub struct DetectionFeed {
    name: String,
    rx: Mutex<mpsc::Receiver<FrameResult>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionFeed {
    /// Start a producer thread pulling from `device`.
    pub fn spawn<D>(name: impl Into<String>, device: D, config: FeedConfig) -> Self
    where
        D: DetectionDevice + 'static,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let name = name.clone();
            let running = running.clone();
            std::thread::spawn(move || produce(name, device, config, tx, running))
        };

        tracing::info!(detector = %name, "Detection feed started");

        Self {
            name,
            rx: Mutex::new(rx),
            running,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the producer is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Newest queued frame, discarding older ones. `None` if nothing new.
    fn latest(&self) -> Result<Option<DetectedFrame>, DetectionError> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut newest = None;
        loop {
            match rx.try_recv() {
                Ok(item) => newest = Some(item),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if newest.is_none() {
                        return Err(DetectionError::Stopped(self.name.clone()));
                    }
                    break;
                }
            }
        }
        newest.transpose()
    }
}

impl Detector for DetectionFeed {
    fn get_detections(&self, score_threshold: f64) -> Result<Vec<Detection>, DetectionError> {
        Ok(self
            .latest()?
            .map(|frame| frame.to_detections(score_threshold))
            .unwrap_or_default())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(detector = %self.name, "Detection feed thread panicked");
            }
        }
    }
}

impl Drop for DetectionFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn produce<D: DetectionDevice>(
    name: String,
    mut device: D,
    config: FeedConfig,
    tx: mpsc::Sender<FrameResult>,
    running: Arc<AtomicBool>,
) {
    let period = config.period();

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let item = device.next_frame();
        if let Err(e) = &item {
            tracing::warn!(detector = %name, error = %e, "Frame pull failed");
        }

        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(detector = %name, "Feed full, frame dropped");
            }
            Err(TrySendError::Closed(_)) => break,
        }

        let elapsed = started.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }

    running.store(false, Ordering::SeqCst);
    device.close();
    tracing::info!(detector = %name, "Detection feed stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RawDetection;
    use crate::geometry::Frame;
    use std::sync::atomic::AtomicUsize;

    /// Emits frames whose single detection's x encodes the frame index.
    struct CountingDevice {
        count: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl DetectionDevice for CountingDevice {
        fn next_frame(&mut self) -> Result<DetectedFrame, DetectionError> {
            let i = self.count.fetch_add(1, Ordering::SeqCst);
            let x = (i % 100) as f64 / 100.0;
            Ok(DetectedFrame::new(
                Frame::new(100, 100),
                vec![RawDetection {
                    bbox: [x, 0.5, x, 0.5],
                    score: 0.9,
                    class_id: 0,
                    label: "t".into(),
                }],
            ))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_feed_drains_to_newest_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let device = CountingDevice {
            count: count.clone(),
            closed: closed.clone(),
        };
        let feed = DetectionFeed::spawn(
            "left",
            device,
            FeedConfig::default().with_frame_rate(200.0).with_capacity(2),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        while seen.is_empty() && Instant::now() < deadline {
            seen = feed.get_detections(0.5).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen.len(), 1);

        feed.stop();
        assert!(!feed.is_running());
        assert!(closed.load(Ordering::SeqCst));

        // Frames left in the channel are still served, then the feed reports stopped.
        let mut result = feed.get_detections(0.5);
        while matches!(&result, Ok(v) if !v.is_empty()) {
            result = feed.get_detections(0.5);
        }
        assert!(matches!(result, Err(DetectionError::Stopped(_))));
    }

    #[test]
    fn test_empty_when_no_new_frame() {
        struct SlowDevice;
        impl DetectionDevice for SlowDevice {
            fn next_frame(&mut self) -> Result<DetectedFrame, DetectionError> {
                std::thread::sleep(Duration::from_millis(20));
                Err(DetectionError::unavailable("slow", "no signal"))
            }
        }

        let feed = DetectionFeed::spawn("slow", SlowDevice, FeedConfig::default());
        // First poll normally happens before the device has produced anything.
        let first = feed.get_detections(0.5);
        assert!(matches!(first, Ok(ref v) if v.is_empty()) || first.is_err());
        feed.stop();
    }
}
