//! Detection sources: the per-camera detector seam and its device adapter.

use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use super::types::Detection;
use crate::geometry::Frame;

/// Detection source errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Detector '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("Detector '{0}' stopped")]
    Stopped(String),
}

impl DetectionError {
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Raw detector output as reported by the camera: a normalized box.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` in `[0, 1]`.
    pub bbox: [f64; 4],
    pub score: f64,
    pub class_id: i32,
    pub label: String,
}

/// One processed camera frame: its size and everything detected in it.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFrame {
    pub frame: Frame,
    pub detections: Vec<RawDetection>,
}

impl DetectedFrame {
    pub fn new(frame: Frame, detections: Vec<RawDetection>) -> Self {
        Self { frame, detections }
    }

    /// Denormalize and keep detections scoring at least `score_threshold`.
    pub fn to_detections(&self, score_threshold: f64) -> Vec<Detection> {
        self.detections
            .iter()
            .filter(|d| d.score >= score_threshold)
            .map(|d| {
                Detection::from_normalized_box(d.bbox, self.frame, d.score, d.class_id, &d.label)
            })
            .collect()
    }
}

/// Per-camera detection source used by the targeting controller.
///
/// An empty list means "nothing seen" and is not an error. Implementations
/// must be safe to call from the controller thread while a producer feeds
/// them from another thread.
pub trait Detector: Send + Sync {
    /// Detections from the most recent frame with `score >= score_threshold`.
    fn get_detections(&self, score_threshold: f64) -> Result<Vec<Detection>, DetectionError>;

    /// Release the underlying device. Called once during shutdown.
    fn stop(&self) {}
}

/// A camera with an on-board detector.
///
/// Pulling a frame needs exclusive access; [`LockedDetector`] provides it.
pub trait DetectionDevice: Send {
    /// Block until the next processed frame is available.
    fn next_frame(&mut self) -> Result<DetectedFrame, DetectionError>;

    /// Release the device.
    fn close(&mut self) {}
}

/// Serializes access to a [`DetectionDevice`].
///
/// The lock is held only while one frame is pulled, never across the two
/// cameras, so left and right reads cannot deadlock against each other.
pub struct LockedDetector<D: DetectionDevice> {
    name: String,
    device: Mutex<D>,
}

impl<D: DetectionDevice> LockedDetector<D> {
    pub fn new(name: impl Into<String>, device: D) -> Self {
        Self {
            name: name.into(),
            device: Mutex::new(device),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: DetectionDevice> Detector for LockedDetector<D> {
    fn get_detections(&self, score_threshold: f64) -> Result<Vec<Detection>, DetectionError> {
        let frame = {
            let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
            device.next_frame()?
        };
        let detections = frame.to_detections(score_threshold);
        tracing::trace!(
            detector = %self.name,
            raw = frame.detections.len(),
            kept = detections.len(),
            "Pulled detections"
        );
        Ok(detections)
    }

    fn stop(&self) {
        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        device.close();
        tracing::info!(detector = %self.name, "Detector released");
    }
}
