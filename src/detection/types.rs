//! Detection value types.

use serde::{Deserialize, Serialize};

use crate::geometry::Frame;

/// A detected object in pixel space of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box centre in pixels.
    pub center: (f64, f64),
    /// Confidence in `[0, 1]`.
    pub score: f64,
    pub class_id: i32,
    pub label: String,
}

impl Detection {
    /// Create a new detection.
    pub fn new(center: (f64, f64), score: f64, class_id: i32, label: impl Into<String>) -> Self {
        Self {
            center,
            score,
            class_id,
            label: label.into(),
        }
    }

    /// Build a detection from a box given in normalized `[x1, y1, x2, y2]`
    /// coordinates.
    ///
    /// Corners are scaled to the frame and truncated to whole pixels, then the
    /// centre is the truncated midpoint, matching what the on-camera detector
    /// reports.
    pub fn from_normalized_box(
        bbox: [f64; 4],
        frame: Frame,
        score: f64,
        class_id: i32,
        label: impl Into<String>,
    ) -> Self {
        let w = frame.width as f64;
        let h = frame.height as f64;
        let x1 = (bbox[0] * w).trunc();
        let y1 = (bbox[1] * h).trunc();
        let x2 = (bbox[2] * w).trunc();
        let y2 = (bbox[3] * h).trunc();
        let center = (((x1 + x2) * 0.5).trunc(), ((y1 + y2) * 0.5).trunc());
        Self::new(center, score, class_id, label)
    }

    pub fn x(&self) -> f64 {
        self.center.0
    }

    pub fn y(&self) -> f64 {
        self.center.1
    }
}

/// One detection chosen from each camera, assumed to be the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPair {
    pub left: Detection,
    pub right: Detection,
}

impl DetectionPair {
    pub fn new(left: Detection, right: Detection) -> Self {
        Self { left, right }
    }

    /// Signed horizontal offset `left.x - right.x`.
    pub fn dx(&self) -> f64 {
        self.left.x() - self.right.x()
    }

    /// Signed vertical offset `left.y - right.y`.
    pub fn dy(&self) -> f64 {
        self.left.y() - self.right.y()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_normalized_box_truncates() {
        let frame = Frame::new(640, 480);
        let det = Detection::from_normalized_box([0.1, 0.2, 0.3, 0.45], frame, 0.9, 0, "person");
        // x1=64 x2=192 -> 128; y1=96 y2=216 -> 156
        assert_eq!(det.center, (128.0, 156.0));
        assert_eq!(det.label, "person");

        let odd = Detection::from_normalized_box([0.0, 0.0, 0.0016, 0.0], frame, 0.5, 1, "x");
        // x2 = trunc(1.024) = 1, centre trunc(0.5) = 0
        assert_eq!(odd.center, (0.0, 0.0));
    }

    #[test]
    fn test_pair_offsets() {
        let pair = DetectionPair::new(
            Detection::new((340.0, 241.0), 0.9, 0, "a"),
            Detection::new((330.0, 240.0), 0.8, 0, "a"),
        );
        assert_eq!(pair.dx(), 10.0);
        assert_eq!(pair.dy(), 1.0);
    }
}
