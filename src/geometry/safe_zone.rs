//! Safety zone: the inner rectangle of the frame where firing is allowed.

use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Integer pixel rectangle with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeZoneRect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl SafeZoneRect {
    /// Inner rectangle of `frame` padded by `padding_fraction` of each side.
    ///
    /// Paddings are truncated to whole pixels.
    pub fn from_frame(frame: Frame, padding_fraction: f64) -> Self {
        let pad_x = (padding_fraction * frame.width as f64) as i64;
        let pad_y = (padding_fraction * frame.height as f64) as i64;
        Self {
            x1: pad_x,
            y1: pad_y,
            x2: frame.width as i64 - pad_x,
            y2: frame.height as i64 - pad_y,
        }
    }

    /// Whether `(x, y)` lies inside the rectangle, edges included.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 as f64 && x <= self.x2 as f64 && y >= self.y1 as f64 && y <= self.y2 as f64
    }
}

/// Gate that only lets through targets inside the safe zone.
///
/// The rectangle is recomputed only when the frame dimensions change.
#[derive(Debug, Clone)]
pub struct SafetyZoneFilter {
    padding_fraction: f64,
    cached: Option<(Frame, SafeZoneRect)>,
    recomputations: u64,
}

impl SafetyZoneFilter {
    /// Create a filter; `padding_fraction` is expected in `[0, 0.5)`.
    pub fn new(padding_fraction: f64) -> Self {
        Self {
            padding_fraction,
            cached: None,
            recomputations: 0,
        }
    }

    pub fn padding_fraction(&self) -> f64 {
        self.padding_fraction
    }

    /// Safe rectangle for `frame`, served from cache when the size is unchanged.
    pub fn compute_safe_zone(&mut self, frame: Frame) -> SafeZoneRect {
        if let Some((cached_frame, rect)) = self.cached {
            if cached_frame == frame {
                return rect;
            }
        }

        let rect = SafeZoneRect::from_frame(frame, self.padding_fraction);
        self.recomputations += 1;
        tracing::debug!(
            width = frame.width,
            height = frame.height,
            x1 = rect.x1,
            y1 = rect.y1,
            x2 = rect.x2,
            y2 = rect.y2,
            "Safe zone recomputed"
        );
        self.cached = Some((frame, rect));
        rect
    }

    /// Whether `point` may be fired at in a frame of the given size.
    pub fn is_inside(&mut self, point: (f64, f64), frame: Frame) -> bool {
        self.compute_safe_zone(frame).contains(point.0, point.1)
    }

    /// Number of times the rectangle has actually been computed.
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}
