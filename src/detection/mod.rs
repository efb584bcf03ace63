//! Per-camera detections and left/right pairing.

mod feed;
mod pairing;
mod source;
mod types;

pub use feed::{DetectionFeed, FeedConfig};
pub use pairing::{
    find_best_pair, pairing_cost, DetectionPairer, PairingNotFound, HORIZONTAL_WEIGHT,
    VERTICAL_WEIGHT,
};
pub use source::{
    DetectedFrame, DetectionDevice, DetectionError, Detector, LockedDetector, RawDetection,
};
pub use types::{Detection, DetectionPair};
