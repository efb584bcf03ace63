//! Left/right correspondence selection.

use thiserror::Error;

use super::types::{Detection, DetectionPair};

/// Weight of the squared vertical offset in the pairing cost.
pub const VERTICAL_WEIGHT: f64 = 0.8;

/// Weight of the squared horizontal offset in the pairing cost.
pub const HORIZONTAL_WEIGHT: f64 = 0.2;

/// No pair passed the gate.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("No detection pair found ({left} left, {right} right candidates, gate {max_gate} px)")]
pub struct PairingNotFound {
    pub left: usize,
    pub right: usize,
    pub max_gate: f64,
}

/// Weighted squared offset between two detections.
///
/// Rows must agree on a rectified rig, so the vertical offset dominates.
pub fn pairing_cost(left: &Detection, right: &Detection) -> f64 {
    let dx = left.x() - right.x();
    let dy = left.y() - right.y();
    VERTICAL_WEIGHT * dy * dy + HORIZONTAL_WEIGHT * dx * dx
}

/// Pick the cheapest left/right pair, then gate it.
///
/// Candidates are scanned left-major; on equal cost the first one wins, so the
/// result is deterministic for a given input order. The gate compares the
/// signed vertical offset `left.y - right.y` of the winner against
/// `max_gate`, not its cost: a right box far *below* the left one is never
/// rejected by the gate.
pub fn find_best_pair(
    left: &[Detection],
    right: &[Detection],
    max_gate: f64,
) -> Option<DetectionPair> {
    let mut best: Option<(f64, &Detection, &Detection)> = None;

    for l in left {
        for r in right {
            let cost = pairing_cost(l, r);
            match best {
                Some((best_cost, _, _)) if cost >= best_cost => {}
                // NaN costs never displace a candidate.
                _ if cost.is_nan() => {}
                _ => best = Some((cost, l, r)),
            }
        }
    }

    let (cost, l, r) = best?;
    let dy = l.y() - r.y();
    if dy < max_gate {
        tracing::trace!(cost, dy, "Pair selected");
        Some(DetectionPair::new(l.clone(), r.clone()))
    } else {
        tracing::debug!(cost, dy, max_gate, "Best pair rejected by gate");
        None
    }
}

/// Pairing stage with a fixed gate.
#[derive(Debug, Clone, Copy)]
pub struct DetectionPairer {
    max_gate: f64,
}

impl DetectionPairer {
    pub fn new(max_gate: f64) -> Self {
        Self { max_gate }
    }

    pub fn max_gate(&self) -> f64 {
        self.max_gate
    }

    /// See [`find_best_pair`].
    pub fn find_best_pair(&self, left: &[Detection], right: &[Detection]) -> Option<DetectionPair> {
        find_best_pair(left, right, self.max_gate)
    }

    /// Like [`DetectionPairer::find_best_pair`], reporting the miss as an error.
    pub fn require_pair(
        &self,
        left: &[Detection],
        right: &[Detection],
    ) -> Result<DetectionPair, PairingNotFound> {
        self.find_best_pair(left, right).ok_or(PairingNotFound {
            left: left.len(),
            right: right.len(),
            max_gate: self.max_gate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f64, y: f64) -> Detection {
        Detection::new((x, y), 0.9, 0, "target")
    }

    #[test]
    fn test_cost_weights() {
        let cost = pairing_cost(&det(10.0, 10.0), &det(0.0, 0.0));
        assert!((cost - (0.8 * 100.0 + 0.2 * 100.0)).abs() < 1e-12);
    }

    #[test]
    fn test_picks_minimum_cost() {
        let left = vec![det(340.0, 240.0), det(100.0, 100.0)];
        let right = vec![det(90.0, 101.0), det(330.0, 240.0)];
        let pair = find_best_pair(&left, &right, 30.0).unwrap();
        assert_eq!(pair.left.center, (340.0, 240.0));
        assert_eq!(pair.right.center, (330.0, 240.0));
    }

    #[test]
    fn test_vertical_offset_dominates() {
        // Same squared offset magnitude: the horizontal one is cheaper.
        let left = vec![det(100.0, 100.0)];
        let right = vec![det(100.0, 90.0), det(90.0, 100.0)];
        let pair = find_best_pair(&left, &right, 30.0).unwrap();
        assert_eq!(pair.right.center, (90.0, 100.0));
    }

    #[test]
    fn test_deterministic_on_ties() {
        let left = vec![det(50.0, 50.0)];
        let right = vec![det(40.0, 50.0), det(60.0, 50.0)];
        for _ in 0..10 {
            let pair = find_best_pair(&left, &right, 30.0).unwrap();
            assert_eq!(pair.right.center, (40.0, 50.0));
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(find_best_pair(&[], &[det(1.0, 1.0)], 30.0).is_none());
        assert!(find_best_pair(&[det(1.0, 1.0)], &[], 30.0).is_none());
    }

    #[test]
    fn test_gate_rejects_large_vertical_offset() {
        let left = vec![det(100.0, 300.0), det(200.0, 320.0)];
        let right = vec![det(100.0, 200.0)];
        assert!(find_best_pair(&left, &right, 30.0).is_none());
    }

    #[test]
    fn test_gate_uses_signed_offset() {
        // Right box 200 px lower: dy is negative and passes the gate.
        let left = vec![det(100.0, 100.0)];
        let right = vec![det(100.0, 300.0)];
        let pair = find_best_pair(&left, &right, 30.0).unwrap();
        assert_eq!(pair.dy(), -200.0);
    }

    #[test]
    fn test_gate_checks_only_the_winner() {
        // Winner has dy=40 (> gate) even though a costlier pair has dy=0.
        let left = vec![det(100.0, 140.0), det(400.0, 100.0)];
        let right = vec![det(100.0, 100.0)];
        assert!(find_best_pair(&left, &right, 30.0).is_none());
    }

    #[test]
    fn test_require_pair_error() {
        let pairer = DetectionPairer::new(5.0);
        let err = pairer
            .require_pair(&[det(0.0, 50.0)], &[det(0.0, 0.0)])
            .unwrap_err();
        assert_eq!(err.left, 1);
        assert_eq!(err.right, 1);
        assert_eq!(err.max_gate, 5.0);
    }
}
