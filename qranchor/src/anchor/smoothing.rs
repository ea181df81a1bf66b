//! Distance smoothing for feature-point placements.
//!
//! Feature-point hits jitter along the viewing ray. The smoother keeps the
//! direction of the latest hit but replaces its distance from the camera with
//! the average of the last few measurements.

use std::collections::VecDeque;

use super::geometry::Vec3;
use super::AnchorHit;

/// Number of recent distances averaged by default.
pub const DEFAULT_SMOOTHING_WINDOW: usize = 10;

/// Rolling-average smoother for one placed object.
#[derive(Debug, Clone)]
pub struct DistanceSmoother {
    window: usize,
    recent: VecDeque<f64>,
}

impl Default for DistanceSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_WINDOW)
    }
}

impl DistanceSmoother {
    /// A window of zero is treated as one (no smoothing).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of distances currently remembered.
    pub fn samples(&self) -> usize {
        self.recent.len()
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    /// Smoothed position for `hit`.
    ///
    /// Plane hits are placed instantly and reset the history.
    pub fn apply(&mut self, hit: &AnchorHit) -> Vec3 {
        if hit.kind.hit_a_plane() {
            self.reset();
            return hit.position;
        }
        self.smooth(hit.origin, hit.position)
    }

    /// Average the distance from `origin` to `position` with recent samples.
    pub fn smooth(&mut self, origin: Vec3, position: Vec3) -> Vec3 {
        let offset = position - origin;
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(offset.length());

        let average = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
        origin + offset.with_length(average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::HitKind;

    fn feature_hit(z: f64) -> AnchorHit {
        AnchorHit {
            position: Vec3::new(0.0, 0.0, -z),
            kind: HitKind::FeaturePoint,
            plane_id: None,
            origin: Vec3::ZERO,
        }
    }

    #[test]
    fn test_first_sample_unchanged() {
        let mut smoother = DistanceSmoother::default();
        let p = smoother.apply(&feature_hit(1.0));
        assert!((p.z + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_averages_distances() {
        let mut smoother = DistanceSmoother::default();
        smoother.apply(&feature_hit(1.0));
        let p = smoother.apply(&feature_hit(2.0));
        assert!((p.z + 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut smoother = DistanceSmoother::new(2);
        smoother.apply(&feature_hit(10.0));
        smoother.apply(&feature_hit(1.0));
        let p = smoother.apply(&feature_hit(1.0));
        assert_eq!(smoother.samples(), 2);
        assert!((p.z + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_plane_hit_resets() {
        let mut smoother = DistanceSmoother::default();
        smoother.apply(&feature_hit(5.0));

        let plane = AnchorHit {
            kind: HitKind::ExistingPlane,
            plane_id: Some(1),
            ..feature_hit(1.0)
        };
        let p = smoother.apply(&plane);
        assert!((p.z + 1.0).abs() < 1e-9);
        assert_eq!(smoother.samples(), 0);
    }

    #[test]
    fn test_zero_window_means_no_smoothing() {
        let mut smoother = DistanceSmoother::new(0);
        smoother.apply(&feature_hit(4.0));
        let p = smoother.apply(&feature_hit(1.0));
        assert!((p.z + 1.0).abs() < 1e-9);
    }
}
