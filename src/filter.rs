//! Detection filtering ahead of record building.
//!
//! Rejected detections never reach the depth estimator or session stats.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::Detection;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionFilter {
    pub enabled: bool,
    pub min_confidence: f32,
    pub min_box_side: u32,
    pub max_box_side: u32,
    /// Inclusive width/height range.
    pub aspect_range: (f32, f32),
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.25,
            min_box_side: 20,
            max_box_side: 800,
            aspect_range: (0.5, 2.0),
        }
    }
}

impl DetectionFilter {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            ));
        }
        if self.min_box_side > self.max_box_side {
            return Err(anyhow!(
                "min_box_side {} exceeds max_box_side {}",
                self.min_box_side,
                self.max_box_side
            ));
        }
        let (lo, hi) = self.aspect_range;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || lo > hi {
            return Err(anyhow!("aspect_range must be positive and ordered, got ({}, {})", lo, hi));
        }
        Ok(())
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        if !self.enabled {
            return true;
        }
        if detection.confidence < self.min_confidence {
            return false;
        }
        let (w, h) = (detection.width(), detection.height());
        if w < self.min_box_side || h < self.min_box_side {
            return false;
        }
        if w > self.max_box_side || h > self.max_box_side {
            return false;
        }
        let aspect = detection.bbox.aspect_ratio();
        aspect >= self.aspect_range.0 && aspect <= self.aspect_range.1
    }

    /// Keep accepted detections, preserving order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let before = detections.len();
        let kept: Vec<Detection> = detections.into_iter().filter(|d| self.accepts(d)).collect();
        if kept.len() < before {
            log::trace!("filter dropped {} of {} detections", before - kept.len(), before);
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(w: i32, h: i32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(10, 10, 10 + w, 10 + h).unwrap(), confidence).unwrap()
    }

    #[test]
    fn accepts_typical_pothole_box() {
        assert!(DetectionFilter::default().accepts(&det(100, 80, 0.6)));
    }

    #[test]
    fn rejects_low_confidence() {
        let f = DetectionFilter::default();
        assert!(!f.accepts(&det(100, 80, 0.2)));
        assert!(f.accepts(&det(100, 80, 0.25)));
    }

    #[test]
    fn rejects_out_of_range_sizes() {
        let f = DetectionFilter::default();
        assert!(!f.accepts(&det(19, 30, 0.9)));
        assert!(!f.accepts(&det(801, 600, 0.9)));
        assert!(f.accepts(&det(20, 20, 0.9)));
        assert!(f.accepts(&det(800, 400, 0.9)));
    }

    #[test]
    fn rejects_extreme_aspect_ratios() {
        let f = DetectionFilter::default();
        assert!(!f.accepts(&det(300, 100, 0.9)));
        assert!(!f.accepts(&det(40, 100, 0.9)));
        assert!(f.accepts(&det(200, 100, 0.9)));
        assert!(f.accepts(&det(50, 100, 0.9)));
    }

    #[test]
    fn disabled_filter_passes_everything() {
        let f = DetectionFilter::disabled();
        assert!(f.accepts(&det(1, 0, 0.0)));
        assert_eq!(f.apply(vec![det(1, 1, 0.0), det(900, 10, 0.1)]).len(), 2);
    }

    #[test]
    fn validate_checks_ranges() {
        assert!(DetectionFilter::default().validate().is_ok());
        let mut f = DetectionFilter::default();
        f.min_box_side = 900;
        assert!(f.validate().is_err());
        let mut f = DetectionFilter::default();
        f.aspect_range = (2.0, 0.5);
        assert!(f.validate().is_err());
    }
}
