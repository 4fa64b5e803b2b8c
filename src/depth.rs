//! Heuristic depth estimation from box geometry.
//!
//! This is a monocular placeholder: it blends three 2-D signals (relative
//! area, aspect ratio, mean side length) and nudges the result by detector
//! confidence. It does not measure anything physical. Larger boxes read as
//! shallower defects under this convention.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::invalid;

const AREA_WEIGHT: f64 = 0.4;
const ASPECT_WEIGHT: f64 = 0.2;
const SIZE_WEIGHT: f64 = 0.4;
const JITTER_MIN: f64 = 0.9;
const JITTER_MAX: f64 = 1.1;
const DEBUG_SAMPLE_EVERY: u64 = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMethod {
    /// Weighted area/aspect/size blend with confidence adjustment.
    #[default]
    Blended,
    /// Relative area only: `0.22 - normalized_area * 0.5`.
    AreaOnly,
}

/// Per-signal breakdown of a blended estimate, before jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthSignals {
    pub area: f64,
    pub aspect: f64,
    pub size: f64,
    pub confidence_adjustment: f64,
    pub combined: f64,
}

/// Scalar tunables plus the pure estimation formula.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthModel {
    pub min_depth: f64,
    pub max_depth: f64,
    pub scale_factor: f64,
    pub method: DepthMethod,
}

impl Default for DepthModel {
    fn default() -> Self {
        Self {
            min_depth: 0.02,
            max_depth: 0.30,
            scale_factor: 0.8,
            method: DepthMethod::Blended,
        }
    }
}

impl DepthModel {
    pub fn new(min_depth: f64, max_depth: f64, scale_factor: f64, method: DepthMethod) -> Result<Self> {
        let model = Self {
            min_depth,
            max_depth,
            scale_factor,
            method,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_depth.is_finite() || !self.max_depth.is_finite() {
            return invalid("depth bounds must be finite");
        }
        if self.min_depth < 0.0 || self.min_depth >= self.max_depth {
            return invalid(format!(
                "depth bounds must satisfy 0 <= min_depth < max_depth, got [{}, {}]",
                self.min_depth, self.max_depth
            ));
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return invalid(format!(
                "scale_factor must be positive, got {}",
                self.scale_factor
            ));
        }
        Ok(())
    }

    fn clamp(&self, depth: f64) -> f64 {
        depth.clamp(self.min_depth, self.max_depth)
    }

    /// Individual signals of the blended formula.
    pub fn signals(
        &self,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
        confidence: f32,
    ) -> Result<DepthSignals> {
        self.validate()?;
        check_inputs(frame_width, frame_height, confidence)?;
        let (w, h) = (width as f64, height as f64);
        let (fw, fh) = (frame_width as f64, frame_height as f64);

        let normalized_area = (w * h) / (fw * fh);
        let area = self.clamp(self.max_depth - normalized_area * self.scale_factor * 0.3);

        let aspect_ratio = if height > 0 { w / h } else { 1.0 };
        let aspect = self.clamp(0.25 - aspect_ratio * 0.05);

        let avg_side = (w + h) / 2.0;
        let size = self.clamp(0.28 - avg_side / fw * 0.2);

        let confidence_adjustment = 1.0 - confidence as f64 * 0.3;
        let combined =
            (area * AREA_WEIGHT + aspect * ASPECT_WEIGHT + size * SIZE_WEIGHT) * confidence_adjustment;

        Ok(DepthSignals {
            area,
            aspect,
            size,
            confidence_adjustment,
            combined,
        })
    }

    /// Deterministic estimate in meters, within `[min_depth, max_depth]`.
    pub fn estimate(
        &self,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
        confidence: f32,
    ) -> Result<f64> {
        match self.method {
            DepthMethod::Blended => {
                let signals = self.signals(width, height, frame_width, frame_height, confidence)?;
                Ok(self.clamp(signals.combined))
            }
            DepthMethod::AreaOnly => {
                self.validate()?;
                check_inputs(frame_width, frame_height, confidence)?;
                let normalized_area = (width as f64 * height as f64)
                    / (frame_width as f64 * frame_height as f64);
                Ok(self.clamp(0.22 - normalized_area * 0.5))
            }
        }
    }
}

fn check_inputs(frame_width: u32, frame_height: u32, confidence: f32) -> Result<()> {
    if frame_width == 0 || frame_height == 0 {
        return invalid(format!(
            "frame dimensions must be non-zero, got {}x{}",
            frame_width, frame_height
        ));
    }
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return invalid(format!("confidence must be within [0, 1], got {}", confidence));
    }
    Ok(())
}

/// Jitter source for `DepthEstimator`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    #[default]
    Disabled,
    /// Reproducible jitter from a fixed seed.
    Seeded(u64),
    /// Jitter seeded from OS entropy.
    Entropy,
}

/// `DepthModel` plus optional multiplicative jitter in `[0.9, 1.1]`.
///
/// The jitter is cosmetic variety, not a sensor-noise model. Leave it
/// disabled wherever results must be reproducible.
pub struct DepthEstimator {
    model: DepthModel,
    rng: Option<StdRng>,
    estimates: u64,
}

impl DepthEstimator {
    pub fn new(model: DepthModel, jitter: Jitter) -> Self {
        let rng = match jitter {
            Jitter::Disabled => None,
            Jitter::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
            Jitter::Entropy => Some(StdRng::from_entropy()),
        };
        Self {
            model,
            rng,
            estimates: 0,
        }
    }

    pub fn model(&self) -> &DepthModel {
        &self.model
    }

    pub fn jitter_enabled(&self) -> bool {
        self.rng.is_some()
    }

    pub fn estimate(
        &mut self,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
        confidence: f32,
    ) -> Result<f64> {
        let mut depth = self
            .model
            .estimate(width, height, frame_width, frame_height, confidence)?;

        if let Some(rng) = self.rng.as_mut() {
            let factor: f64 = rng.gen_range(JITTER_MIN..=JITTER_MAX);
            depth = self.model.clamp(depth * factor);
        }

        if self.estimates % DEBUG_SAMPLE_EVERY == 0 && log::log_enabled!(log::Level::Debug) {
            if let Ok(s) = self
                .model
                .signals(width, height, frame_width, frame_height, confidence)
            {
                log::debug!(
                    "depth estimate: area {:.1}cm, aspect {:.1}cm, size {:.1}cm, final {:.1}cm, conf {:.2}",
                    s.area * 100.0,
                    s.aspect * 100.0,
                    s.size * 100.0,
                    depth * 100.0,
                    confidence
                );
            }
        }
        self.estimates += 1;
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InvalidInput;

    fn model() -> DepthModel {
        DepthModel::default()
    }

    #[test]
    fn reference_box_matches_formula() {
        // area 0.298697916.., aspect 0.15, size 0.26828125, blend * 0.76
        let depth = model().estimate(100, 50, 1280, 720, 0.8).unwrap();
        assert!((depth - 0.195_161_666_666_666_7).abs() < 1e-8, "{depth}");

        let s = model().signals(100, 50, 1280, 720, 0.8).unwrap();
        assert!((s.area - 0.298_697_916_666_666_7).abs() < 1e-12);
        assert!((s.aspect - 0.15).abs() < 1e-12);
        assert!((s.size - 0.268_281_25).abs() < 1e-12);
        assert!((s.confidence_adjustment - 0.76).abs() < 1e-6);
    }

    #[test]
    fn estimate_stays_within_bounds() {
        let m = model();
        for (w, h) in [(0, 0), (1, 1), (50, 25), (600, 300), (1280, 720), (5000, 10)] {
            for conf in [0.0f32, 0.3, 0.8, 1.0] {
                let depth = m.estimate(w, h, 1280, 720, conf).unwrap();
                assert!(depth >= m.min_depth && depth <= m.max_depth, "{w}x{h}@{conf}: {depth}");
            }
        }
    }

    #[test]
    fn zero_height_uses_unit_aspect() {
        let s = model().signals(40, 0, 640, 480, 0.5).unwrap();
        assert!((s.aspect - 0.20).abs() < 1e-12);
        assert!(model().estimate(40, 0, 640, 480, 0.5).is_ok());
    }

    #[test]
    fn area_signal_non_increasing_in_width() {
        let m = model();
        let mut previous = f64::INFINITY;
        for w in (0..1280).step_by(16) {
            let area = m.signals(w, 120, 1280, 720, 0.6).unwrap().area;
            assert!(area <= previous);
            previous = area;
        }
    }

    #[test]
    fn rejects_invalid_inputs() {
        let m = model();
        let err = m.estimate(10, 10, 0, 720, 0.5).unwrap_err();
        assert!(err.downcast_ref::<InvalidInput>().is_some());
        assert!(m.estimate(10, 10, 1280, 0, 0.5).is_err());
        assert!(m.estimate(10, 10, 1280, 720, f32::NAN).is_err());
        assert!(m.estimate(10, 10, 1280, 720, 1.5).is_err());
        assert!(m.estimate(10, 10, 1280, 720, -0.1).is_err());
    }

    #[test]
    fn model_rejects_bad_bounds() {
        assert!(DepthModel::new(0.3, 0.02, 0.8, DepthMethod::Blended).is_err());
        assert!(DepthModel::new(0.02, f64::INFINITY, 0.8, DepthMethod::Blended).is_err());
        assert!(DepthModel::new(0.02, 0.3, 0.0, DepthMethod::Blended).is_err());
        assert!(DepthModel::new(0.02, 0.3, 0.8, DepthMethod::Blended).is_ok());
    }

    #[test]
    fn inverted_bounds_are_rejected_not_clamped() {
        let inverted = DepthModel {
            min_depth: 0.30,
            max_depth: 0.02,
            ..DepthModel::default()
        };
        let mut estimator = DepthEstimator::new(inverted, Jitter::Disabled);
        let err = estimator.estimate(100, 50, 1280, 720, 0.8).unwrap_err();
        assert!(err.downcast_ref::<InvalidInput>().is_some(), "{err:#}");

        let area_only = DepthModel {
            method: DepthMethod::AreaOnly,
            ..inverted
        };
        assert!(area_only.estimate(100, 50, 1280, 720, 0.8).is_err());
        assert!(inverted.signals(100, 50, 1280, 720, 0.8).is_err());
    }

    #[test]
    fn area_only_method() {
        let m = DepthModel {
            method: DepthMethod::AreaOnly,
            ..DepthModel::default()
        };
        let depth = m.estimate(100, 50, 1280, 720, 0.8).unwrap();
        let expected = 0.22 - (5000.0 / 921_600.0) * 0.5;
        assert!((depth - expected).abs() < 1e-12);
        // very large boxes floor at min_depth
        assert_eq!(m.estimate(1280, 720, 1280, 720, 0.8).unwrap(), m.min_depth);
    }

    #[test]
    fn disabled_jitter_is_deterministic() {
        let mut estimator = DepthEstimator::new(model(), Jitter::Disabled);
        assert!(!estimator.jitter_enabled());
        let a = estimator.estimate(100, 50, 1280, 720, 0.8).unwrap();
        let b = estimator.estimate(100, 50, 1280, 720, 0.8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn seeded_jitter_is_reproducible_and_bounded() {
        let mut a = DepthEstimator::new(model(), Jitter::Seeded(7));
        let mut b = DepthEstimator::new(model(), Jitter::Seeded(7));
        let base = model().estimate(100, 50, 1280, 720, 0.8).unwrap();
        for _ in 0..100 {
            let da = a.estimate(100, 50, 1280, 720, 0.8).unwrap();
            let db = b.estimate(100, 50, 1280, 720, 0.8).unwrap();
            assert_eq!(da, db);
            assert!(da >= base * 0.9 - 1e-12 && da <= base * 1.1 + 1e-12);
            assert!(da >= 0.02 && da <= 0.30);
        }
    }
}
