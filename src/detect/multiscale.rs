use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

pub const DEFAULT_SCALES: [f64; 3] = [0.8, 1.0, 1.2];

/// Runs the wrapped backend on resized copies of each frame.
///
/// Boxes found at a given scale are mapped back with that scale's own
/// resize ratio, clipped to the original frame and merged with NMS.
pub struct MultiScaleDetector<B> {
    inner: B,
    scales: Vec<f64>,
    iou_threshold: f32,
}

impl<B: DetectorBackend> MultiScaleDetector<B> {
    pub fn new(inner: B, scales: Vec<f64>, iou_threshold: f32) -> Result<Self> {
        if scales.is_empty() {
            return Err(anyhow!("multi-scale detection needs at least one scale"));
        }
        if let Some(bad) = scales.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(anyhow!("detection scale must be positive, got {}", bad));
        }
        Ok(Self {
            inner,
            scales,
            iou_threshold,
        })
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    fn detect_at(&mut self, frame: &Frame, scale: f64) -> Result<Vec<Detection>> {
        if (scale - 1.0).abs() < f64::EPSILON {
            return self.inner.detect(frame);
        }
        let resized = frame.resized(scale)?;
        let sx = resized.width as f32 / frame.width as f32;
        let sy = resized.height as f32 / frame.height as f32;
        let mut mapped = Vec::new();
        for detection in self.inner.detect(&resized)? {
            let b = detection.bbox;
            let bbox = BoundingBox::from_f32(
                b.x1 as f32 / sx,
                b.y1 as f32 / sy,
                b.x2 as f32 / sx,
                b.y2 as f32 / sy,
            )?
            .clipped(frame.width, frame.height);
            mapped.push(Detection::new(bbox, detection.confidence)?);
        }
        Ok(mapped)
    }
}

impl<B: DetectorBackend> DetectorBackend for MultiScaleDetector<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let scales = self.scales.clone();
        let mut all = Vec::new();
        for scale in scales {
            all.extend(self.detect_at(frame, scale)?);
        }
        Ok(non_max_suppression(all, self.iou_threshold))
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reports one box covering the centre quarter of whatever frame it sees.
    struct CentreBackend {
        seen: Vec<(u32, u32)>,
    }

    impl DetectorBackend for CentreBackend {
        fn name(&self) -> &'static str {
            "centre"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            self.seen.push((frame.width, frame.height));
            let (w, h) = (frame.width as i32, frame.height as i32);
            let bbox = BoundingBox::new(w / 4, h / 4, 3 * w / 4, 3 * h / 4)?;
            Ok(vec![Detection::new(bbox, 0.8)?])
        }
    }

    #[test]
    fn boxes_map_back_to_original_frame() {
        let mut detector =
            MultiScaleDetector::new(CentreBackend { seen: Vec::new() }, vec![0.5, 1.0, 2.0], 0.4)
                .unwrap();
        let frame = Frame::filled(400, 200, [0, 0, 0]).unwrap();
        let detections = detector.detect(&frame).unwrap();

        assert_eq!(detector.inner.seen, vec![(200, 100), (400, 200), (800, 400)]);
        // all three scales find the same region, NMS keeps one
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(100, 50, 300, 150).unwrap());
    }

    #[test]
    fn rejects_bad_scales() {
        assert!(MultiScaleDetector::new(CentreBackend { seen: Vec::new() }, vec![], 0.4).is_err());
        assert!(
            MultiScaleDetector::new(CentreBackend { seen: Vec::new() }, vec![1.0, -1.0], 0.4)
                .is_err()
        );
    }
}
