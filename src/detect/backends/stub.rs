use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const MIN_SIDE: u32 = 24;
const BYTES_PER_BOX: usize = 6;

/// Stub backend for testing and synthetic runs.
///
/// Derives one to three boxes from a SHA-256 digest of the frame, so the
/// same pixels always produce the same detections. Boxes stay inside the
/// frame with aspect ratios between roughly 0.55 and 1.67 and confidence
/// in `[0.30, 0.99]`.
pub struct StubBackend {
    fixed: Option<Vec<Detection>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { fixed: None }
    }

    /// Backend that reports the same detections for every frame.
    pub fn fixed(detections: Vec<Detection>) -> Self {
        Self {
            fixed: Some(detections),
        }
    }

    fn synthesize(frame: &Frame) -> Result<Vec<Detection>> {
        let mut hasher = Sha256::new();
        hasher.update(frame.width.to_le_bytes());
        hasher.update(frame.height.to_le_bytes());
        hasher.update(frame.pixels());
        let digest: [u8; 32] = hasher.finalize().into();

        let count = 1 + (digest[0] % 3) as usize;
        let fw = frame.width;
        let fh = frame.height;
        let max_w = (fw / 3).max(MIN_SIDE).min(fw);

        let mut detections = Vec::with_capacity(count);
        for i in 0..count {
            let b = &digest[1 + i * BYTES_PER_BOX..1 + (i + 1) * BYTES_PER_BOX];
            let span = u16::from_le_bytes([b[0], b[1]]) as u32;
            let w = if max_w > MIN_SIDE {
                MIN_SIDE + span % (max_w - MIN_SIDE + 1)
            } else {
                max_w
            };
            let ratio = 0.6 + (b[2] % 100) as f32 / 100.0 * 1.2;
            let h = ((w as f32 * ratio) as u32).clamp(1, fh);
            let x1 = (b[3] as u32 * (fw - w)) / 255;
            let y1 = (b[4] as u32 * (fh - h)) / 255;
            let confidence = 0.30 + (b[5] % 70) as f32 / 100.0;

            let bbox = BoundingBox::new(
                x1 as i32,
                y1 as i32,
                (x1 + w) as i32,
                (y1 + h) as i32,
            )?;
            detections.push(Detection::new(bbox, confidence)?);
        }
        Ok(detections)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        match &self.fixed {
            Some(detections) => Ok(detections.clone()),
            None => Self::synthesize(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_is_deterministic() {
        let mut backend = StubBackend::new();
        let frame = Frame::filled(640, 480, [90, 90, 90]).unwrap();
        let first = backend.detect(&frame).unwrap();
        let second = backend.detect(&frame).unwrap();
        assert_eq!(first, second);
        assert!((1..=3).contains(&first.len()));
    }

    #[test]
    fn stub_boxes_stay_inside_frame() {
        let mut backend = StubBackend::new();
        for shade in 0..40u8 {
            let frame = Frame::filled(320, 240, [shade, shade / 2, 255 - shade]).unwrap();
            for d in backend.detect(&frame).unwrap() {
                assert!(d.bbox.x1 >= 0 && d.bbox.y1 >= 0);
                assert!(d.bbox.x2 <= 320 && d.bbox.y2 <= 240);
                assert!(d.width() >= MIN_SIDE);
                assert!(d.confidence > 0.29 && d.confidence < 1.0);
            }
        }
    }

    #[test]
    fn fixed_backend_repeats_detections() {
        let bbox = BoundingBox::new(10, 10, 60, 50).unwrap();
        let fixed = vec![Detection::new(bbox, 0.7).unwrap()];
        let mut backend = StubBackend::fixed(fixed.clone());
        let frame = Frame::filled(64, 64, [0, 0, 0]).unwrap();
        assert_eq!(backend.detect(&frame).unwrap(), fixed);
    }
}
