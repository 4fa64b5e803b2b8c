use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::invalid;

/// Axis-aligned box in pixel coordinates. `x2 >= x1` and `y2 >= y1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if x2 < x1 || y2 < y1 {
            return invalid(format!(
                "bounding box corners inverted: ({}, {}) -> ({}, {})",
                x1, y1, x2, y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Box from float corners, truncated toward zero like the model output.
    pub fn from_f32(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return invalid("bounding box coordinates must be finite");
        }
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }

    /// Width / height, or `1.0` for a zero-height box.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height() > 0 {
            self.width() as f32 / self.height() as f32
        } else {
            1.0
        }
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        (x2 - x1) as f32 * (y2 - y1) as f32
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clip to `[0, width] x [0, height]`.
    pub fn clipped(&self, width: u32, height: u32) -> BoundingBox {
        let w = width as i32;
        let h = height as i32;
        BoundingBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }
}

/// One model-reported object: a box and its confidence in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return invalid(format!("confidence must be within [0, 1], got {}", confidence));
        }
        Ok(Self { bbox, confidence })
    }

    pub fn width(&self) -> u32 {
        self.bbox.width()
    }

    pub fn height(&self) -> u32 {
        self.bbox.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_boxes_are_rejected() {
        assert!(BoundingBox::new(10, 10, 5, 20).is_err());
        assert!(BoundingBox::new(10, 10, 20, 5).is_err());
        let zero = BoundingBox::new(3, 3, 3, 3).unwrap();
        assert_eq!((zero.width(), zero.height()), (0, 0));
        assert_eq!(zero.aspect_ratio(), 1.0);
    }

    #[test]
    fn iou_of_overlapping_boxes() {
        let a = BoundingBox::new(0, 0, 10, 10).unwrap();
        let b = BoundingBox::new(5, 0, 15, 10).unwrap();
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        let c = BoundingBox::new(20, 20, 30, 30).unwrap();
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn detection_confidence_range() {
        let bbox = BoundingBox::new(0, 0, 1, 1).unwrap();
        assert!(Detection::new(bbox, 0.5).is_ok());
        assert!(Detection::new(bbox, 1.2).is_err());
        assert!(Detection::new(bbox, f32::INFINITY).is_err());
    }

    #[test]
    fn clip_to_frame() {
        let b = BoundingBox::new(-5, 10, 700, 500).unwrap().clipped(640, 480);
        assert_eq!(b, BoundingBox::new(0, 10, 640, 480).unwrap());
    }
}
