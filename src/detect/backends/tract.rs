#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Frames are resized to the model input, normalised to `[0, 1]` and fed as
/// `1x3xHxW`. The output is expected as `1 x (4 + classes) x anchors` with
/// `cx, cy, w, h` in input pixels followed by per-class scores.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.3,
            nms_threshold: 0.4,
        })
    }

    /// Override the default confidence and NMS thresholds.
    pub fn with_thresholds(mut self, confidence: f32, nms: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_threshold = nms;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = frame.resized_to(self.width, self.height)?;
        let pixels = resized.pixels();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let rows = shape[1];
        let anchors = shape[2];
        let sx = frame.width as f32 / self.width as f32;
        let sy = frame.height as f32 / self.height as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let score = (4..rows)
                .map(|r| view[[0, r, a]])
                .fold(f32::NEG_INFINITY, f32::max);
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (view[[0, 0, a]], view[[0, 1, a]], view[[0, 2, a]], view[[0, 3, a]]);
            let bbox = BoundingBox::from_f32(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            );
            let Ok(bbox) = bbox else {
                continue;
            };
            candidates.push(Detection::new(
                bbox.clipped(frame.width, frame.height),
                score.min(1.0),
            )?);
        }
        Ok(non_max_suppression(candidates, self.nms_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}
