//! Pothole severity estimation.
//!
//! This crate turns object-detector output (bounding boxes + confidence) into
//! severity measurements for road potholes.
//!
//! # Architecture
//!
//! The core is a set of pure functions with all state passed explicitly:
//!
//! 1. **Depth estimation** (`depth`): box geometry + frame size + confidence
//!    to a heuristic depth in meters, clamped to configured bounds.
//! 2. **Severity classification** (`severity`): depth to a named category
//!    using a validated, priority-ordered threshold table.
//! 3. **Records and session stats** (`record`): one record per accepted
//!    detection, counted into a `SessionStats` owned by the run.
//!
//! Depth here is a monocular placeholder heuristic derived from 2-D geometry,
//! not a measured physical quantity.
//!
//! # Module Structure
//!
//! - `detect`: detector backends (stub, tract/ONNX), registry, NMS, multi-scale
//! - `filter`: confidence/size/aspect filtering before records are built
//! - `ingest`: frame sources (synthetic, still images, video files)
//! - `annotate`, `measurements`, `output`: overlays, CSV rows, run numbering
//! - `video`: annotated video encoding (`ingest-file-ffmpeg`)
//! - `pipeline`: per-frame orchestration for one processing run
//! - `api`: upload/download HTTP front end
//! - `config`: file + environment configuration

pub mod annotate;
pub mod api;
pub mod config;
pub mod depth;
pub mod detect;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod measurements;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod severity;
#[cfg(feature = "ingest-file-ffmpeg")]
pub mod video;

pub use config::PotholeConfig;
pub use depth::{DepthEstimator, DepthMethod, DepthModel, Jitter};
pub use detect::{BoundingBox, Detection, DetectorBackend, StubBackend};
pub use filter::DetectionFilter;
pub use frame::Frame;
pub use ingest::{FileConfig, FileSource, MediaKind};
pub use pipeline::{Pipeline, RunSummary};
pub use record::{DetectionRecord, RecordBuilder, SessionStats, SessionSummary};
pub use severity::{CategoryTable, Rgb, SeverityCategory};

/// Rejected input shape.
///
/// Raised for inverted boxes, non-finite or out-of-range confidence, zero
/// frame dimensions, NaN depths and non-total category tables. Callers can
/// `downcast_ref::<InvalidInput>()` on an `anyhow::Error` to tell these apart
/// from I/O or model failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    pub reason: String,
}

impl InvalidInput {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid input: {}", self.reason)
    }
}

impl std::error::Error for InvalidInput {}

/// Shorthand for returning an `InvalidInput` wrapped in `anyhow::Error`.
pub(crate) fn invalid<T>(reason: impl Into<String>) -> anyhow::Result<T> {
    Err(InvalidInput::new(reason).into())
}
