mod backend;
mod backends;
mod multiscale;
mod nms;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use multiscale::{MultiScaleDetector, DEFAULT_SCALES};
pub use nms::non_max_suppression;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, Detection};
