//! Frame ingestion sources.
//!
//! This module provides sources for decoded frames:
//! - Synthetic streams (`stub://name`) for tests and demos
//! - Still images (feature: ingest-image)
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! All sources produce RGB24 `Frame` values with a 1-based index and a
//! timestamp derived from the source frame rate. Only local paths are
//! accepted; URL schemes other than `stub://` are rejected.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-image")]
pub mod image;

pub use file::{FileConfig, FileSource, FileStats};

use std::path::Path;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// What kind of media a path points at, judged by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Synthetic,
    Image,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &str) -> Option<Self> {
        if path.starts_with("stub://") {
            return Some(MediaKind::Synthetic);
        }
        let ext = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())?
            .to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_by_extension() {
        assert_eq!(MediaKind::from_path("stub://road"), Some(MediaKind::Synthetic));
        assert_eq!(MediaKind::from_path("a/b/road.JPG"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path("clip.mkv"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path("notes.txt"), None);
        assert_eq!(MediaKind::from_path("noext"), None);
    }
}
