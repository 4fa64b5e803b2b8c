//! Local file frame source.
//!
//! `FileSource` reads frames from local media:
//! - `stub://name`: deterministic synthetic road texture
//! - still images: a single frame (feature `ingest-image`)
//! - video files: decoded in-memory with FFmpeg (feature `ingest-file-ffmpeg`)
//!
//! The file source MUST NOT fetch remote URLs.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
#[cfg(feature = "ingest-image")]
use super::image::ImageFileSource;
use super::MediaKind;
use crate::frame::Frame;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/data/road.mp4") or "stub://name".
    pub path: String,
    /// Frame rate used for timestamps when the container does not report one.
    pub target_fps: u32,
    /// Synthetic sources only: frame size.
    pub width: u32,
    pub height: u32,
    /// Synthetic sources only: frames produced before end of stream.
    pub synthetic_frames: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 30,
            width: 640,
            height: 480,
            synthetic_frames: 90,
        }
    }
}

impl FileConfig {
    pub fn for_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-image")]
    Image(ImageFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes), got '{}'",
                config.path
            ));
        }
        let kind = MediaKind::from_path(&config.path)
            .ok_or_else(|| anyhow!("unsupported media type: {}", config.path))?;
        match kind {
            MediaKind::Synthetic => Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)?),
            }),
            MediaKind::Image => {
                #[cfg(feature = "ingest-image")]
                {
                    Ok(Self {
                        backend: FileBackend::Image(ImageFileSource::new(config)),
                    })
                }
                #[cfg(not(feature = "ingest-image"))]
                {
                    Err(anyhow!("image ingestion requires the ingest-image feature"))
                }
            }
            MediaKind::Video => {
                #[cfg(feature = "ingest-file-ffmpeg")]
                {
                    Ok(Self {
                        backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
                    })
                }
                #[cfg(not(feature = "ingest-file-ffmpeg"))]
                {
                    Err(anyhow!(
                        "video ingestion requires the ingest-file-ffmpeg feature"
                    ))
                }
            }
        }
    }

    /// Connect to the file source.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    /// Next decoded frame, or `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    /// Frames per second used for timestamps.
    pub fn fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.config.target_fps as f64,
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(_) => 1.0,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.fps(),
        }
    }

    /// Total frame count when the container reports one.
    pub fn total_frames(&self) -> Option<u64> {
        match &self.backend {
            FileBackend::Synthetic(source) => Some(source.config.synthetic_frames),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(_) => Some(1),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.total_frames(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        match &self.backend {
            FileBackend::Synthetic(_) => MediaKind::Synthetic,
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(_) => MediaKind::Image,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(_) => MediaKind::Video,
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.is_healthy(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic source needs a non-zero frame size"));
        }
        if config.target_fps == 0 {
            return Err(anyhow!("synthetic source needs target_fps >= 1"));
        }
        Ok(Self {
            config,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.config.synthetic_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        let timestamp = self.frame_count as f64 / self.config.target_fps as f64;
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
            timestamp,
        )
        .map(Some)
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let (w, h) = (self.config.width as u64, self.config.height as u64);
        if self.frame_count % 15 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        // asphalt grey with a slowly drifting dark patch
        let cx = (self.frame_count * 7 + self.scene_state as u64 * 31) % w;
        let cy = h / 2 + (self.scene_state as u64 * 13) % (h / 2).max(1);
        let radius = (w.min(h) / 8).max(1);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let dx = x.abs_diff(cx);
                let dy = y.abs_diff(cy);
                let grain = ((x * 31 + y * 17 + self.frame_count) % 23) as u8;
                let shade = if dx * dx + dy * dy <= radius * radius {
                    30 + grain
                } else {
                    110 + grain
                };
                pixels.extend_from_slice(&[shade, shade, shade.saturating_add(4)]);
            }
        }
        pixels
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
