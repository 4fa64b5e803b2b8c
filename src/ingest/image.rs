//! Still-image source and annotated image output.

use std::path::Path;

use anyhow::{Context, Result};

use super::file::{FileConfig, FileStats};
use crate::frame::Frame;

pub(crate) struct ImageFileSource {
    config: FileConfig,
    delivered: bool,
    last_error: Option<String>,
}

impl ImageFileSource {
    pub(crate) fn new(config: FileConfig) -> Self {
        Self {
            config,
            delivered: false,
            last_error: None,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: connected to {} (image)", self.config.path);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.delivered {
            return Ok(None);
        }
        self.delivered = true;
        match load_frame(Path::new(&self.config.path)) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    pub(crate) fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: u64::from(self.delivered && self.last_error.is_none()),
            path: self.config.path.clone(),
        }
    }
}

/// Decode an image file into a single RGB frame.
pub fn load_frame(path: &Path) -> Result<Frame> {
    let decoded = ::image::open(path)
        .with_context(|| format!("could not read image {}", path.display()))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    Frame::new(decoded.into_raw(), width, height, 1, 0.0)
}

/// Encode a frame to disk; the format follows the file extension.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let buffer = ::image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .context("frame buffer does not match its dimensions")?;
    buffer
        .save(path)
        .with_context(|| format!("writing annotated image to {}", path.display()))
}
