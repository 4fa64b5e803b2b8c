//! Decoded RGB frames.
//!
//! Every source (synthetic, still image, video) produces `Frame` values with
//! tightly packed RGB24 pixels. Overlays are drawn in place, so the pixel
//! buffer is mutable.

use anyhow::{anyhow, Result};

pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position in the source stream.
    pub index: u64,
    /// Seconds since the start of the stream (`index / fps`).
    pub timestamp_secs: f64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64, timestamp_secs: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero, got {}x{}", width, height));
        }
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            timestamp_secs,
        })
    }

    /// Solid-colour frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..(len / 3) {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height, 1, 0.0)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&rgb);
    }

    /// Nearest-neighbour resize by `scale`. Used for multi-scale detection.
    pub fn resized(&self, scale: f64) -> Result<Frame> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(anyhow!("resize scale must be positive, got {}", scale));
        }
        let width = ((self.width as f64 * scale) as u32).max(1);
        let height = ((self.height as f64 * scale) as u32).max(1);
        self.resized_to(width, height)
    }

    /// Nearest-neighbour resize to an exact size.
    pub fn resized_to(&self, width: u32, height: u32) -> Result<Frame> {
        let mut pixels = Vec::with_capacity(rgb_len(width, height)?);
        for y in 0..height {
            let src_y = ((y as u64 * self.height as u64) / height.max(1) as u64) as u32;
            for x in 0..width {
                let src_x = ((x as u64 * self.width as u64) / width.max(1) as u64) as u32;
                let idx = (src_y as usize * self.width as usize + src_x as usize) * 3;
                pixels.extend_from_slice(&self.pixels[idx..idx + 3]);
            }
        }
        Frame::new(pixels, width, height, self.index, self.timestamp_secs)
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
