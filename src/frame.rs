//! Decoded video frames.
//!
//! - `Frame`: one RGB24 picture plus its 1-based read index within the video.
//! - `VideoInfo`: container-level properties reported by a frame source.
//!
//! Frames are owned by the pipeline for exactly one iteration. The only frame
//! kept beyond that is the representative frame used for the overlay image.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use serde::Serialize;

/// Container properties of an opened video.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct VideoInfo {
    /// Frame count reported by the container. Informational only; may be 0.
    pub frame_count: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    pub fn duration_secs(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// A decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// 1-based position in read order.
    pub index: u64,
}

impl Frame {
    /// Wrap tightly packed RGB24 bytes.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
        Ok(Self { image, index })
    }

    pub fn from_image(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        *self.image.get_pixel(x, y)
    }

    /// ITU-R BT.601 luma, row-major.
    pub fn luma(&self) -> Vec<u8> {
        self.image
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
            })
            .collect()
    }
}
