//! Frame data structures and pixel primitives
//!
//! A frame is a single RGBA buffer delivered by an external frame source
//! together with its rotation metadata. Cropping, scaling and quarter-turn
//! rotation are thin wrappers over the `image` crate; the pipeline treats
//! them as given primitives.

use image::imageops;
use image::RgbaImage;
use std::time::Instant;
use tracing::warn;

use crate::geometry::PixelRect;

/// A frame delivered by the external frame source.
///
/// Owned exclusively by the pipeline invocation that processes it and
/// dropped afterwards.
#[derive(Debug)]
pub struct Frame {
    /// Raw RGBA pixel data.
    pub image: RgbaImage,
    /// Rotation that still has to be applied, in degrees clockwise.
    pub rotation_degrees: i32,
    /// Timestamp when the frame was produced.
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame with rotation metadata.
    pub fn new(image: RgbaImage, rotation_degrees: i32) -> Self {
        Self {
            image,
            rotation_degrees,
            timestamp: Instant::now(),
        }
    }

    /// Frame dimensions as (width, height) before rotation is applied.
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Consume the frame and return the upright image.
    ///
    /// Camera rotation metadata is a quarter-turn multiple; anything else is
    /// left unrotated with a warning rather than failing the frame.
    pub fn into_upright(self) -> RgbaImage {
        match self.rotation_degrees.rem_euclid(360) {
            0 => self.image,
            90 => imageops::rotate90(&self.image),
            180 => imageops::rotate180(&self.image),
            270 => imageops::rotate270(&self.image),
            other => {
                warn!("unsupported frame rotation {other} degrees, leaving frame unrotated");
                self.image
            }
        }
    }
}

/// Crop a rectangle out of an image, clamped safely to image bounds.
///
/// Never returns a zero-area image for a non-empty source.
pub fn safe_crop(image: &RgbaImage, rect: PixelRect) -> RgbaImage {
    let (width, height) = image.dimensions();
    let left = rect.left.max(0).min(width as i32 - 1);
    let top = rect.top.max(0).min(height as i32 - 1);
    let right = rect.right.clamp(left + 1, width as i32);
    let bottom = rect.bottom.clamp(top + 1, height as i32);
    let crop_w = (right - left).max(1) as u32;
    let crop_h = (bottom - top).max(1) as u32;
    imageops::crop_imm(image, left as u32, top as u32, crop_w, crop_h).to_image()
}

/// Downscale an image to an exact sample grid.
pub fn scale_to(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}
