//! External text-detection contract
//!
//! The engine never runs OCR itself; it drives an external detector through
//! the [`TextDetector`] trait. Detector failures are recoverable and are
//! treated as "no lines detected" by the callers.

use image::RgbaImage;
use thiserror::Error;

use crate::geometry::PixelRect;

/// A single text line reported by the external detector.
#[derive(Debug, Clone)]
pub struct TextLine {
    /// Recognized text content.
    pub text: String,
    /// Axis-aligned bounding rectangle in the coordinates of the submitted
    /// image, when the detector provides one.
    pub bounds: Option<PixelRect>,
    /// Ordered corner points of the line quad, used to estimate skew.
    /// May be empty when the detector does not expose corner geometry.
    pub corner_points: Vec<(i32, i32)>,
}

impl TextLine {
    /// A line with bounds but no corner geometry.
    pub fn new(text: impl Into<String>, bounds: PixelRect) -> Self {
        Self {
            text: text.into(),
            bounds: Some(bounds),
            corner_points: Vec::new(),
        }
    }

    /// Attach corner points to the line.
    pub fn with_corners(mut self, corners: Vec<(i32, i32)>) -> Self {
        self.corner_points = corners;
        self
    }
}

/// Error from the external detection service.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The backend rejected or failed to process the image.
    #[error("text detector backend failed: {0}")]
    Backend(String),
    /// The backend is not available (not initialized, torn down, ...).
    #[error("text detector unavailable: {0}")]
    Unavailable(String),
}

/// The external text-detection service.
///
/// Must be callable synchronously from the frame worker and must accept both
/// full frames and small crops. Implementations are expected to be cheap to
/// call repeatedly: the narrowing search performs several detections per
/// frame.
pub trait TextDetector: Send + Sync {
    /// Run text detection on an image, returning all recognized lines.
    fn detect(&self, image: &RgbaImage) -> Result<Vec<TextLine>, DetectorError>;
}
