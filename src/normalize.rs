//! Line normalizer
//!
//! Crops a detected line out of its source image and removes the skew
//! estimated from the line's corner points, producing an axis-aligned
//! snapshot suitable for the registry. Every degenerate input falls back to
//! the plain crop rather than failing.

use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

use crate::detect::TextLine;
use crate::frame::safe_crop;

/// Crop a detected line from `source` and deskew it.
///
/// The skew angle is taken from the first two corner points. With fewer than
/// two points, coincident points, or a zero angle the crop is returned
/// unmodified. Otherwise the crop is rotated by the negative angle about its
/// own center on an unchanged canvas.
pub fn deskew_line_crop(source: &RgbaImage, line: &TextLine) -> RgbaImage {
    let crop = match line.bounds {
        Some(rect) => safe_crop(source, rect),
        None => source.clone(),
    };
    let angle_deg = match skew_angle_degrees(&line.corner_points) {
        Some(angle) => angle,
        None => return crop,
    };
    if angle_deg == 0.0 {
        return crop;
    }
    rotate_about_center(
        &crop,
        -angle_deg.to_radians(),
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 255]),
    )
}

/// Skew angle in degrees between the first two corner points, or `None` when
/// the geometry is degenerate.
fn skew_angle_degrees(corners: &[(i32, i32)]) -> Option<f32> {
    if corners.len() < 2 {
        return None;
    }
    let (x0, y0) = corners[0];
    let (x1, y1) = corners[1];
    let dx = (x1 - x0) as f32;
    let dy = (y1 - y0) as f32;
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(dy.atan2(dx).to_degrees())
}
