//! Rectangle utilities for ROI handling
//!
//! All pipeline rectangles are integer, axis-aligned and expressed in frame
//! pixel coordinates. Every function here guarantees non-empty output (or
//! returns `None` when no valid rectangle remains).

/// An axis-aligned rectangle in frame pixel coordinates.
///
/// Invariant for rectangles produced by this module: `0 <= left < right`
/// and `0 <= top < bottom`, both extents at least one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    /// Create a rectangle from edge coordinates.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle width in pixels. Negative for inverted input.
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    /// Rectangle height in pixels. Negative for inverted input.
    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Area in pixels, widened to avoid overflow on large frames.
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Horizontal center.
    pub fn center_x(&self) -> i32 {
        (self.left + self.right) / 2
    }

    /// Vertical center.
    pub fn center_y(&self) -> i32 {
        (self.top + self.bottom) / 2
    }

    /// True if the rectangle has no positive extent on either axis.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Translate by the given offset.
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// True if `other` lies fully inside `self`.
    pub fn contains(&self, other: &PixelRect) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }
}

/// Clamp a rectangle into `[0, max_w] x [0, max_h]`, forcing at least one
/// pixel of extent on both axes.
pub fn clamp_to_bounds(rect: PixelRect, max_w: i32, max_h: i32) -> PixelRect {
    let left = rect.left.clamp(0, max_w - 1);
    let top = rect.top.clamp(0, max_h - 1);
    let right = rect.right.clamp(left + 1, max_w);
    let bottom = rect.bottom.clamp(top + 1, max_h);
    PixelRect::new(left, top, right, bottom)
}

/// A rectangle of `fraction * w` by `fraction * h` centered in the frame.
///
/// The fraction is clamped to `[0.1, 1.0]` and each dimension is floored to
/// `min_crop_size` so tiny frames still produce a usable crop.
pub fn centered_rect(width: i32, height: i32, fraction: f32, min_crop_size: i32) -> PixelRect {
    let fraction = fraction.clamp(0.1, 1.0);
    let target_w = ((width as f32 * fraction).round() as i32).max(min_crop_size);
    let target_h = ((height as f32 * fraction).round() as i32).max(min_crop_size);
    let left = ((width - target_w) / 2).max(0);
    let top = ((height - target_h) / 2).max(0);
    let right = (left + target_w).min(width);
    let bottom = (top + target_h).min(height);
    PixelRect::new(left, top, right, bottom)
}

/// Widen a tight line box to at least `height * min_aspect` and at most
/// `width * expansion_factor`, keeping the vertical extent and horizontal
/// center, clamped to the container.
///
/// If the expansion collapses the rectangle, the original box clamped to the
/// container is returned instead.
pub fn expand_horizontally(
    rect: PixelRect,
    container_width: i32,
    min_aspect: f32,
    expansion_factor: f32,
) -> PixelRect {
    let height = rect.height().max(1);
    let min_width = (height as f32 * min_aspect).round() as i32;
    let target_width = ((rect.width() as f32 * expansion_factor).round() as i32).max(min_width);
    let center_x = rect.center_x();
    let mut left = center_x - target_width / 2;
    let mut right = left + target_width;
    if left < 0 {
        right -= left;
        left = 0;
    }
    if right > container_width {
        let shift = right - container_width;
        left -= shift;
        right = container_width;
    }
    left = left.max(0);
    right = right.min(container_width);
    if left >= right {
        return PixelRect::new(
            rect.left.max(0),
            rect.top,
            rect.right.min(container_width),
            rect.bottom,
        );
    }
    PixelRect::new(left, rect.top, right, rect.bottom)
}

/// Shrink a rectangle's height by `shrink_factor` around its vertical center,
/// re-clamped to `[0, max_height]`.
///
/// Returns `None` once the height would fall below `min_crop_size` or no
/// further shrink is possible; the narrowing search treats that as "no
/// further trim possible".
pub fn trim_vertically(
    rect: PixelRect,
    max_height: i32,
    shrink_factor: f32,
    min_crop_size: i32,
) -> Option<PixelRect> {
    let current_height = rect.height();
    if current_height <= min_crop_size {
        return None;
    }
    let target_height = ((current_height as f32 * shrink_factor).round() as i32).max(min_crop_size);
    if target_height == current_height {
        return None;
    }
    let center_y = rect.center_y();
    let mut top = center_y - target_height / 2;
    let mut bottom = center_y + target_height / 2;
    if top < 0 {
        bottom -= top;
        top = 0;
    }
    if bottom > max_height {
        let shift = bottom - max_height;
        top -= shift;
        bottom = max_height;
    }
    top = top.max(0);
    bottom = bottom.min(max_height);
    if top >= bottom {
        return None;
    }
    Some(PixelRect::new(rect.left, top, rect.right, bottom))
}

/// Normalized distance of the rectangle's center from the frame center.
///
/// Both axes are normalized to `[0, 1]` first, so the result ranges from 0
/// (dead center) to about 0.71 (a corner).
pub fn center_distance(rect: &PixelRect, frame_width: i32, frame_height: i32) -> f32 {
    let cx = rect.center_x() as f32 / frame_width as f32;
    let cy = rect.center_y() as f32 / frame_height as f32;
    let dx = cx - 0.5;
    let dy = cy - 0.5;
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_never_empty() {
        let cases = [
            PixelRect::new(-10, -10, 5, 5),
            PixelRect::new(90, 90, 200, 200),
            PixelRect::new(50, 50, 50, 50),
            PixelRect::new(70, 20, 30, 10),
            PixelRect::new(0, 0, 100, 100),
        ];
        for rect in cases {
            let clamped = clamp_to_bounds(rect, 100, 100);
            assert!(clamped.left < clamped.right, "{:?}", clamped);
            assert!(clamped.top < clamped.bottom, "{:?}", clamped);
            assert!(clamped.left >= 0 && clamped.right <= 100, "{:?}", clamped);
            assert!(clamped.top >= 0 && clamped.bottom <= 100, "{:?}", clamped);
            assert!(clamped.width() >= 1 && clamped.height() >= 1);
        }
    }

    #[test]
    fn test_centered_rect_fraction() {
        let rect = centered_rect(1000, 800, 0.5, 64);
        assert_eq!(rect.width(), 500);
        assert_eq!(rect.height(), 400);
        assert_eq!(rect.center_x(), 500);
        assert_eq!(rect.center_y(), 400);
    }

    #[test]
    fn test_centered_rect_floors_to_min_crop() {
        let rect = centered_rect(100, 100, 0.1, 64);
        assert!(rect.width() >= 64);
        assert!(rect.height() >= 64);
        assert!(rect.right <= 100 && rect.bottom <= 100);
    }

    #[test]
    fn test_expand_enforces_min_aspect() {
        // A near-square line box must widen to at least height * aspect.
        let rect = PixelRect::new(450, 300, 550, 400);
        let expanded = expand_horizontally(rect, 1000, 2.0, 1.3);
        assert!(expanded.width() >= 200, "{:?}", expanded);
        assert_eq!(expanded.top, 300);
        assert_eq!(expanded.bottom, 400);
    }

    #[test]
    fn test_expand_shifts_at_edges() {
        let rect = PixelRect::new(0, 10, 60, 40);
        let expanded = expand_horizontally(rect, 500, 2.0, 1.3);
        assert!(expanded.left >= 0);
        assert!(expanded.right <= 500);
        assert!(expanded.width() >= 60);
    }

    #[test]
    fn test_trim_shrinks_height() {
        let rect = PixelRect::new(0, 0, 400, 400);
        let trimmed = trim_vertically(rect, 400, 0.85, 64).unwrap();
        assert_eq!(trimmed.left, 0);
        assert_eq!(trimmed.right, 400);
        assert!(trimmed.height() < 400);
        assert!(trimmed.height() >= 64);
    }

    #[test]
    fn test_trim_stops_at_min_crop() {
        let rect = PixelRect::new(0, 0, 400, 64);
        assert!(trim_vertically(rect, 400, 0.85, 64).is_none());
    }

    #[test]
    fn test_trim_converges_to_none() {
        // Repeated trimming must terminate rather than loop forever.
        let mut rect = PixelRect::new(0, 0, 400, 400);
        let mut steps = 0;
        while let Some(next) = trim_vertically(rect, 400, 0.85, 64) {
            assert!(next.height() < rect.height());
            rect = next;
            steps += 1;
            assert!(steps < 64, "trim did not converge");
        }
    }

    #[test]
    fn test_center_distance_range() {
        let center = PixelRect::new(450, 450, 550, 550);
        assert!(center_distance(&center, 1000, 1000) < 0.01);

        let corner = PixelRect::new(0, 0, 10, 10);
        let d = center_distance(&corner, 1000, 1000);
        assert!(d > 0.6 && d < 0.72);
    }
}
