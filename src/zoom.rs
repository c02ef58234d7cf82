//! ROI narrowing search
//!
//! Coarse-to-fine localization of a single readable text line. Full-frame
//! detector output is too noisy to trust directly, so the search repeatedly
//! re-detects on shrinking crops of the same frame until exactly one
//! well-shaped line remains, trading extra detector calls for precision.
//!
//! The search remembers its last successful ROI and resumes from it on the
//! next frame; any failure clears that memory so the next frame starts from
//! the centered initial region again.

use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::ZoomSettings;
use crate::detect::{TextDetector, TextLine};
use crate::filter::sanitize_plate_text;
use crate::frame::safe_crop;
use crate::geometry::{
    centered_rect, clamp_to_bounds, expand_horizontally, trim_vertically, PixelRect,
};
use crate::normalize::deskew_line_crop;

/// Outcome of a successful narrowing search. Immutable once produced.
#[derive(Debug, Clone)]
pub struct ZoomResult {
    /// Sanitized candidate text.
    pub text: String,
    /// Deskewed, cropped snapshot of the line.
    pub image: RgbaImage,
    /// The global ROI rectangle the line was found in, clamped to frame
    /// bounds.
    pub rect: PixelRect,
    /// Width of the frame the search ran on.
    pub frame_width: i32,
    /// Height of the frame the search ran on.
    pub frame_height: i32,
}

/// The iterative crop→detect→evaluate search.
pub struct ZoomSearch {
    settings: ZoomSettings,
    min_plate_length: usize,
    max_plate_length: usize,
    /// ROI carried over from the previous successful frame.
    active_rect: Option<PixelRect>,
}

impl ZoomSearch {
    /// Create a search with the given tunables and plate length bounds.
    pub fn new(settings: ZoomSettings, min_plate_length: usize, max_plate_length: usize) -> Self {
        Self {
            settings,
            min_plate_length,
            max_plate_length,
            active_rect: None,
        }
    }

    /// The ROI the next frame will start from, when one is remembered.
    pub fn active_rect(&self) -> Option<PixelRect> {
        self.active_rect
    }

    /// Run the narrowing search on one frame.
    ///
    /// Returns `None` when the step budget runs out, trimming is exhausted,
    /// or the detector fails; all of these are normal per-frame outcomes.
    /// ROI memory is
    /// cleared on failure and updated on progress.
    pub fn run(&mut self, detector: &dyn TextDetector, source: &RgbaImage) -> Option<ZoomResult> {
        let frame_width = source.width() as i32;
        let frame_height = source.height() as i32;
        let mut current = self.active_rect.unwrap_or_else(|| {
            centered_rect(
                frame_width,
                frame_height,
                self.settings.initial_focus_fraction,
                self.settings.min_crop_size,
            )
        });

        let mut step = 0;
        while step < self.settings.max_steps {
            let crop = safe_crop(source, current);
            let lines = match detector.detect(&crop) {
                Ok(lines) => lines,
                Err(err) => {
                    warn!("detector failed during narrowing search: {err}");
                    self.active_rect = None;
                    return None;
                }
            };

            let sanitized_lines: Vec<(TextLine, String)> = lines
                .into_iter()
                .map(|line| {
                    let sanitized = sanitize_plate_text(&line.text);
                    (line, sanitized)
                })
                .filter(|(_, sanitized)| !sanitized.trim().is_empty())
                .collect();

            if sanitized_lines.is_empty() {
                // Nothing readable yet: tighten vertically and retry.
                self.active_rect = None;
                let Some(trimmed) = trim_vertically(
                    current,
                    frame_height,
                    self.settings.vertical_trim_factor,
                    self.settings.min_crop_size,
                ) else {
                    return None;
                };
                current = trimmed;
                self.active_rect = Some(trimmed);
                step += 1;
                continue;
            }

            let single_value = sanitized_lines
                .iter()
                .all(|(_, sanitized)| *sanitized == sanitized_lines[0].1);
            if single_value {
                // Duplicate readings of one value: keep the tallest box.
                let (line, sanitized) = sanitized_lines
                    .into_iter()
                    .max_by_key(|(line, _)| line.bounds.map_or(0, |bounds| bounds.height()))
                    .expect("non-empty checked above");
                let crop_rect = PixelRect::new(0, 0, crop.width() as i32, crop.height() as i32);
                let bounds = line.bounds.unwrap_or(crop_rect);
                let expanded_local = expand_horizontally(
                    bounds,
                    crop.width() as i32,
                    self.settings.min_plate_aspect,
                    self.settings.horizontal_expansion_factor,
                );
                let global = expanded_local.translated(current.left, current.top);
                let clamped_global = clamp_to_bounds(global, frame_width, frame_height);

                let len = sanitized.chars().count();
                if len >= self.min_plate_length && len <= self.max_plate_length {
                    debug!(
                        "narrowing search converged on {sanitized:?} after {} steps",
                        step + 1
                    );
                    let image = deskew_line_crop(&crop, &line);
                    self.active_rect = Some(clamped_global);
                    return Some(ZoomResult {
                        text: sanitized,
                        image,
                        rect: clamped_global,
                        frame_width,
                        frame_height,
                    });
                }

                // Right place, wrong length: adopt the expanded box and keep
                // sharpening.
                self.active_rect = Some(clamped_global);
                current = clamped_global;
                step += 1;
                continue;
            }

            // Multiple readable lines: still too coarse for a single-line
            // hypothesis.
            let Some(trimmed) = trim_vertically(
                current,
                frame_height,
                self.settings.vertical_trim_factor,
                self.settings.min_crop_size,
            ) else {
                self.active_rect = None;
                return None;
            };
            current = trimmed;
            self.active_rect = Some(trimmed);
            step += 1;
        }

        debug!("narrowing search exhausted its step budget");
        self.active_rect = None;
        None
    }

    /// Forget the remembered ROI; the next frame starts from scratch.
    pub fn reset(&mut self) {
        self.active_rect = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorError;
    use image::Rgba;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn solid(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]))
    }

    fn search() -> ZoomSearch {
        ZoomSearch::new(ZoomSettings::default(), 5, 7)
    }

    /// Detector that returns the same lines on every call.
    struct FixedDetector {
        lines: Vec<TextLine>,
        calls: AtomicU32,
    }

    impl FixedDetector {
        fn new(lines: Vec<TextLine>) -> Self {
            Self {
                lines,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl TextDetector for FixedDetector {
        fn detect(&self, _image: &RgbaImage) -> Result<Vec<TextLine>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.lines.clone())
        }
    }

    struct FailingDetector;

    impl TextDetector for FailingDetector {
        fn detect(&self, _image: &RgbaImage) -> Result<Vec<TextLine>, DetectorError> {
            Err(DetectorError::Backend("synthetic failure".into()))
        }
    }

    #[test]
    fn test_single_valid_line_converges_in_one_step() {
        let source = solid(1000, 1000);
        let line_box = PixelRect::new(300, 400, 600, 460);
        let detector = FixedDetector::new(vec![TextLine::new("AB12345", line_box)]);
        let mut s = search();

        let result = s.run(&detector, &source).expect("search must succeed");
        assert_eq!(result.text, "AB12345");
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.frame_width, 1000);
        assert_eq!(result.frame_height, 1000);

        // The returned global rectangle contains the line's box translated
        // to frame coordinates (initial ROI starts at 75,75 for a 0.85
        // centered fraction).
        let roi_origin = centered_rect(1000, 1000, 0.85, 64);
        let global_line = line_box.translated(roi_origin.left, roi_origin.top);
        assert!(result.rect.contains(&global_line), "{:?} vs {:?}", result.rect, global_line);
        assert_eq!(s.active_rect(), Some(result.rect));
    }

    #[test]
    fn test_duplicate_readings_keep_tallest_box() {
        let source = solid(1000, 1000);
        let detector = FixedDetector::new(vec![
            TextLine::new("AB12345", PixelRect::new(300, 400, 600, 430)),
            TextLine::new("ab-12345", PixelRect::new(300, 400, 600, 480)),
        ]);
        let mut s = search();
        // Both lines sanitize to the same value, so they count as one
        // reading; the taller box drives the result rectangle.
        let result = s.run(&detector, &source).expect("search must succeed");
        assert_eq!(result.text, "AB12345");
        assert_eq!(result.rect.height(), 80);
    }

    #[test]
    fn test_no_lines_exhausts_trim_and_fails() {
        let source = solid(1000, 1000);
        let detector = FixedDetector::new(vec![]);
        let mut s = search();
        assert!(s.run(&detector, &source).is_none());
        assert!(s.active_rect().is_none());
        // Trimming happens at most once per step.
        assert!(detector.calls.load(Ordering::SeqCst) <= 6);
    }

    #[test]
    fn test_detector_error_is_recoverable_none() {
        let source = solid(1000, 1000);
        let mut s = search();
        assert!(s.run(&FailingDetector, &source).is_none());
        assert!(s.active_rect().is_none());
    }

    #[test]
    fn test_wrong_length_line_keeps_iterating_then_fails() {
        let source = solid(1000, 1000);
        let detector = FixedDetector::new(vec![TextLine::new(
            "AB1",
            PixelRect::new(300, 400, 600, 460),
        )]);
        let mut s = search();
        // The single line is plausible in position but never in length, so
        // the search adopts its box each step and runs out of budget.
        assert!(s.run(&detector, &source).is_none());
        assert_eq!(detector.calls.load(Ordering::SeqCst), 6);
        assert!(s.active_rect().is_none());
    }

    #[test]
    fn test_multiple_lines_trigger_trim() {
        let source = solid(1000, 1000);
        let detector = FixedDetector::new(vec![
            TextLine::new("AB12345", PixelRect::new(100, 100, 400, 160)),
            TextLine::new("CD67890", PixelRect::new(100, 500, 400, 560)),
        ]);
        let mut s = search();
        // Both lines stay in every trimmed crop here, so the search can
        // never isolate one and must give up within budget.
        assert!(s.run(&detector, &source).is_none());
        assert!(detector.calls.load(Ordering::SeqCst) <= 6);
    }

    #[test]
    fn test_resumes_from_previous_roi() {
        let source = solid(1000, 1000);
        let line_box = PixelRect::new(300, 400, 600, 460);
        let detector = FixedDetector::new(vec![TextLine::new("AB12345", line_box)]);
        let mut s = search();
        let first = s.run(&detector, &source).unwrap();
        let second = s.run(&detector, &source).unwrap();
        // Second run starts from the remembered ROI, not the centered one.
        assert_eq!(second.text, "AB12345");
        assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
        let _ = first;
    }

    #[test]
    fn test_blank_after_sanitization_counts_as_no_line() {
        let source = solid(1000, 1000);
        let detector = FixedDetector::new(vec![TextLine::new(
            "---  !!",
            PixelRect::new(300, 400, 600, 460),
        )]);
        let mut s = search();
        assert!(s.run(&detector, &source).is_none());
    }
}
