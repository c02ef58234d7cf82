//! Plate candidate filtering
//!
//! Narrows full-frame detector output down to a single plausible plate
//! string per frame. Two mechanisms live here: the visibility window filter,
//! which restricts results to the on-screen window mapped into frame space,
//! and the candidate selection algorithm, which prefers centered plate-like
//! tokens over noise and falls back to a shrinking horizontal-band
//! consensus. The algorithm-path vote counters also live here, since they
//! operate purely on the strings this module produces.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::{FilterSettings, PlateSettings};
use crate::detect::TextLine;
use crate::geometry::{center_distance, PixelRect};

/// Known non-plate tokens excluded from priority candidate selection.
/// U.S. state names as they commonly appear printed on plates.
const NOISE_WORDS: &[&str] = &[
    "ALABAMA",
    "ALASKA",
    "ARIZONA",
    "ARKANSAS",
    "CALIFORNIA",
    "COLORADO",
    "CONNECTICUT",
    "DELAWARE",
    "FLORIDA",
    "GEORGIA",
    "HAWAII",
    "IDAHO",
    "ILLINOIS",
    "INDIANA",
    "IOWA",
    "KANSAS",
    "KENTUCKY",
    "LOUISIANA",
    "MAINE",
    "MARYLAND",
    "MASSACHUSETTS",
    "MICHIGAN",
    "MINNESOTA",
    "MISSISSIPPI",
    "MISSOURI",
    "MONTANA",
    "NEBRASKA",
    "NEVADA",
    "NEW HAMPSHIRE",
    "NEW JERSEY",
    "NEW MEXICO",
    "NEW YORK",
    "NORTH CAROLINA",
    "NORTH DAKOTA",
    "OHIO",
    "OKLAHOMA",
    "OREGON",
    "PENNSYLVANIA",
    "RHODE ISLAND",
    "SOUTH CAROLINA",
    "SOUTH DAKOTA",
    "TENNESSEE",
    "TEXAS",
    "UTAH",
    "VERMONT",
    "VIRGINIA",
    "WASHINGTON",
    "WEST VIRGINIA",
    "WISCONSIN",
    "WYOMING",
];

/// Uppercase the input and drop everything that is not alphanumeric.
///
/// Idempotent; the same rules apply to detector output and operator edits.
pub fn sanitize_plate_text(text: &str) -> String {
    text.to_uppercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Near-miss check for two plate reads: lengths within 2 of each other and
/// edit distance 1..=2. Identical strings are not "similar", they are equal.
pub fn is_similar_text(first: &str, second: &str) -> bool {
    if first.chars().count().abs_diff(second.chars().count()) > 2 {
        return false;
    }
    let distance = strsim::levenshtein(first, second);
    (1..=2).contains(&distance)
}

/// A confirmation request produced by the algorithm-path vote counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmPrompt {
    /// The candidate as the detector reported it.
    pub display_value: String,
    /// The sanitized candidate the state machine keys on.
    pub sanitized_value: String,
}

/// Per-frame plate filtering and the algorithm-path vote state.
pub struct PlateFilter {
    min_plate_length: usize,
    max_plate_length: usize,
    min_vertical_fraction: f32,
    min_horizontal_fraction: f32,
    algorithm_confirmation_threshold: u32,
    vertical_fraction: f32,
    horizontal_fraction: f32,
    preview_width: i32,
    preview_height: i32,
    algorithm_counts: HashMap<String, u32>,
    algorithm_prompted: HashSet<String>,
    noise_words: HashSet<String>,
}

impl PlateFilter {
    /// Create a filter from plate and window settings.
    pub fn new(plate: &PlateSettings, filter: &FilterSettings) -> Self {
        let noise_words = NOISE_WORDS
            .iter()
            .map(|word| sanitize_plate_text(word))
            .collect();
        Self {
            min_plate_length: plate.min_length,
            max_plate_length: plate.max_length,
            min_vertical_fraction: filter.min_vertical_fraction,
            min_horizontal_fraction: filter.min_horizontal_fraction,
            algorithm_confirmation_threshold: plate.algorithm_confirmation_threshold,
            vertical_fraction: 1.0,
            horizontal_fraction: 1.0,
            preview_width: 0,
            preview_height: 0,
            algorithm_counts: HashMap::new(),
            algorithm_prompted: HashSet::new(),
            noise_words,
        }
    }

    /// Current vertical visible fraction.
    pub fn vertical_fraction(&self) -> f32 {
        self.vertical_fraction
    }

    /// Current horizontal visible fraction.
    pub fn horizontal_fraction(&self) -> f32 {
        self.horizontal_fraction
    }

    /// Record the on-screen preview size used for window mapping.
    /// Zero or negative dimensions disable the display-space mapping.
    pub fn update_preview_size(&mut self, width: i32, height: i32) {
        self.preview_width = width;
        self.preview_height = height;
    }

    /// Set the vertical visible fraction, clamped to the configured minimum.
    pub fn update_vertical_fraction(&mut self, fraction: f32) {
        self.vertical_fraction = fraction.clamp(self.min_vertical_fraction, 1.0);
    }

    /// Set the horizontal visible fraction, clamped to the configured minimum.
    pub fn update_horizontal_fraction(&mut self, fraction: f32) {
        self.horizontal_fraction = fraction.clamp(self.min_horizontal_fraction, 1.0);
    }

    /// Restrict detector output to the visible window.
    ///
    /// A line is in the window iff its box center, normalized to frame
    /// space, falls inside the mapped window on both axes. In-window line
    /// texts are newline-joined in their original order. Degenerate frame
    /// dimensions fall back to the detector's raw full text.
    pub fn filter_visible_text(
        &self,
        lines: &[TextLine],
        image_width: i32,
        image_height: i32,
    ) -> Option<String> {
        if image_width <= 0 || image_height <= 0 {
            return raw_full_text(lines);
        }
        let window = self.image_window_bounds(image_width, image_height);
        let mut in_window = Vec::new();
        for line in lines {
            let Some(bounds) = line.bounds else { continue };
            let center_x = bounds.center_x() as f32 / image_width as f32;
            let center_y = bounds.center_y() as f32 / image_height as f32;
            if center_y >= window.top
                && center_y <= window.bottom
                && center_x >= window.left
                && center_x <= window.right
            {
                let content = line.text.trim();
                if !content.is_empty() {
                    in_window.push(content.to_string());
                }
            }
        }
        if in_window.is_empty() {
            return None;
        }
        Some(in_window.join("\n"))
    }

    /// Pick the single best plate-like string for a frame.
    ///
    /// Priority pass: sanitized length in `[4, 7]`, not a noise word,
    /// closest to frame center. Fallback: a horizontal band starting at the
    /// middle third shrinks until it holds exactly one distinct text value.
    pub fn compute_algorithm_result(
        &self,
        lines: &[TextLine],
        image_width: i32,
        image_height: i32,
    ) -> Option<String> {
        if image_width <= 0 || image_height <= 0 {
            return raw_full_text(lines);
        }
        let candidates: Vec<(&str, PixelRect)> = lines
            .iter()
            .filter_map(|line| {
                let bounds = line.bounds?;
                if bounds.is_empty() {
                    return None;
                }
                let text = line.text.trim();
                if text.is_empty() {
                    None
                } else {
                    Some((text, bounds))
                }
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let prioritized: Vec<&(&str, PixelRect)> = candidates
            .iter()
            .filter(|(text, _)| {
                let sanitized = sanitize_plate_text(text);
                (4..=7).contains(&sanitized.chars().count())
                    && !self.noise_words.contains(&sanitized)
            })
            .collect();
        if let Some((text, _)) = prioritized.iter().min_by(|(_, a), (_, b)| {
            let da = center_distance(a, image_width, image_height);
            let db = center_distance(b, image_width, image_height);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        }) {
            debug!("priority pass selected candidate {text:?}");
            return Some(text.to_string());
        }

        // Shrinking horizontal-band consensus.
        let mut top = 1.0 / 3.0;
        let mut bottom = 2.0 / 3.0;
        let min_height = 0.05f32;
        let shrink_step = 0.05f32;
        for iteration in 0..20 {
            let in_band: Vec<&str> = candidates
                .iter()
                .filter(|(_, bounds)| {
                    let center_y = bounds.center_y() as f32 / image_height as f32;
                    center_y >= top && center_y <= bottom
                })
                .map(|(text, _)| *text)
                .collect();
            let mut unique: Vec<&str> = Vec::new();
            for text in &in_band {
                if !unique.contains(text) {
                    unique.push(text);
                }
            }
            if unique.len() == 1 {
                return Some(unique[0].to_string());
            }
            if unique.is_empty() && iteration == 0 {
                return Some(candidates[0].0.to_string());
            }
            if bottom - top <= min_height {
                return Some(unique.first().unwrap_or(&candidates[0].0).to_string());
            }
            top += shrink_step / 2.0;
            bottom -= shrink_step / 2.0;
            if top >= bottom {
                return Some(unique.first().unwrap_or(&candidates[0].0).to_string());
            }
        }
        Some(candidates[0].0.to_string())
    }

    /// Count an algorithm-path result and decide whether to request
    /// confirmation.
    ///
    /// Non-blank sanitized results within length bounds and not already
    /// confirmed each increment a per-string counter; reaching the threshold
    /// the first time yields a prompt. Already-confirmed strings have their
    /// vote state dropped instead.
    pub fn register_algorithm_result(
        &mut self,
        raw_result: Option<&str>,
        is_already_confirmed: impl Fn(&str) -> bool,
    ) -> Option<AlgorithmPrompt> {
        let raw = raw_result?.trim();
        if raw.is_empty() {
            return None;
        }
        let sanitized = sanitize_plate_text(raw);
        if sanitized.is_empty() {
            return None;
        }
        if is_already_confirmed(&sanitized) {
            self.reset_candidate(&sanitized);
            return None;
        }
        if !self.length_in_bounds(&sanitized) {
            return None;
        }
        let count = self.algorithm_counts.entry(sanitized.clone()).or_insert(0);
        *count += 1;
        if *count >= self.algorithm_confirmation_threshold
            && self.algorithm_prompted.insert(sanitized.clone())
        {
            debug!("algorithm track requesting confirmation for {sanitized:?}");
            return Some(AlgorithmPrompt {
                display_value: raw.to_string(),
                sanitized_value: sanitized,
            });
        }
        None
    }

    /// Clear a candidate's algorithm-path vote state so it can re-accumulate.
    pub fn reset_candidate(&mut self, sanitized: &str) {
        self.algorithm_counts.remove(sanitized);
        self.algorithm_prompted.remove(sanitized);
    }

    /// Algorithm-path votes recorded for a candidate.
    pub fn algorithm_votes(&self, sanitized: &str) -> u32 {
        self.algorithm_counts.get(sanitized).copied().unwrap_or(0)
    }

    /// True if the algorithm track has prompted for this candidate and the
    /// candidate has not been reset since.
    pub fn is_prompted(&self, sanitized: &str) -> bool {
        self.algorithm_prompted.contains(sanitized)
    }

    /// True if the sanitized length is within the configured plate bounds.
    pub fn length_in_bounds(&self, sanitized: &str) -> bool {
        let len = sanitized.chars().count();
        len >= self.min_plate_length && len <= self.max_plate_length
    }

    /// Map the configured visible fractions into normalized frame space.
    ///
    /// The preview shows a center-crop scale-to-fill view of the frame, so
    /// display fractions go through that transform. Degenerate preview
    /// dimensions fall back to unmapped frame-space fractions.
    fn image_window_bounds(&self, image_width: i32, image_height: i32) -> NormalizedWindow {
        let top = (1.0 - self.vertical_fraction) / 2.0;
        let bottom = 1.0 - top;
        let left = (1.0 - self.horizontal_fraction) / 2.0;
        let right = 1.0 - left;
        if self.preview_width <= 0
            || self.preview_height <= 0
            || image_width <= 0
            || image_height <= 0
        {
            return NormalizedWindow {
                left,
                top,
                right,
                bottom,
            };
        }
        let image_w = image_width as f32;
        let image_h = image_height as f32;
        let view_w = self.preview_width as f32;
        let view_h = self.preview_height as f32;
        let scale = (view_w / image_w).max(view_h / image_h);
        let crop_x = (image_w * scale - view_w) / 2.0;
        let crop_y = (image_h * scale - view_h) / 2.0;
        let horizontal = |fraction: f32| ((fraction * view_w + crop_x) / scale / image_w).clamp(0.0, 1.0);
        let vertical = |fraction: f32| ((fraction * view_h + crop_y) / scale / image_h).clamp(0.0, 1.0);
        NormalizedWindow {
            left: horizontal(left),
            right: horizontal(right),
            top: vertical(top),
            bottom: vertical(bottom),
        }
    }
}

/// Whole-output fallback: every line's text joined by newlines.
fn raw_full_text(lines: &[TextLine]) -> Option<String> {
    let text = lines
        .iter()
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// A visible window in normalized `[0, 1]` frame coordinates.
#[derive(Debug, Clone, Copy)]
struct NormalizedWindow {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}
