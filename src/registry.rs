//! Confirmed plate registry
//!
//! The session-lifetime set of operator-confirmed plate strings, each with
//! its best supporting snapshot. Votes alone never write here: a string must
//! be in the confirmed-set first. Snapshot replacement prefers a larger
//! capture but also accepts a visually near-identical recapture.

use image::RgbaImage;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::SimilaritySettings;
use crate::frame::scale_to;

/// A registry record: the best snapshot seen for a confirmed plate.
#[derive(Debug, Clone)]
pub struct PlateEntry {
    /// Best supporting snapshot.
    pub image: RgbaImage,
    /// Area of the ROI that snapshot came from.
    pub area: i64,
}

/// The confirmed-set plus the per-plate best snapshots.
pub struct PlateRegistry {
    entries: BTreeMap<String, PlateEntry>,
    confirmed: BTreeSet<String>,
    similarity_threshold: f32,
    sample_size: u32,
}

impl PlateRegistry {
    /// Create an empty registry.
    pub fn new(similarity: &SimilaritySettings) -> Self {
        Self {
            entries: BTreeMap::new(),
            confirmed: BTreeSet::new(),
            similarity_threshold: similarity.threshold,
            sample_size: similarity.sample_size,
        }
    }

    /// Add a string to the confirmed-set.
    pub fn confirm(&mut self, text: &str) {
        if self.confirmed.insert(text.to_string()) {
            info!("plate {text:?} confirmed");
        }
    }

    /// True if the string has passed confirmation.
    pub fn is_confirmed(&self, text: &str) -> bool {
        self.confirmed.contains(text)
    }

    /// Insert or update the snapshot for a confirmed plate.
    ///
    /// A no-op for unconfirmed strings. An existing entry is replaced iff
    /// the new area is strictly larger, or the snapshots are visually
    /// similar above the threshold (a confirmatory recapture).
    pub fn insert_or_update(&mut self, text: &str, area: i64, image: RgbaImage) {
        if !self.confirmed.contains(text) {
            return;
        }
        match self.entries.get(text) {
            Some(existing) => {
                if self.should_replace(existing, area, &image) {
                    debug!("replacing snapshot for {text:?} (area {} -> {})", existing.area, area);
                    self.entries.insert(text.to_string(), PlateEntry { image, area });
                }
            }
            None => {
                self.entries.insert(text.to_string(), PlateEntry { image, area });
            }
        }
    }

    /// Remove a plate: drops the registry entry and the confirmed-set
    /// membership together.
    pub fn remove(&mut self, text: &str) -> Option<PlateEntry> {
        self.confirmed.remove(text);
        let removed = self.entries.remove(text);
        if removed.is_some() {
            info!("plate {text:?} removed");
        }
        removed
    }

    /// Look up the entry for a plate.
    pub fn get(&self, text: &str) -> Option<&PlateEntry> {
        self.entries.get(text)
    }

    /// Registered plate strings in sorted order.
    pub fn plates(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Sorted, newline-joined plate list for export.
    pub fn share_list(&self) -> String {
        self.plates().join("\n")
    }

    /// Number of registered plates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no plates are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn should_replace(&self, existing: &PlateEntry, new_area: i64, new_image: &RgbaImage) -> bool {
        if new_area > existing.area {
            return true;
        }
        similarity_score(&existing.image, new_image, self.sample_size) > self.similarity_threshold
    }
}

/// Visual similarity of two images in `[0, 1]`, higher meaning more alike.
///
/// Both images are scaled to a fixed square sample grid; the score is one
/// minus the sum of absolute per-channel RGB differences normalized by the
/// maximum possible difference. Zero-dimension inputs score 0.
pub fn similarity_score(first: &RgbaImage, second: &RgbaImage, sample_size: u32) -> f32 {
    if first.width() == 0 || first.height() == 0 || second.width() == 0 || second.height() == 0 {
        return 0.0;
    }
    let a = scale_to(first, sample_size, sample_size);
    let b = scale_to(second, sample_size, sample_size);
    let mut diff_sum: i64 = 0;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        // Alpha is ignored; snapshots are opaque.
        for channel in 0..3 {
            diff_sum += (pa.0[channel] as i64 - pb.0[channel] as i64).abs();
        }
    }
    let max_diff = (sample_size as i64) * (sample_size as i64) * 255 * 3;
    let similarity = 1.0 - diff_sum as f32 / max_diff as f32;
    similarity.clamp(0.0, 1.0)
}
