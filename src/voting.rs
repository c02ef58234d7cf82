//! Temporal voting for the narrowing-search track
//!
//! Narrowing-search results vote into a window that a periodic timer
//! evaluates and clears. Candidates that accumulate enough votes raise a
//! confirmation prompt; the prompt state is explicit so the single-flight
//! invariant lives in one place instead of scattered flags.

use image::RgbaImage;
use std::collections::BTreeMap;
use tracing::debug;

use crate::geometry::PixelRect;

/// A narrowing-search observation offered to the voting window.
#[derive(Debug, Clone)]
pub struct PlateDetection {
    /// Sanitized candidate text.
    pub text: String,
    /// Area of the global ROI rectangle the candidate came from.
    pub area: i64,
    /// Normalized snapshot of the line.
    pub image: RgbaImage,
    /// Global ROI rectangle in frame coordinates.
    pub rect: PixelRect,
    /// Normalized distance of the ROI center from the frame center.
    pub center_distance: f32,
}

/// Running vote state for one candidate string within the current window.
#[derive(Debug, Clone, Default)]
pub struct WindowPlateEntry {
    /// Votes accumulated in this window.
    pub count: u32,
    /// Largest observed ROI area.
    pub best_area: i64,
    /// Snapshot from the largest-area observation.
    pub image: Option<RgbaImage>,
    /// Smallest observed center distance.
    pub center_distance: f32,
}

/// Snapshot captured when a confirmation prompt is raised.
///
/// The window clears on every evaluation tick, so the prompt resolves
/// against this snapshot rather than the live window state.
#[derive(Debug, Clone)]
pub struct PromptCandidate {
    /// Sanitized candidate text.
    pub text: String,
    /// Best area at raise time.
    pub area: i64,
    /// Best snapshot at raise time.
    pub image: RgbaImage,
}

/// The window evaluation winner offered to the registry.
#[derive(Debug, Clone)]
pub struct WindowWinner {
    pub text: String,
    pub area: i64,
    pub image: RgbaImage,
}

/// The window-vote track.
///
/// Entries are keyed by sanitized text in a `BTreeMap`, so ties between
/// equal vote counts resolve deterministically to the lexicographically
/// smallest string.
pub struct WindowVoting {
    window: BTreeMap<String, WindowPlateEntry>,
    min_plate_length: usize,
    max_plate_length: usize,
    confirmation_threshold: u32,
    /// Candidate currently awaiting operator confirmation, if any.
    /// Acts as the single-flight guard: no second prompt while set.
    pending_prompt: Option<String>,
}

impl WindowVoting {
    /// Create a voting window with the given plate bounds and threshold.
    pub fn new(min_plate_length: usize, max_plate_length: usize, confirmation_threshold: u32) -> Self {
        Self {
            window: BTreeMap::new(),
            min_plate_length,
            max_plate_length,
            confirmation_threshold,
            pending_prompt: None,
        }
    }

    /// Record one observation: vote +1, best area and snapshot kept by
    /// max-area, center distance kept by minimum.
    pub fn record(&mut self, detection: PlateDetection) {
        let text = detection.text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let entry = self.window.entry(text).or_insert_with(|| WindowPlateEntry {
            center_distance: f32::MAX,
            ..Default::default()
        });
        entry.count += 1;
        if detection.area > entry.best_area {
            entry.best_area = detection.area;
            entry.image = Some(detection.image);
        }
        entry.center_distance = entry.center_distance.min(detection.center_distance);
    }

    /// Pick a candidate for a confirmation prompt, honoring single-flight.
    ///
    /// Returns `None` while a prompt is outstanding. Otherwise the entry
    /// with the highest vote count among those at or above the threshold,
    /// holding a snapshot and not already confirmed, is snapshotted and
    /// marked pending.
    pub fn take_prompt_candidate(
        &mut self,
        is_already_confirmed: impl Fn(&str) -> bool,
    ) -> Option<PromptCandidate> {
        if self.pending_prompt.is_some() {
            return None;
        }
        let mut best: Option<(&String, &WindowPlateEntry)> = None;
        for (text, entry) in &self.window {
            if entry.count < self.confirmation_threshold
                || entry.image.is_none()
                || is_already_confirmed(text)
            {
                continue;
            }
            // Strictly greater keeps the first (smallest) key on ties.
            if best.map_or(true, |(_, current)| entry.count > current.count) {
                best = Some((text, entry));
            }
        }
        let (text, entry) = best?;
        let candidate = PromptCandidate {
            text: text.clone(),
            area: entry.best_area,
            image: entry.image.clone().expect("candidate entries hold a snapshot"),
        };
        debug!(
            "window track requesting confirmation for {:?} ({} votes)",
            candidate.text, entry.count
        );
        self.pending_prompt = Some(candidate.text.clone());
        Some(candidate)
    }

    /// True while a prompt raised by this track awaits resolution.
    pub fn prompt_outstanding(&self) -> bool {
        self.pending_prompt.is_some()
    }

    /// The candidate currently awaiting confirmation, if any.
    pub fn pending_candidate(&self) -> Option<&str> {
        self.pending_prompt.as_deref()
    }

    /// Votes recorded for a candidate in the current window.
    pub fn votes(&self, text: &str) -> u32 {
        self.window.get(text).map_or(0, |entry| entry.count)
    }

    /// Release the single-flight guard after the prompt resolved.
    pub fn resolve_prompt(&mut self) {
        self.pending_prompt = None;
    }

    /// Drop one candidate's vote state (prompt rejected or cancelled).
    pub fn clear_candidate(&mut self, text: &str) {
        self.window.remove(text);
    }

    /// Evaluate and clear the current window.
    ///
    /// Among entries whose key length is within plate bounds, the highest
    /// vote count wins (ties to the lexicographically smallest key); the
    /// winner is returned with its snapshot if it has one. The whole window
    /// clears unconditionally, starting a fresh voting period.
    pub fn evaluate(&mut self) -> Option<WindowWinner> {
        let mut winner: Option<(&String, &WindowPlateEntry)> = None;
        for (text, entry) in &self.window {
            let len = text.chars().count();
            if len < self.min_plate_length || len > self.max_plate_length {
                continue;
            }
            if winner.map_or(true, |(_, current)| entry.count > current.count) {
                winner = Some((text, entry));
            }
        }
        let result = winner.and_then(|(text, entry)| {
            entry.image.clone().map(|image| WindowWinner {
                text: text.clone(),
                area: entry.best_area,
                image,
            })
        });
        self.window.clear();
        result
    }

    /// Current window entries ranked by vote count descending, then by
    /// smallest center distance.
    pub fn ranking(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<(&String, &WindowPlateEntry)> = self.window.iter().collect();
        entries.sort_by(|(_, a), (_, b)| {
            b.count.cmp(&a.count).then(
                a.center_distance
                    .partial_cmp(&b.center_distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        entries
            .into_iter()
            .map(|(text, entry)| (text.clone(), entry.count))
            .collect()
    }

    /// True when no votes have been recorded in the current window.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
