//! Engine configuration
//!
//! All tunables of the pipeline, stored in TOML format. Defaults match the
//! values the engine was calibrated with.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Plate string constraints and confirmation thresholds.
    pub plate: PlateSettings,
    /// ROI narrowing search tunables.
    pub zoom: ZoomSettings,
    /// Visibility window filter tunables.
    pub filter: FilterSettings,
    /// Voting window timing.
    pub window: WindowSettings,
    /// Snapshot similarity scoring.
    pub similarity: SimilaritySettings,
}

/// Plate string constraints and confirmation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateSettings {
    /// Minimum sanitized plate length (inclusive).
    pub min_length: usize,
    /// Maximum sanitized plate length (inclusive).
    pub max_length: usize,
    /// Vote count at which the window track requests confirmation.
    pub confirmation_threshold: u32,
    /// Vote count at which the algorithm track requests confirmation.
    pub algorithm_confirmation_threshold: u32,
}

impl Default for PlateSettings {
    fn default() -> Self {
        Self {
            min_length: 5,
            max_length: 7,
            confirmation_threshold: 2,
            algorithm_confirmation_threshold: 3,
        }
    }
}

/// ROI narrowing search tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoomSettings {
    /// Maximum crop→detect iterations per frame.
    pub max_steps: u32,
    /// Minimum crop dimension in pixels.
    pub min_crop_size: i32,
    /// Minimum width/height ratio a plate line box is expanded to.
    pub min_plate_aspect: f32,
    /// Horizontal widening applied to a single detected line box.
    pub horizontal_expansion_factor: f32,
    /// Fraction of the frame covered by the initial centered ROI.
    pub initial_focus_fraction: f32,
    /// Height multiplier applied on each vertical trim.
    pub vertical_trim_factor: f32,
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self {
            max_steps: 6,
            min_crop_size: 64,
            min_plate_aspect: 2.0,
            horizontal_expansion_factor: 1.3,
            initial_focus_fraction: 0.85,
            vertical_trim_factor: 0.85,
        }
    }
}

/// Visibility window filter tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Smallest allowed vertical visible fraction.
    pub min_vertical_fraction: f32,
    /// Smallest allowed horizontal visible fraction.
    pub min_horizontal_fraction: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_vertical_fraction: 0.3,
            min_horizontal_fraction: 0.3,
        }
    }
}

/// Voting window timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Period of the window evaluation timer in milliseconds.
    pub interval_ms: u64,
    /// Retention of the recent-detection history in milliseconds.
    pub recent_retention_ms: u64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            interval_ms: 300,
            recent_retention_ms: 5_000,
        }
    }
}

/// Snapshot similarity scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilaritySettings {
    /// Similarity above which a recapture replaces the stored snapshot.
    pub threshold: f32,
    /// Side length of the square sample grid both images are scaled to.
    pub sample_size: u32,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            sample_size: 32,
        }
    }
}

/// Load configuration from file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file.
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
