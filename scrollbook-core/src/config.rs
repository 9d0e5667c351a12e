use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::tracker::TrackerParams;

/// Tunables of the reader. Every field is optional in `config.toml`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub navigation_window: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub restore_settle: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub save_debounce: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub status_clear: Duration,
    pub reference_ratio: f32,
    pub short_chapter_ratio: f32,
    pub top_band: f32,
    pub top_up_slack: f32,
    pub near_bottom_min: f32,
    pub near_bottom_ratio: f32,
    pub near_top: f32,
    pub user_scroll_threshold: f32,
    pub navigation_release_scroll: f32,
    pub correction_tolerance: f32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            navigation_window: Duration::from_millis(500),
            restore_settle: Duration::from_millis(800),
            save_debounce: Duration::from_millis(500),
            status_clear: Duration::from_millis(1500),
            reference_ratio: 0.5,
            short_chapter_ratio: 0.5,
            top_band: 80.0,
            top_up_slack: 100.0,
            near_bottom_min: 600.0,
            near_bottom_ratio: 0.4,
            near_top: 400.0,
            user_scroll_threshold: 200.0,
            navigation_release_scroll: 150.0,
            correction_tolerance: 2.0,
        }
    }
}

impl ReaderConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn tracker(&self) -> TrackerParams {
        TrackerParams {
            reference_ratio: self.reference_ratio,
            short_chapter_ratio: self.short_chapter_ratio,
            top_band: self.top_band,
        }
    }

    /// Remaining distance below which the next chapter is appended.
    pub fn near_bottom_threshold(&self, client_height: f32) -> f32 {
        self.near_bottom_min.max(client_height * self.near_bottom_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ReaderConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "navigation_window = 750\nreference_ratio = 0.6\n").unwrap();

        let config = ReaderConfig::load(&path).unwrap();
        assert_eq!(config.navigation_window, Duration::from_millis(750));
        assert_eq!(config.reference_ratio, 0.6);
        assert_eq!(config.restore_settle, Duration::from_millis(800));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "navigation_window = \"soon\"").unwrap();
        assert!(ReaderConfig::load(&path).is_err());
    }

    #[test]
    fn near_bottom_threshold_takes_the_larger_bound() {
        let config = ReaderConfig::default();
        assert_eq!(config.near_bottom_threshold(500.0), 600.0);
        assert_eq!(config.near_bottom_threshold(2000.0), 800.0);
    }
}
