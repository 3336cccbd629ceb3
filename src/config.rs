// Engine configuration
// Immutable settings passed into every component call; loadable from TOML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::confirm::ConfirmMode;
use crate::events::DetectorStrategy;

/// A UTC offset must stay strictly within one day
const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub mapping: MappingConfig,
    pub confirmation: ConfirmationConfig,
    pub calibration: CalibrationConfig,
    pub trace: TraceConfig,
}

impl AppConfig {
    /// Parse a TOML document; missing fields fall back to defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Reject settings that would make detection meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;

        if d.threshold_pct <= 0.0 || !d.threshold_pct.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "threshold_pct must be positive, got {}",
                d.threshold_pct
            )));
        }
        if !(0.0..=1.0).contains(&d.merge_fraction) {
            return Err(ConfigError::Invalid(format!(
                "merge_fraction must be within [0, 1], got {}",
                d.merge_fraction
            )));
        }
        if d.edge_window == 0 {
            return Err(ConfigError::Invalid("edge_window must be at least 1".into()));
        }
        if d.daytime.start_hour > 23 || d.daytime.end_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "daytime hours must be within 0..=23, got {}..={}",
                d.daytime.start_hour, d.daytime.end_hour
            )));
        }
        if d.daytime.start_hour > d.daytime.end_hour {
            return Err(ConfigError::Invalid(format!(
                "daytime window start {} is after end {}",
                d.daytime.start_hour, d.daytime.end_hour
            )));
        }
        if d.utc_offset_minutes.unsigned_abs() >= MINUTES_PER_DAY {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes must be within ±{}, got {}",
                MINUTES_PER_DAY - 1,
                d.utc_offset_minutes
            )));
        }

        Ok(())
    }
}

/// Settings for smoothing, change detection and event resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Which change detection strategy to run
    pub strategy: DetectorStrategy,

    /// Half-width of the centered moving average
    pub smoothing_window: usize,

    /// Windowed-drop threshold as a percentage of the series Y-range
    pub threshold_pct: f64,

    /// Samples averaged on each side of a candidate index (windowed-drop)
    pub edge_window: usize,

    /// Absolute minimum surge threshold
    /// Keeps very flat days from flagging sensor jitter
    pub surge_abs_floor: f64,

    /// Surge threshold as a fraction of the Y-range
    pub surge_rel_factor: f64,

    /// Detections closer than this fraction of the series length are merged
    pub merge_fraction: f64,

    /// Fixed lookback for the start search (windowed-drop)
    pub drop_lookback: usize,

    /// Maximum valley trace-back (surge)
    pub surge_trace_back: usize,

    /// Forward search length for the event end
    pub lookforward: usize,

    /// Boundary searches never cross a timestamp gap longer than this
    pub max_gap_secs: f64,

    /// Admissible hours for surge events
    pub daytime: DaytimeWindow,

    /// Offset of the farm's local time from UTC, in minutes
    pub utc_offset_minutes: i32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            strategy: DetectorStrategy::WindowedDrop,
            smoothing_window: 3,
            threshold_pct: 8.0,
            edge_window: 10,
            surge_abs_floor: 0.015,
            surge_rel_factor: 0.01,
            merge_fraction: 0.10,
            drop_lookback: 20,
            surge_trace_back: 120,
            lookforward: 30,
            max_gap_secs: 20.0 * 60.0,
            daytime: DaytimeWindow::default(),
            utc_offset_minutes: 0,
        }
    }
}

impl DetectionConfig {
    /// Default settings with a different strategy
    pub fn with_strategy(strategy: DetectorStrategy) -> Self {
        DetectionConfig {
            strategy,
            ..Default::default()
        }
    }
}

/// Inclusive range of local hours during which irrigation may start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaytimeWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for DaytimeWindow {
    fn default() -> Self {
        DaytimeWindow {
            start_hour: 7,
            end_hour: 17,
        }
    }
}

impl DaytimeWindow {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour <= self.end_hour
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Pixels added to y so the click lands inside the clickable trace region
    pub vertical_offset_px: f64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        MappingConfig {
            vertical_offset_px: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub mode: ConfirmMode,

    pub confirm_timeout_secs: u64,

    pub training_timeout_secs: u64,

    /// When chart geometry is missing, accept the detection unconfirmed
    /// instead of skipping the subject
    pub accept_unconfirmed_on_mapping_failure: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        ConfirmationConfig {
            mode: ConfirmMode::Confirmation,
            confirm_timeout_secs: 60,
            training_timeout_secs: 30,
            accept_unconfirmed_on_mapping_failure: false,
        }
    }
}

impl ConfirmationConfig {
    /// Timeout for the active mode
    pub fn timeout(&self) -> Duration {
        match self.mode {
            ConfirmMode::Confirmation => Duration::from_secs(self.confirm_timeout_secs),
            ConfirmMode::Training => Duration::from_secs(self.training_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Calibration log location; defaults to the app data directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Directory for per-run JSONL traces; tracing is off when unset
    pub dir: Option<PathBuf>,
}
