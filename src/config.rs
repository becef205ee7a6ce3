//! Configuration for the monitoring core.
//!
//! Durations are stored as signed seconds so that a negative value in a
//! config file surfaces as `InvalidConfig` from [`Config::validate`] instead of
//! a deserialization failure.

use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Longest duration any setting may express: ten years.
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 3600;

/// Main configuration for a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum age of observations kept in rolling history (seconds)
    pub retention_horizon_secs: i64,

    /// Maximum entries kept per modality
    pub retention_max_entries: usize,

    /// Pattern detector thresholds
    pub detectors: DetectorConfig,

    /// Same-type issues detected within this interval are merged (seconds)
    pub cool_down_secs: i64,

    /// Tick of the communication-gap watchdog (seconds)
    pub gap_poll_interval_secs: i64,

    /// Alerts buffered for the reporting sink before the oldest is dropped
    pub alert_queue_capacity: usize,

    /// Minimum change in negative fraction for a report trend to leave "stable"
    pub trend_threshold: f64,

    /// IANA timezone used when rendering reports
    pub timezone: String,

    /// Path for audit logs
    pub data_path: PathBuf,

    /// Path for exported reports
    pub export_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("maitri-monitor");

        Self {
            retention_horizon_secs: 3600,
            retention_max_entries: 10_000,
            detectors: DetectorConfig::default(),
            cool_down_secs: 300,
            gap_poll_interval_secs: 60,
            alert_queue_capacity: 64,
            trend_threshold: 0.1,
            timezone: "UTC".to_string(),
            export_path: data_dir.join("reports"),
            data_path: data_dir,
        }
    }
}

/// Thresholds for the pattern detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Trailing window for sustained negative affect (seconds)
    pub sustained_window_secs: i64,
    /// Negative fraction that must be exceeded
    pub sustained_fraction: f64,
    /// Observations required before the sustained check applies
    pub min_samples: usize,
    /// Trailing window for polarity swings (seconds)
    pub swing_window_secs: i64,
    /// Polarity transitions required within the swing window
    pub min_swings: usize,
    /// Confidence at which a single negative observation is extreme
    pub extreme_confidence: f64,
    /// Silence across all modalities that counts as a communication gap (seconds)
    pub gap_threshold_secs: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sustained_window_secs: 15 * 60,
            sustained_fraction: 0.7,
            min_samples: 10,
            swing_window_secs: 5 * 60,
            min_swings: 3,
            extreme_confidence: 0.85,
            gap_threshold_secs: 30 * 60,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load and validate configuration from a file; defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("maitri-monitor")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check every option once. Any violation is `InvalidConfig`.
    pub fn validate(&self) -> MonitorResult<()> {
        positive_secs("retention_horizon_secs", self.retention_horizon_secs)?;
        positive_secs("gap_poll_interval_secs", self.gap_poll_interval_secs)?;
        if !(0..=MAX_DURATION_SECS).contains(&self.cool_down_secs) {
            return Err(invalid(format!(
                "cool_down_secs must be within [0, {MAX_DURATION_SECS}] (got {})",
                self.cool_down_secs
            )));
        }
        if self.retention_max_entries == 0 {
            return Err(invalid("retention_max_entries must be at least 1"));
        }
        if self.alert_queue_capacity == 0 {
            return Err(invalid("alert_queue_capacity must be at least 1"));
        }
        probability("trend_threshold", self.trend_threshold)?;
        if chrono_tz::Tz::from_str(&self.timezone).is_err() {
            return Err(invalid(format!("unknown timezone '{}'", self.timezone)));
        }

        self.detectors.validate()
    }

    /// Parsed report timezone. Falls back to UTC for unvalidated configs.
    pub fn tz(&self) -> chrono_tz::Tz {
        chrono_tz::Tz::from_str(&self.timezone).unwrap_or(chrono_tz::Tz::UTC)
    }

    pub fn retention_horizon(&self) -> chrono::Duration {
        seconds(self.retention_horizon_secs)
    }

    pub fn cool_down(&self) -> chrono::Duration {
        seconds(self.cool_down_secs)
    }

    pub fn gap_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gap_poll_interval_secs.clamp(1, MAX_DURATION_SECS) as u64)
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> MonitorResult<()> {
        positive_secs("detectors.sustained_window_secs", self.sustained_window_secs)?;
        positive_secs("detectors.swing_window_secs", self.swing_window_secs)?;
        positive_secs("detectors.gap_threshold_secs", self.gap_threshold_secs)?;
        probability("detectors.sustained_fraction", self.sustained_fraction)?;
        probability("detectors.extreme_confidence", self.extreme_confidence)?;
        if self.min_samples == 0 {
            return Err(invalid("detectors.min_samples must be at least 1"));
        }
        if self.min_swings == 0 {
            return Err(invalid("detectors.min_swings must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> MonitorError {
    MonitorError::InvalidConfig(message.into())
}

fn positive_secs(name: &str, secs: i64) -> MonitorResult<()> {
    if secs <= 0 {
        return Err(invalid(format!("{name} must be positive (got {secs})")));
    }
    if secs > MAX_DURATION_SECS {
        return Err(invalid(format!(
            "{name} must not exceed {MAX_DURATION_SECS} (got {secs})"
        )));
    }
    Ok(())
}

/// Seconds setting as a duration. Out-of-range values are clamped; they
/// only reach here when `validate` was skipped.
pub(crate) fn seconds(secs: i64) -> chrono::Duration {
    chrono::Duration::seconds(secs.clamp(-MAX_DURATION_SECS, MAX_DURATION_SECS))
}

fn probability(name: &str, value: f64) -> MonitorResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{name} must be within [0, 1] (got {value})")));
    }
    Ok(())
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error(transparent)]
    Invalid(MonitorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.detectors.sustained_window_secs, 900);
        assert_eq!(config.detectors.sustained_fraction, 0.7);
        assert_eq!(config.detectors.min_swings, 3);
        assert_eq!(config.detectors.extreme_confidence, 0.85);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut config = Config::default();
        config.detectors.swing_window_secs = -5;
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(msg)) if msg.contains("swing_window_secs")
        ));
    }

    #[test]
    fn test_probability_out_of_range_rejected() {
        let mut config = Config::default();
        config.detectors.sustained_fraction = 1.2;
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.detectors.extreme_confidence = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let config = Config {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            Config::from_json(r#"{"cool_down_secs": 120, "detectors": {"min_samples": 4}}"#)
                .unwrap();
        assert_eq!(config.cool_down_secs, 120);
        assert_eq!(config.detectors.min_samples, 4);
        assert_eq!(config.detectors.min_swings, 3);
    }

    #[test]
    fn test_invalid_json_values_fail_fast() {
        let result = Config::from_json(r#"{"retention_horizon_secs": -60}"#);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid(MonitorError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let result = Config::from_json(r#"{"retention_horizon_secs": 10000000000000}"#);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid(MonitorError::InvalidConfig(msg))) if msg.contains("retention_horizon_secs")
        ));

        let mut config = Config::default();
        config.detectors.gap_threshold_secs = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(msg)) if msg.contains("gap_threshold_secs")
        ));

        let mut config = Config::default();
        config.cool_down_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retention_horizon_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_accessors_never_panic() {
        let config = Config {
            retention_horizon_secs: i64::MAX,
            cool_down_secs: i64::MIN,
            gap_poll_interval_secs: i64::MAX,
            ..Config::default()
        };
        assert_eq!(config.retention_horizon().num_seconds(), MAX_DURATION_SECS);
        assert_eq!(config.cool_down().num_seconds(), -MAX_DURATION_SECS);
        assert_eq!(config.gap_poll_interval().as_secs(), MAX_DURATION_SECS as u64);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("maitri-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let config = Config {
            timezone: "Europe/Berlin".to_string(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.tz(), chrono_tz::Europe::Berlin);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
