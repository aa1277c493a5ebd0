use crate::constants::{
    DEFAULT_CLOSED_HISTORY_CAPACITY, DEFAULT_INITIAL_BURST_BUFFER_RATIO, DEFAULT_OVERSCAN,
    DEFAULT_SCROLL_FORCE_THRESHOLD, DEFAULT_SCROLL_LOAD_THRESHOLD, DEFAULT_STREAMING_BATCH_SIZE,
};
use crate::core::RevealConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub enable_advanced_syntax: bool,
    pub case_insensitive: bool,
    pub closed_history_capacity: usize,
    pub overscan: usize,
    pub initial_burst_buffer_ratio: f64,
    pub streaming_batch_size: usize,
    pub scroll_load_threshold: f64,
    pub scroll_force_threshold: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            enable_advanced_syntax: true,
            case_insensitive: true,
            closed_history_capacity: DEFAULT_CLOSED_HISTORY_CAPACITY,
            overscan: DEFAULT_OVERSCAN,
            initial_burst_buffer_ratio: DEFAULT_INITIAL_BURST_BUFFER_RATIO,
            streaming_batch_size: DEFAULT_STREAMING_BATCH_SIZE,
            scroll_load_threshold: DEFAULT_SCROLL_LOAD_THRESHOLD,
            scroll_force_threshold: DEFAULT_SCROLL_FORCE_THRESHOLD,
        }
    }
}

impl ViewConfig {
    /// Reads and validates a JSON config file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: ViewConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.closed_history_capacity == 0 {
            return Err(invalid("closed_history_capacity", "must be at least 1"));
        }
        if self.streaming_batch_size == 0 {
            return Err(invalid("streaming_batch_size", "must be at least 1"));
        }
        if !self.initial_burst_buffer_ratio.is_finite() || self.initial_burst_buffer_ratio < 0.0 {
            return Err(invalid("initial_burst_buffer_ratio", "must be a non-negative number"));
        }
        for (field, value) in [
            ("scroll_load_threshold", self.scroll_load_threshold),
            ("scroll_force_threshold", self.scroll_force_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(field, "must be in (0, 1]"));
            }
        }
        if self.scroll_load_threshold > self.scroll_force_threshold {
            return Err(invalid(
                "scroll_load_threshold",
                "must not exceed scroll_force_threshold",
            ));
        }
        Ok(())
    }

    pub fn reveal_config(&self) -> RevealConfig {
        RevealConfig {
            initial_burst_buffer_ratio: self.initial_burst_buffer_ratio,
            streaming_batch_size: self.streaming_batch_size,
            scroll_load_threshold: self.scroll_load_threshold,
            scroll_force_threshold: self.scroll_force_threshold,
            ..RevealConfig::default()
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ViewConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.closed_history_capacity, 100);
        assert_eq!(config.overscan, 5);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = ViewConfig::from_json(r#"{"overscan": 2, "case_insensitive": false}"#).unwrap();
        assert_eq!(config.overscan, 2);
        assert!(!config.case_insensitive);
        assert_eq!(config.streaming_batch_size, 30);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = ViewConfig::from_json(r#"{"closed_history_capacity": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "closed_history_capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_threshold_order_rejected() {
        let err = ViewConfig::from_json(
            r#"{"scroll_load_threshold": 0.95, "scroll_force_threshold": 0.9}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("scroll_load_threshold"));
    }

    #[test]
    fn test_bad_json_is_reported() {
        assert!(matches!(
            ViewConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_reveal_config_carries_overrides() {
        let config = ViewConfig {
            streaming_batch_size: 50,
            ..ViewConfig::default()
        };
        assert_eq!(config.reveal_config().streaming_batch_size, 50);
    }
}
