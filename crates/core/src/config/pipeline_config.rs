use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::{
    APP_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CACHE_EXPIRY_MS, DEFAULT_CACHE_SIZE,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_DETECTION_INTERVAL_MS, DEFAULT_INFERENCE_TIMEOUT_MS,
    DEFAULT_INPUT_SIZE, DEFAULT_MAX_CART_ITEMS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pixel normalization matching the model's training distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 127.5 - 1`, range [-1, 1].
    SignedUnit,
    /// `x / 255`, range [0, 1].
    UnitRange,
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    Fixed,
    Exponential,
}

/// Immutable detection pipeline configuration, loaded once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Confidence floor on the 0-100 scale.
    pub confidence_threshold: f64,
    pub detection_interval_ms: u64,
    pub cache_size: usize,
    pub cache_expiry_ms: u64,
    pub inference_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: RetryBackoff,
    /// Maximum total units the cart may hold.
    pub max_cart_items: u32,
    /// Closed label catalog, indexed by model output position.
    pub labels: Vec<String>,
    pub input_size: u32,
    pub normalization: Normalization,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_expiry_ms: DEFAULT_CACHE_EXPIRY_MS,
            inference_timeout_ms: DEFAULT_INFERENCE_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_backoff: RetryBackoff::Fixed,
            max_cart_items: DEFAULT_MAX_CART_ITEMS,
            labels: Vec::new(),
            input_size: DEFAULT_INPUT_SIZE,
            normalization: Normalization::SignedUnit,
        }
    }
}

impl PipelineConfig {
    /// Reads and validates a JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from the platform config directory, falling back to defaults
    /// when the file is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be between 0 and 100, got {}",
                self.confidence_threshold
            )));
        }
        if self.detection_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "detection_interval_ms must be > 0".into(),
            ));
        }
        if self.cache_size == 0 {
            return Err(ConfigError::Invalid("cache_size must be >= 1".into()));
        }
        if self.cache_expiry_ms == 0 {
            return Err(ConfigError::Invalid("cache_expiry_ms must be > 0".into()));
        }
        if self.inference_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "inference_timeout_ms must be > 0".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be >= 1".into()));
        }
        if self.max_cart_items == 0 {
            return Err(ConfigError::Invalid("max_cart_items must be >= 1".into()));
        }
        if self.input_size == 0 {
            return Err(ConfigError::Invalid("input_size must be >= 1".into()));
        }
        if self.labels.is_empty() {
            return Err(ConfigError::Invalid("labels must not be empty".into()));
        }
        if let Some(blank) = self.labels.iter().position(|l| l.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("label {blank} is blank")));
        }
        Ok(())
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn cache_expiry(&self) -> Duration {
        Duration::from_millis(self.cache_expiry_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn valid() -> PipelineConfig {
        PipelineConfig {
            labels: vec!["Botella".into(), "Lata".into()],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.confidence_threshold, 70.0);
        assert_eq!(config.detection_interval(), Duration::from_millis(1500));
        assert_eq!(config.cache_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.max_cart_items, 50);
        assert_eq!(config.input_size, 224);
        assert_eq!(config.retry_backoff, RetryBackoff::Fixed);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[rstest]
    #[case::threshold_high(PipelineConfig { confidence_threshold: 100.5, ..valid() })]
    #[case::threshold_negative(PipelineConfig { confidence_threshold: -1.0, ..valid() })]
    #[case::zero_interval(PipelineConfig { detection_interval_ms: 0, ..valid() })]
    #[case::zero_cache(PipelineConfig { cache_size: 0, ..valid() })]
    #[case::zero_expiry(PipelineConfig { cache_expiry_ms: 0, ..valid() })]
    #[case::zero_timeout(PipelineConfig { inference_timeout_ms: 0, ..valid() })]
    #[case::zero_retries(PipelineConfig { max_retries: 0, ..valid() })]
    #[case::zero_cart(PipelineConfig { max_cart_items: 0, ..valid() })]
    #[case::no_labels(PipelineConfig { labels: vec![], ..valid() })]
    #[case::blank_label(PipelineConfig { labels: vec!["Botella".into(), "  ".into()], ..valid() })]
    fn test_invalid_configs_rejected(#[case] config: PipelineConfig) {
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_fills_missing_fields_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.json");
        fs::write(
            &path,
            r#"{"labels": ["Botella"], "cache_expiry_ms": 4000, "retry_backoff": "exponential"}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();

        assert_eq!(config.labels, vec!["Botella".to_string()]);
        assert_eq!(config.cache_expiry(), Duration::from_millis(4000));
        assert_eq!(config.retry_backoff, RetryBackoff::Exponential);
        assert_eq!(config.confidence_threshold, 70.0);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.json");
        fs::write(&path, r#"{"labels": ["Botella"], "max_retries": 0}"#).unwrap();

        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pipeline.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let result = PipelineConfig::load(&tmp.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_path_is_namespaced() {
        if let Some(path) = PipelineConfig::config_path() {
            assert!(path.to_string_lossy().contains("CartSight"));
            assert!(path.ends_with("pipeline.json"));
        }
    }
}
