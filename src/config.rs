//! Configuration Module
//!
//! Provides TOML-based configuration for log-surge.
//! Configuration is optional - CLI arguments can override file settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::export::OutputFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub parser: ParserConfig,
    pub aggregator: AggregatorConfig,
    pub detection: DetectionConfig,
    pub ranking: RankingConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration from file if it exists, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> std::result::Result<(), AnalysisError> {
        let invalid = |msg: &str| Err(AnalysisError::InvalidConfig(msg.to_string()));

        if self.aggregator.bucket_secs == 0 {
            return invalid("bucket_secs must be greater than 0");
        }
        if self.aggregator.chunk_lines == 0 {
            return invalid("chunk_lines must be greater than 0");
        }
        if !self.detection.threshold_multiplier.is_finite()
            || self.detection.threshold_multiplier < 0.0
        {
            return invalid("threshold_multiplier must be a finite, non-negative number");
        }
        if self.ranking.top_sources == 0 || self.ranking.wide_top_sources == 0 {
            return invalid("top_sources and wide_top_sources must be greater than 0");
        }
        if self.parser.progress_interval == 0 {
            return invalid("progress_interval must be greater than 0");
        }
        Ok(())
    }
}

/// Line-parsing configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Emit a progress message every this many lines
    pub progress_interval: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            progress_interval: 10_000,
        }
    }
}

/// Bucketing configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Bucket width in seconds
    pub bucket_secs: u32,
    /// Parse and aggregate contiguous chunks on the rayon pool
    pub parallel: bool,
    /// Lines per chunk in parallel mode
    pub chunk_lines: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bucket_secs: 1,
            parallel: false,
            chunk_lines: 50_000,
        }
    }
}

/// Detection-related configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Standard deviations above the mean a bucket must exceed
    pub threshold_multiplier: f64,
    /// Number of bins in the traffic intensity histogram
    pub histogram_bins: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_multiplier: 2.0,
            histogram_bins: 50,
        }
    }
}

/// Ranking configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Sources listed in reports
    pub top_sources: usize,
    /// Sources in the wider chart view
    pub wide_top_sources: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_sources: 10,
            wide_top_sources: 15,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Report file path (None = no report file)
    pub report_file: Option<String>,
    /// Write the report file even when no anomaly was found
    pub always_report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            report_file: None,
            always_report: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.aggregator.bucket_secs, 1);
        assert_eq!(config.detection.threshold_multiplier, 2.0);
        assert_eq!(config.ranking.top_sources, 10);
        assert_eq!(config.ranking.wide_top_sources, 15);
        assert!(!config.aggregator.parallel);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.aggregator.bucket_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.threshold_multiplier = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.threshold_multiplier = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ranking.top_sources = 0;
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[parser]"));
        assert!(config_str.contains("[aggregator]"));
        assert!(config_str.contains("[detection]"));
        assert!(config_str.contains("[ranking]"));
        assert!(config_str.contains("[output]"));

        let reparsed: Config = toml::from_str(&config_str).unwrap();
        assert_eq!(reparsed, Config::default());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[aggregator]
bucket_secs = 10
parallel = true

[detection]
threshold_multiplier = 3.0

[ranking]
top_sources = 5

[output]
format = "json"
report_file = "ddos_report.txt"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.aggregator.bucket_secs, 10);
        assert!(config.aggregator.parallel);
        assert_eq!(config.aggregator.chunk_lines, 50_000);
        assert_eq!(config.detection.threshold_multiplier, 3.0);
        assert_eq!(config.ranking.top_sources, 5);
        assert_eq!(config.ranking.wide_top_sources, 15);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.output.report_file.as_deref(), Some("ddos_report.txt"));
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let path = Path::new("/nonexistent/log-surge.toml");
        assert!(Config::load(path).is_err());
        assert_eq!(Config::load_or_default(Some(path)), Config::default());
    }
}
