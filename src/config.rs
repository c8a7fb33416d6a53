//! Pipeline configuration, loaded from a YAML file with sane defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for downloaded audio and transient segment artifacts.
    pub data_dir: PathBuf,
    /// Where review documents are rendered for human editing.
    pub review_dir: PathBuf,
    /// Fixed segment width `W` in seconds; the last segment is truncated.
    pub segment_seconds: f64,
    /// Primary speech model loaded once at startup.
    pub primary_model: String,
    /// Language of the source recording.
    pub source_language: String,
    /// Target languages for translation.
    pub languages: Vec<String>,
    /// Memory-pressure fraction above which model loads log a warning.
    pub memory_warn_threshold: f32,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub ollama: OllamaConfig,
}

/// Exponential-backoff settings for single external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// Batch-degrade settings for bulk remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_rounds: u32,
    pub round_delay_ms: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("polycast");
        Self {
            data_dir: base.join("data"),
            review_dir: base.join("review"),
            segment_seconds: 300.0,
            primary_model: "large-v3".to_string(),
            source_language: "en".to_string(),
            languages: Vec::new(),
            memory_warn_threshold: 0.85,
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            round_delay_ms: 2000,
            batch_size: 20,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Config = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.segment_seconds, 300.0);
        assert_eq!(config.memory_warn_threshold, 0.85);
        assert_eq!(config.batch.max_rounds, 5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "segment_seconds: 120\nlanguages: [es, de]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.segment_seconds, 120.0);
        assert_eq!(config.languages, vec!["es", "de"]);
        assert_eq!(config.batch.max_rounds, 5);
    }
}
