//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.edinsight.toml` files.

use crate::extract::ExtractStrategy;
use crate::llm::ProviderKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Registry API settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// PDF parser settings.
    #[serde(default)]
    pub parser: ParserConfig,

    /// Download cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report output path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "edinsight_report.md".to_string()
}

/// EDINET registry API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry API base URL.
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Registry API key. Usually supplied via EDINSIGHT_API_KEY.
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in seconds.
    #[serde(default = "default_registry_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            api_key: String::new(),
            timeout_seconds: default_registry_timeout(),
        }
    }
}

fn default_registry_url() -> String {
    "https://api.edinet-fsa.go.jp/api/v2".to_string()
}

fn default_registry_timeout() -> u64 {
    120
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider implementation to use.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Provider endpoint base URL.
    #[serde(default = "default_model_url")]
    pub base_url: String,

    /// Provider API key, if the provider needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            name: default_model(),
            base_url: default_model_url(),
            api_key: None,
            temperature: default_temperature(),
            timeout_seconds: default_model_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_model_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_model_timeout() -> u64 {
    600
}

/// PDF parser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Extraction strategy. "auto" cascades through strategies.
    #[serde(default)]
    pub strategy: ExtractStrategy,

    /// OCR engine command for the ocr strategy.
    #[serde(default = "default_ocr_command")]
    pub ocr_command: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractStrategy::default(),
            ocr_command: default_ocr_command(),
        }
    }
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}

/// Download cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for downloaded documents.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".edinsight.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref api_key) = args.api_key {
            self.registry.api_key = api_key.clone();
        }
        if let Some(ref dir) = args.cache_dir {
            self.cache.dir = dir.clone();
        }
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(provider) = args.provider {
            self.model.provider = provider;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
