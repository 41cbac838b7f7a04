//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` into strongly-typed structs. Every section and field
//! has a default, so a missing file or a partial one is fine. A handful of
//! settings can be overridden from the environment after the file is read.
//! Secrets are referenced by env-var name and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::rates::provider::DEFAULT_BASE_URL;
use crate::valuation::UnknownPolicy;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub exchange: ExchangeConfig,
    pub valuation: ValuationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConfig {
    /// Detections below this confidence are discarded.
    pub confidence_threshold: f32,
    pub localizer_model: String,
    /// Newline-delimited class names for the localizer.
    pub localizer_labels: String,
    pub classifier_model: String,
    pub classifier_labels: String,
    /// TTF/OTF font for label text. The bundled DejaVu Sans is used if unset.
    pub font_path: Option<String>,
    pub onnx_threads: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            localizer_model: "models/localizer.onnx".into(),
            localizer_labels: "models/localizer.names".into(),
            classifier_model: "models/classifier.onnx".into(),
            classifier_labels: "models/classifier.names".into(),
            font_path: None,
            onnx_threads: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key_env: String,
    /// Tracked currencies, ISO codes.
    pub currencies: Vec<String>,
    pub update_rates_interval_hours: u64,
    pub cache_file: String,
    pub request_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key_env: "EXCHANGE_RATE_API_KEY".into(),
            currencies: vec!["EUR".into(), "USD".into(), "ILS".into()],
            update_rates_interval_hours: 24,
            cache_file: "exchange_rates_cache.json".into(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ValuationConfig {
    pub unknown_policy: UnknownPolicy,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied either way.
    pub fn load_or_default(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path)?
        } else {
            info!(path, "No config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `CONFIDENCE_THRESHOLD`, `UPDATE_RATES_INTERVAL_HOURS` and
    /// `EXCHANGE_RATES_CACHE_FILE` when set.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<f32>("CONFIDENCE_THRESHOLD")? {
            self.detection.confidence_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("UPDATE_RATES_INTERVAL_HOURS")? {
            self.exchange.update_rates_interval_hours = v;
        }
        if let Ok(v) = std::env::var("EXCHANGE_RATES_CACHE_FILE") {
            self.exchange.cache_file = v;
        }
        debug!(
            threshold = self.detection.confidence_threshold,
            interval_hours = self.exchange.update_rates_interval_hours,
            cache_file = %self.exchange.cache_file,
            "Configuration resolved"
        );
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The exchange-rate API key, read from the variable named by
    /// `exchange.api_key_env`.
    pub fn exchange_api_key(&self) -> Result<SecretString> {
        Self::resolve_env(&self.exchange.api_key_env).map(SecretString::new)
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {name}: {raw}")),
        Err(_) => Ok(None),
    }
}
