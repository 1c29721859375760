//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use courier_connectors::{SinkSettings, SourceSettings};
use serde::Deserialize;

/// Global configuration for courier
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: courier_core::Config,
    pub checkpoint: CheckpointConfig,
    pub source: Option<SourceSettings>,
    pub sink: Option<SinkSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    /// Attempts per checkpoint append
    pub append_retries: u32,
    pub append_backoff_ms: u64,
    /// Default age for `checkpoint cleanup`
    pub cleanup_days: i64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./courier-checkpoint.jsonl"),
            append_retries: courier_checkpoint::DEFAULT_APPEND_RETRIES,
            append_backoff_ms: 100,
            cleanup_days: 30,
        }
    }
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

fn expand_token(token: &mut Option<String>) {
    *token = token.as_deref().and_then(expand_env_var);
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./courier.toml (current directory)
    /// 2. ~/.config/courier/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("courier.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "courier") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if let Some(sink) = config.sink.as_mut() {
            expand_token(&mut sink.token);
        }
        if let Some(SourceSettings::Http { token, .. }) = config.source.as_mut() {
            expand_token(token);
        }
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn source(&self) -> Result<&SourceSettings> {
        self.source
            .as_ref()
            .context("no [source] section in config")
    }

    pub fn sink(&self) -> Result<&SinkSettings> {
        self.sink.as_ref().context("no [sink] section in config")
    }
}
