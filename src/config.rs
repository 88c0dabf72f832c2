//! Process settings: model service, default datasource and logging.
//!
//! Layers, lowest precedence first: compiled-in defaults, a TOML file
//! (`--config` or `ADAPTIVE_ALERTING_CONFIG`), environment variables
//! (`MODEL_SERVICE_URL`, `MODEL_SERVICE_USER`, `GRAPHITE_URL`, `LOG_LEVEL`),
//! then command-line flags.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::datasources::DatasourceConfig;

pub const CONFIG_ENV: &str = "ADAPTIVE_ALERTING_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub model_service: ModelServiceSettings,
    /// Used for metrics that do not carry their own `datasource` block.
    #[serde(default)]
    pub datasource: DatasourceConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// An explicit path must load. Otherwise `ADAPTIVE_ALERTING_CONFIG` is
    /// tried, falling back to defaults if it is unset or unreadable.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(settings) => return Ok(settings),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, using defaults", CONFIG_ENV
                    );
                }
            }
        }
        debug!("no settings file, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MODEL_SERVICE_URL") {
            self.model_service.url = Some(url);
        }
        if let Some(user) = lookup("MODEL_SERVICE_USER") {
            self.model_service.user = Some(user);
        }
        if let Some(url) = lookup("GRAPHITE_URL") {
            self.datasource.url = Some(url);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServiceSettings {
    pub url: Option<String>,
    /// Recorded as the owner of created detector mappings.
    pub user: Option<String>,
    /// How long to wait for a created detector to become retrievable.
    pub create_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ModelServiceSettings {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            create_timeout_secs: 60,
            poll_interval_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
