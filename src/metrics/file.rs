//! Loading metric configuration files.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use super::MetricConfig;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("config file '{0}' not found")]
    NotFound(PathBuf),
    #[error("unable to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file '{0}' must contain a JSON array of metrics")]
    NotAList(PathBuf),
    #[error("invalid metric at index {index} in '{path}': {message}")]
    Entry { path: PathBuf, index: usize, message: String },
}

/// Read a JSON array of metric configs. The first invalid entry fails the
/// whole file.
pub fn read_config_file(path: &Path) -> Result<Vec<MetricConfig>, ConfigFileError> {
    info!("Reading configuration file: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigFileError::NotFound(path.to_path_buf())
        } else {
            ConfigFileError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_config(&content, path)
}

fn parse_config(content: &str, path: &Path) -> Result<Vec<MetricConfig>, ConfigFileError> {
    let raw: Value = serde_json::from_str(content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Array(entries) = raw else {
        return Err(ConfigFileError::NotAList(path.to_path_buf()));
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let entry_error = |message: String| ConfigFileError::Entry {
                path: path.to_path_buf(),
                index,
                message,
            };
            let config: MetricConfig = serde_json::from_value(entry).map_err(|e| entry_error(e.to_string()))?;
            if config.tags.is_empty() {
                return Err(entry_error("tags must not be empty".to_string()));
            }
            Ok(config)
        })
        .collect()
}
