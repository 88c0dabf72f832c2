//! Time-series datasources queried for training samples.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod graphite;
pub mod mock;

pub use graphite::GraphiteDatasource;
pub use mock::MockDatasource;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum DatasourceError {
    #[error("Error querying datasource. {0}")]
    Query(#[from] reqwest::Error),
    #[error("datasource returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("unable to decode datasource response: {0}")]
    Decode(String),
    #[error("datasource url is not configured")]
    MissingUrl,
    #[error("Unknown datasource type '{0}'")]
    UnknownType(String),
    #[error("invalid datasource header '{0}'")]
    InvalidHeader(String),
}

/// Connection parameters for a datasource, as found on a metric config or
/// in the process settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Canned values for the `mock` datasource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl DatasourceConfig {
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("graphite")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Fill unset connection fields from the process-wide default.
    pub fn with_defaults(&self, default: &DatasourceConfig) -> DatasourceConfig {
        let mut merged = self.clone();
        if merged.kind.is_none() {
            merged.kind = default.kind.clone();
        }
        if merged.url.is_none() {
            merged.url = default.url.clone();
        }
        for (k, v) in &default.headers {
            merged.headers.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if merged.timeout_secs.is_none() {
            merged.timeout_secs = default.timeout_secs;
        }
        merged
    }
}

/// Parameters of a sample query.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleQuery {
    pub tags: BTreeMap<String, String>,
    pub start: String,
    pub end: String,
    pub interval: Option<String>,
    pub function: String,
}

impl SampleQuery {
    /// Last week of data for `tags`, summed across matching series.
    pub fn for_tags(tags: &BTreeMap<String, String>) -> Self {
        Self {
            tags: tags.clone(),
            start: "-168hours".to_string(),
            end: "now".to_string(),
            interval: None,
            function: "sum".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Time-ordered series; values may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub points: Vec<Point>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }
}

#[async_trait::async_trait]
pub trait Datasource: Send + Sync {
    async fn query(&self, query: &SampleQuery) -> Result<Series, DatasourceError>;
}

/// Build the datasource named by `config.type` (default `graphite`).
pub fn from_config(config: &DatasourceConfig) -> Result<Box<dyn Datasource>, DatasourceError> {
    match config.kind() {
        "graphite" => Ok(Box::new(GraphiteDatasource::from_config(config)?)),
        "mock" => Ok(Box::new(MockDatasource::from_config(config))),
        other => Err(DatasourceError::UnknownType(other.to_string())),
    }
}
