//! Metric configurations and the detector lifecycle for one metric.

pub mod diff;
pub mod file;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::datasources::{Datasource, DatasourceConfig, DatasourceError, SampleQuery};
use crate::detectors::{Detector, DetectorError, DetectorType};
use crate::modelservice::{ClientError, ModelService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    RequestCount,
    ErrorCount,
    SuccessRate,
    Latency,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::RequestCount => "REQUEST_COUNT",
            MetricType::ErrorCount => "ERROR_COUNT",
            MetricType::SuccessRate => "SUCCESS_RATE",
            MetricType::Latency => "LATENCY",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUEST_COUNT" => Ok(MetricType::RequestCount),
            "ERROR_COUNT" => Ok(MetricType::ErrorCount),
            "SUCCESS_RATE" => Ok(MetricType::SuccessRate),
            "LATENCY" => Ok(MetricType::Latency),
            other => Err(DetectorError::UnknownMetricType(other.to_string())),
        }
    }
}

impl Serialize for MetricType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One entry of a metric configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Identifies the series in the datasource and joins it to detector mappings.
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DatasourceConfig>,
}

impl MetricConfig {
    /// Datasource for this metric, with unset fields taken from `default`.
    pub fn datasource_config(&self, default: &DatasourceConfig) -> DatasourceConfig {
        match &self.datasource {
            Some(own) => own.with_defaults(default),
            None => default.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MetricError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Datasource(#[from] DatasourceError),
}

impl MetricError {
    pub fn is_insufficient_sample(&self) -> bool {
        matches!(self, MetricError::Detector(DetectorError::InsufficientSample(_)))
    }
}

/// Result of evaluating one detector during `train`.
#[derive(Debug)]
pub enum TrainOutcome {
    Trained(Detector),
    NotRequired(Detector),
    Failed { detector: Detector, error: DetectorError },
}

/// Reconciles the detectors registered for one metric.
pub struct Metric<'a> {
    config: &'a MetricConfig,
    datasource: Box<dyn Datasource>,
    client: &'a dyn ModelService,
}

impl<'a> Metric<'a> {
    pub fn new(config: &'a MetricConfig, datasource: Box<dyn Datasource>, client: &'a dyn ModelService) -> Self {
        Self {
            config,
            datasource,
            client,
        }
    }

    pub fn config(&self) -> &MetricConfig {
        self.config
    }

    /// Detectors currently mapped to this metric's tags. Not cached.
    pub async fn detectors(&self) -> Result<Vec<Detector>, MetricError> {
        Ok(self.client.list_detectors_for_metric(&self.config.tags).await?)
    }

    /// The training sample for this metric.
    pub async fn query(&self) -> Result<Vec<Option<f64>>, MetricError> {
        let series = self.datasource.query(&SampleQuery::for_tags(&self.config.tags)).await?;
        debug!(metric = %self.config.name, points = series.len(), "sample queried");
        Ok(series.values())
    }

    /// Detectors every metric should have. One default detector per type.
    pub fn select_detectors(&self) -> Vec<Detector> {
        DetectorType::ALL.iter().map(|t| Detector::default_for(*t)).collect()
    }

    /// Create, train and map each selected detector whose type is missing.
    pub async fn build_detectors(&self) -> Result<Vec<Detector>, MetricError> {
        let existing: Vec<DetectorType> = self.detectors().await?.iter().map(|d| d.detector_type).collect();
        let mut created = Vec::new();
        for mut detector in self.select_detectors() {
            if existing.contains(&detector.detector_type) {
                debug!(metric = %self.config.name, detector_type = %detector.detector_type, "detector already exists");
                continue;
            }
            let sample = self.query().await?;
            detector.train(&sample, self.config.metric_type, Utc::now())?;
            let new_detector = self.client.create_detector(&detector).await?;
            let uuid = require_uuid(&new_detector)?;
            self.client.save_metric_detector_mapping(uuid, self.config).await?;
            created.push(new_detector);
        }
        Ok(created)
    }

    /// Retrain every mapped detector whose training interval has elapsed.
    ///
    /// A training failure is recorded against that detector only; service
    /// and datasource errors abort the metric.
    pub async fn train_detectors(&self) -> Result<Vec<TrainOutcome>, MetricError> {
        let mut sample: Option<Vec<Option<f64>>> = None;
        let mut outcomes = Vec::new();
        for mut detector in self.detectors().await? {
            let now = Utc::now();
            if !detector.needs_training(now) {
                outcomes.push(TrainOutcome::NotRequired(detector));
                continue;
            }
            if sample.is_none() {
                sample = Some(self.query().await?);
            }
            let points = sample.as_deref().unwrap_or_default();
            match detector.train(points, self.config.metric_type, now) {
                Ok(()) => {
                    let updated = self.client.update_detector(&detector).await?;
                    outcomes.push(TrainOutcome::Trained(updated));
                }
                Err(error) => outcomes.push(TrainOutcome::Failed { detector, error }),
            }
        }
        Ok(outcomes)
    }

    /// Disable every mapping of every detector, then the detectors.
    pub async fn disable_detectors(&self) -> Result<Vec<Detector>, MetricError> {
        let mut disabled = Vec::new();
        for detector in self.detectors().await? {
            let uuid = require_uuid(&detector)?;
            for mapping in self.client.list_detector_mappings(uuid).await? {
                match mapping.id.as_deref() {
                    Some(id) => self.client.disable_metric_detector_mapping(id).await?,
                    None => warn!(%uuid, "detector mapping without id, cannot disable"),
                }
            }
            self.client.toggle_detector(uuid, false).await?;
            disabled.push(detector);
        }
        Ok(disabled)
    }

    /// Delete every mapping of every detector, then the detectors.
    pub async fn delete_detectors(&self) -> Result<Vec<Detector>, MetricError> {
        let mut deleted = Vec::new();
        for detector in self.detectors().await? {
            let uuid = require_uuid(&detector)?;
            for mapping in self.client.list_detector_mappings(uuid).await? {
                match mapping.id.as_deref() {
                    Some(id) => self.client.delete_metric_detector_mapping(id).await?,
                    None => warn!(%uuid, "detector mapping without id, cannot delete"),
                }
            }
            self.client.delete_detector(uuid).await?;
            deleted.push(detector);
        }
        Ok(deleted)
    }
}

fn require_uuid(detector: &Detector) -> Result<Uuid, ClientError> {
    detector.uuid.ok_or_else(|| ClientError::MissingUuid(String::new()))
}
