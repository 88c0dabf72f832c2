//! Detector entities, threshold statistics and training.

pub mod constant_threshold;
pub mod hampel;
pub mod interval;
pub mod mapping;
pub mod stats;
pub mod timestamp;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::metrics::MetricType;
use constant_threshold::{DetectorConfig, Hyperparams, TailMultipliers};

pub use mapping::DetectorMapping;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Sample must have at least {0}")]
    InsufficientSample(&'static str),
    #[error("unknown metric type '{0}'")]
    UnknownMetricType(String),
    #[error("unknown detector type '{0}'")]
    UnknownDetectorType(String),
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("invalid training interval '{0}'")]
    InvalidTrainingInterval(String),
}

/// Detector kinds understood by the model service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorType {
    ConstantThreshold,
}

impl DetectorType {
    pub const ALL: [DetectorType; 1] = [DetectorType::ConstantThreshold];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorType::ConstantThreshold => "constant-detector",
        }
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorType {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "constant-detector" => Ok(DetectorType::ConstantThreshold),
            other => Err(DetectorError::UnknownDetectorType(other.to_string())),
        }
    }
}

impl Serialize for DetectorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DetectorType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorMeta {
    #[serde(rename = "dateCreated", default, with = "timestamp")]
    pub date_created: Option<DateTime<Utc>>,
}

/// Transient copy of a detector owned by the model service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(rename = "type")]
    pub detector_type: DetectorType,
    #[serde(rename = "detectorConfig")]
    pub config: DetectorConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub trusted: bool,
    #[serde(
        rename = "lastUpdateTimestamp",
        default,
        with = "timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(rename = "createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DetectorMeta>,
}

fn default_true() -> bool {
    true
}

impl Detector {
    pub fn new(detector_type: DetectorType, config: DetectorConfig) -> Self {
        Self {
            uuid: None,
            detector_type,
            config,
            enabled: true,
            trusted: true,
            last_updated: None,
            created_by: None,
            meta: None,
        }
    }

    /// The detector `build` creates when a metric has none: sigma, 3.0 weak
    /// and 4.0 strong on both tails.
    pub fn default_for(detector_type: DetectorType) -> Self {
        match detector_type {
            DetectorType::ConstantThreshold => Self::new(
                detector_type,
                DetectorConfig::new(Hyperparams::Sigma(TailMultipliers::symmetric(3.0, 4.0))),
            ),
        }
    }

    pub fn uuid_string(&self) -> String {
        self.uuid.map(|u| u.to_string()).unwrap_or_default()
    }

    pub fn minutes_since_created(&self, now: DateTime<Utc>) -> Option<i64> {
        let created = self.meta.as_ref()?.date_created?;
        Some((now - created).num_minutes())
    }

    pub fn minutes_since_trained(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_updated.map(|ts| (now - ts).num_minutes())
    }

    /// True when never trained, or when the training interval has elapsed.
    /// A zero interval never retrains a trained detector.
    pub fn needs_training(&self, now: DateTime<Utc>) -> bool {
        if !self.config.is_trained() {
            return true;
        }
        let Some(minutes) = self.minutes_since_trained(now) else {
            return true;
        };
        let interval = self.config.training_interval();
        if interval.is_zero() {
            return false;
        }
        minutes > interval.as_minutes() as i64
    }

    /// Retrain thresholds in place and stamp `last_updated` with `now`.
    pub fn train(
        &mut self,
        points: &[Option<f64>],
        metric_type: MetricType,
        now: DateTime<Utc>,
    ) -> Result<(), DetectorError> {
        self.config.train(points, metric_type)?;
        self.last_updated = Some(now);
        Ok(())
    }
}
