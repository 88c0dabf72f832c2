//! Constant-threshold detector configuration and training.
//!
//! A constant-threshold detector is trained with one of three strategies:
//!
//! - `sigma`: `mean ± k * stddev`
//! - `quartile`: `q3 + k * iqr` / `q1 - k * iqr`
//! - `highwatermark`: `k * max(hampel_filtered(sample))`, upper tail only
//!
//! The strategy is carried in `hyperparams.strategy` and resolved to a closed
//! [`Hyperparams`] variant when the configuration is parsed, so an unknown
//! strategy is rejected before any data is queried.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::detectors::hampel::{self, hampel_filter};
use crate::detectors::interval::TrainingInterval;
use crate::detectors::stats::{quartile_thresholds, sigma_thresholds, Sample};
use crate::detectors::DetectorError;
use crate::metrics::MetricType;

/// Cleaned points required before the high-watermark trim step.
pub const MIN_HIGHWATERMARK_SAMPLE: usize = 33;

/// Threshold fitting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Sigma,
    Quartile,
    Highwatermark,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sigma => "sigma",
            Strategy::Quartile => "quartile",
            Strategy::Highwatermark => "highwatermark",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sigma" => Ok(Strategy::Sigma),
            "quartile" => Ok(Strategy::Quartile),
            "highwatermark" => Ok(Strategy::Highwatermark),
            other => Err(DetectorError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Which side(s) of the expected range are anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TailType {
    #[serde(rename = "RIGHT_TAILED")]
    Right,
    #[serde(rename = "LEFT_TAILED")]
    Left,
    #[serde(rename = "TWO_TAILED")]
    Two,
}

impl TailType {
    pub fn for_metric(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::RequestCount => TailType::Two,
            MetricType::ErrorCount => TailType::Right,
            MetricType::SuccessRate => TailType::Left,
            MetricType::Latency => TailType::Right,
        }
    }
}

/// Weak/strong multipliers for both tails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailMultipliers {
    pub lower_weak_multiplier: f64,
    pub lower_strong_multiplier: f64,
    pub upper_weak_multiplier: f64,
    pub upper_strong_multiplier: f64,
}

impl TailMultipliers {
    /// Same weak/strong pair on both tails.
    pub fn symmetric(weak: f64, strong: f64) -> Self {
        Self {
            lower_weak_multiplier: weak,
            lower_strong_multiplier: strong,
            upper_weak_multiplier: weak,
            upper_strong_multiplier: strong,
        }
    }
}

impl Default for TailMultipliers {
    fn default() -> Self {
        Self::symmetric(4.0, 5.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighwatermarkHyperparams {
    pub upper_weak_multiplier: f64,
    pub upper_strong_multiplier: f64,
    #[serde(deserialize_with = "whole_number")]
    pub hampel_window_size: usize,
    #[serde(alias = "hampel_n_signma")]
    pub hampel_n_sigma: f64,
}

impl Default for HighwatermarkHyperparams {
    fn default() -> Self {
        Self {
            upper_weak_multiplier: 1.05,
            upper_strong_multiplier: 1.10,
            hampel_window_size: 10,
            hampel_n_sigma: 3.0,
        }
    }
}

/// Stored configs may carry the window size as a float such as `10.0`.
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 || raw > usize::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative whole number, got {}",
            raw
        )));
    }
    Ok(raw as usize)
}

/// Strategy plus its parameters; serialized with an inline `strategy` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum Hyperparams {
    Sigma(TailMultipliers),
    Quartile(TailMultipliers),
    Highwatermark(HighwatermarkHyperparams),
}

impl Hyperparams {
    pub fn strategy(&self) -> Strategy {
        match self {
            Hyperparams::Sigma(_) => Strategy::Sigma,
            Hyperparams::Quartile(_) => Strategy::Quartile,
            Hyperparams::Highwatermark(_) => Strategy::Highwatermark,
        }
    }

    /// Default parameters for `strategy`.
    pub fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Sigma => Hyperparams::Sigma(TailMultipliers::default()),
            Strategy::Quartile => Hyperparams::Quartile(TailMultipliers::default()),
            Strategy::Highwatermark => Hyperparams::Highwatermark(HighwatermarkHyperparams::default()),
        }
    }
}

#[derive(Deserialize)]
struct RawHyperparams {
    strategy: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for Hyperparams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = RawHyperparams::deserialize(deserializer)?;
        let strategy: Strategy = raw.strategy.parse().map_err(D::Error::custom)?;
        let rest = serde_json::Value::Object(raw.rest);
        let parsed = match strategy {
            Strategy::Sigma => serde_json::from_value(rest).map(Hyperparams::Sigma),
            Strategy::Quartile => serde_json::from_value(rest).map(Hyperparams::Quartile),
            Strategy::Highwatermark => serde_json::from_value(rest).map(Hyperparams::Highwatermark),
        };
        parsed.map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetaData {
    #[serde(rename = "trainingInterval", default)]
    pub training_interval: TrainingInterval,
}

/// Trained threshold values. High-watermark leaves the lower pair empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(rename = "upperWeak", default, skip_serializing_if = "Option::is_none")]
    pub upper_weak: Option<f64>,
    #[serde(rename = "upperStrong", default, skip_serializing_if = "Option::is_none")]
    pub upper_strong: Option<f64>,
    #[serde(rename = "lowerWeak", default, skip_serializing_if = "Option::is_none")]
    pub lower_weak: Option<f64>,
    #[serde(rename = "lowerStrong", default, skip_serializing_if = "Option::is_none")]
    pub lower_strong: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Params {
    #[serde(rename = "type")]
    pub tail: TailType,
    pub thresholds: Thresholds,
}

/// Configuration of a constant-threshold detector.
///
/// `params` stays `None` until [`DetectorConfig::train`] succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub hyperparams: Hyperparams,
    #[serde(rename = "trainingMetaData", default)]
    pub training_meta_data: TrainingMetaData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl DetectorConfig {
    pub fn new(hyperparams: Hyperparams) -> Self {
        Self {
            hyperparams,
            training_meta_data: TrainingMetaData::default(),
            params: None,
        }
    }

    pub fn training_interval(&self) -> TrainingInterval {
        self.training_meta_data.training_interval
    }

    pub fn is_trained(&self) -> bool {
        self.params.is_some()
    }

    /// Fit thresholds to `points` and store them in `params`.
    ///
    /// Missing points are dropped first. On error `params` is left as it was.
    pub fn train(&mut self, points: &[Option<f64>], metric_type: MetricType) -> Result<(), DetectorError> {
        let tail = TailType::for_metric(metric_type);
        let sample = Sample::from_points(points);
        let thresholds = match &self.hyperparams {
            Hyperparams::Sigma(m) => train_sigma(&sample, m)?,
            Hyperparams::Quartile(m) => train_quartile(&sample, m)?,
            Hyperparams::Highwatermark(h) => train_highwatermark(&sample, h)?,
        };
        debug!(
            strategy = %self.hyperparams.strategy(),
            points = sample.len(),
            ?tail,
            ?thresholds,
            "trained constant threshold detector"
        );
        self.params = Some(Params { tail, thresholds });
        Ok(())
    }
}

fn train_sigma(sample: &Sample, m: &TailMultipliers) -> Result<Thresholds, DetectorError> {
    let sigma = sample.sigma()?;
    let mean = sample.mean();
    let weak = sigma_thresholds(mean, sigma, m.upper_weak_multiplier, m.lower_weak_multiplier);
    let strong = sigma_thresholds(mean, sigma, m.upper_strong_multiplier, m.lower_strong_multiplier);
    Ok(Thresholds {
        upper_weak: Some(weak.upper),
        upper_strong: Some(strong.upper),
        lower_weak: Some(weak.lower),
        lower_strong: Some(strong.lower),
    })
}

fn train_quartile(sample: &Sample, m: &TailMultipliers) -> Result<Thresholds, DetectorError> {
    if sample.is_empty() {
        return Err(DetectorError::InsufficientSample("one element"));
    }
    let q = sample.quartiles();
    let weak = quartile_thresholds(&q, m.upper_weak_multiplier, m.lower_weak_multiplier);
    let strong = quartile_thresholds(&q, m.upper_strong_multiplier, m.lower_strong_multiplier);
    Ok(Thresholds {
        upper_weak: Some(weak.upper),
        upper_strong: Some(strong.upper),
        lower_weak: Some(weak.lower),
        lower_strong: Some(strong.lower),
    })
}

fn train_highwatermark(sample: &Sample, h: &HighwatermarkHyperparams) -> Result<Thresholds, DetectorError> {
    if sample.len() < MIN_HIGHWATERMARK_SAMPLE {
        return Err(DetectorError::InsufficientSample("thirty elements"));
    }
    let trimmed = hampel::trim(sample.values());
    let filtered = hampel_filter(trimmed, h.hampel_window_size, h.hampel_n_sigma)?;
    let highwatermark = filtered
        .values
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    debug!(
        highwatermark,
        outliers = filtered.outliers.len(),
        "hampel filter applied"
    );
    Ok(Thresholds {
        upper_weak: Some(highwatermark * h.upper_weak_multiplier),
        upper_strong: Some(highwatermark * h.upper_strong_multiplier),
        lower_weak: None,
        lower_strong: None,
    })
}
