//! Client for the model service that owns detectors and detector mappings.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ModelServiceSettings;
use crate::detectors::mapping::build_metric_detector_mapping;
use crate::detectors::{Detector, DetectorMapping};
use crate::metrics::MetricConfig;

#[cfg(test)]
pub(crate) mod memory;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("model service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model service returned HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("unable to decode model service response: {0}")]
    Decode(String),
    #[error("Timeout waiting for detector uuid '{uuid}' to be available from model service after {timeout_secs}s")]
    DetectorUnavailable { uuid: Uuid, timeout_secs: u64 },
    #[error("model service did not return a detector uuid (got '{0}')")]
    MissingUuid(String),
    #[error("detector '{0}' not found")]
    DetectorNotFound(Uuid),
    #[error("model service {0} is not configured")]
    NotConfigured(&'static str),
}

/// Operations the reconciler needs from the model service.
#[async_trait::async_trait]
pub trait ModelService: Send + Sync {
    /// Identity recorded on mappings created by this client.
    fn user(&self) -> &str;

    async fn get_detector(&self, uuid: Uuid) -> Result<Option<Detector>, ClientError>;

    async fn list_detectors_for_metric(&self, tags: &BTreeMap<String, String>) -> Result<Vec<Detector>, ClientError>;

    /// Create a detector and wait until the service can return it.
    async fn create_detector(&self, detector: &Detector) -> Result<Detector, ClientError>;

    async fn update_detector(&self, detector: &Detector) -> Result<Detector, ClientError>;

    async fn delete_detector(&self, uuid: Uuid) -> Result<(), ClientError>;

    async fn toggle_detector(&self, uuid: Uuid, enabled: bool) -> Result<(), ClientError>;

    async fn save_metric_detector_mapping(&self, uuid: Uuid, metric: &MetricConfig) -> Result<(), ClientError>;

    async fn list_detector_mappings(&self, uuid: Uuid) -> Result<Vec<DetectorMapping>, ClientError>;

    async fn delete_metric_detector_mapping(&self, id: &str) -> Result<(), ClientError>;

    async fn disable_metric_detector_mapping(&self, id: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Deserialize)]
struct MatchingDetectors {
    #[serde(rename = "groupedDetectorsBySearchIndex", default)]
    grouped: Option<BTreeMap<String, Vec<MatchedDetector>>>,
}

#[derive(Debug, Deserialize)]
struct MatchedDetector {
    uuid: Uuid,
}

/// reqwest-backed [`ModelService`].
pub struct HttpModelService {
    client: Client,
    url: String,
    user: String,
    create_timeout: Duration,
    poll_interval: Duration,
}

impl HttpModelService {
    pub fn from_settings(settings: &ModelServiceSettings) -> Result<Self, ClientError> {
        let url = settings.url.as_deref().ok_or(ClientError::NotConfigured("url"))?;
        let user = settings.user.as_deref().ok_or(ClientError::NotConfigured("user"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            create_timeout: Duration::from_secs(settings.create_timeout_secs),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ModelService for HttpModelService {
    fn user(&self) -> &str {
        &self.user
    }

    async fn get_detector(&self, uuid: Uuid) -> Result<Option<Detector>, ClientError> {
        let response = self
            .client
            .get(self.endpoint("/api/v3/detectors/findByUuid"))
            .query(&[("uuid", uuid.to_string())])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(response).await?.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn list_detectors_for_metric(&self, tags: &BTreeMap<String, String>) -> Result<Vec<Detector>, ClientError> {
        let response = self
            .client
            .post(self.endpoint("/api/detectorMappings/findMatchingByTags"))
            .json(&[tags])
            .send()
            .await?;
        let matching: MatchingDetectors = Self::decode(Self::check(response).await?).await?;
        let mut detectors = Vec::new();
        let matched_detectors = matching.grouped.as_ref().and_then(|g| g.get("0"));
        for matched in matched_detectors.into_iter().flatten() {
            match self.get_detector(matched.uuid).await? {
                Some(detector) => detectors.push(detector),
                None => warn!(uuid = %matched.uuid, "mapped detector not found"),
            }
        }
        Ok(detectors)
    }

    async fn create_detector(&self, detector: &Detector) -> Result<Detector, ClientError> {
        let response = self
            .client
            .post(self.endpoint("/api/v3/detectors"))
            .json(detector)
            .send()
            .await?;
        let text = Self::check(response).await?.text().await?;
        let raw = text.trim().trim_matches('"');
        let uuid: Uuid = raw.parse().map_err(|_| ClientError::MissingUuid(raw.to_string()))?;
        debug!(%uuid, "detector created, waiting for availability");

        let started = Instant::now();
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if let Some(created) = self.get_detector(uuid).await? {
                return Ok(created);
            }
            if started.elapsed() >= self.create_timeout {
                return Err(ClientError::DetectorUnavailable {
                    uuid,
                    timeout_secs: self.create_timeout.as_secs(),
                });
            }
        }
    }

    async fn update_detector(&self, detector: &Detector) -> Result<Detector, ClientError> {
        let uuid = detector.uuid.ok_or_else(|| ClientError::MissingUuid(String::new()))?;
        let mut body = serde_json::to_value(detector).map_err(|e| ClientError::Decode(e.to_string()))?;
        if let Some(fields) = body.as_object_mut() {
            // server-managed
            fields.remove("lastUpdateTimestamp");
            fields.remove("createdBy");
            fields.remove("meta");
        }
        let response = self
            .client
            .put(self.endpoint("/api/v3/detectors"))
            .query(&[("uuid", uuid.to_string())])
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        self.get_detector(uuid)
            .await?
            .ok_or(ClientError::DetectorNotFound(uuid))
    }

    async fn delete_detector(&self, uuid: Uuid) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.endpoint("/api/v3/detectors"))
            .query(&[("uuid", uuid.to_string())])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn toggle_detector(&self, uuid: Uuid, enabled: bool) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint("/api/v3/detectors/toggleDetector"))
            .query(&[("uuid", uuid.to_string()), ("enabled", enabled.to_string())])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn save_metric_detector_mapping(&self, uuid: Uuid, metric: &MetricConfig) -> Result<(), ClientError> {
        let mapping = build_metric_detector_mapping(uuid, metric, &self.user);
        let response = self
            .client
            .post(self.endpoint("/api/detectorMappings"))
            .json(&mapping)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_detector_mappings(&self, uuid: Uuid) -> Result<Vec<DetectorMapping>, ClientError> {
        let response = self
            .client
            .post(self.endpoint("/api/detectorMappings/search"))
            .json(&json!({ "detectorUuid": uuid }))
            .send()
            .await?;
        Self::decode(Self::check(response).await?).await
    }

    async fn delete_metric_detector_mapping(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.endpoint("/api/detectorMappings"))
            .query(&[("id", id)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn disable_metric_detector_mapping(&self, id: &str) -> Result<(), ClientError> {
        let response = self
            .client
            .put(self.endpoint("/api/detectorMappings/disable"))
            .query(&[("id", id)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
