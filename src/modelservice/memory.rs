//! In-process model service used by reconciler and command tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{ClientError, ModelService};
use crate::detectors::mapping::build_metric_detector_mapping;
use crate::detectors::{Detector, DetectorMapping};
use crate::metrics::MetricConfig;

#[derive(Default)]
struct State {
    detectors: BTreeMap<Uuid, Detector>,
    mappings: Vec<DetectorMapping>,
    next_mapping_id: u64,
}

pub struct InMemoryModelService {
    user: String,
    state: Mutex<State>,
    /// Created detectors never become retrievable, as after a create timeout.
    unavailable_after_create: bool,
}

impl InMemoryModelService {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            state: Mutex::new(State::default()),
            unavailable_after_create: false,
        }
    }

    pub fn with_unavailable_creates(mut self) -> Self {
        self.unavailable_after_create = true;
        self
    }

    /// Pretend the detector was last trained `by` earlier than recorded.
    pub fn age_detector(&self, uuid: Uuid, by: Duration) {
        self.update_with(uuid, |d| {
            d.last_updated = d.last_updated.map(|ts| ts - by);
        });
    }

    pub fn update_with<F: FnOnce(&mut Detector)>(&self, uuid: Uuid, f: F) {
        let mut state = self.state.lock().unwrap();
        if let Some(detector) = state.detectors.get_mut(&uuid) {
            f(detector);
        }
    }

    pub fn detector_count(&self) -> usize {
        self.state.lock().unwrap().detectors.len()
    }
}

fn matches_tags(mapping: &DetectorMapping, tags: &BTreeMap<String, String>) -> bool {
    let operands: BTreeMap<&str, &str> = mapping
        .expression
        .operands
        .iter()
        .map(|o| (o.field.key.as_str(), o.field.value.as_str()))
        .collect();
    operands.len() == tags.len() && tags.iter().all(|(k, v)| operands.get(k.as_str()) == Some(&v.as_str()))
}

#[async_trait::async_trait]
impl ModelService for InMemoryModelService {
    fn user(&self) -> &str {
        &self.user
    }

    async fn get_detector(&self, uuid: Uuid) -> Result<Option<Detector>, ClientError> {
        Ok(self.state.lock().unwrap().detectors.get(&uuid).cloned())
    }

    async fn list_detectors_for_metric(&self, tags: &BTreeMap<String, String>) -> Result<Vec<Detector>, ClientError> {
        let state = self.state.lock().unwrap();
        let mut found = Vec::new();
        for mapping in state.mappings.iter().filter(|m| matches_tags(m, tags)) {
            if let Some(detector) = state.detectors.get(&mapping.detector.uuid) {
                found.push(detector.clone());
            }
        }
        Ok(found)
    }

    async fn create_detector(&self, detector: &Detector) -> Result<Detector, ClientError> {
        let mut created = detector.clone();
        let uuid = Uuid::new_v4();
        if self.unavailable_after_create {
            return Err(ClientError::DetectorUnavailable { uuid, timeout_secs: 0 });
        }
        created.uuid = Some(uuid);
        created.created_by = Some(self.user.clone());
        self.state.lock().unwrap().detectors.insert(uuid, created.clone());
        Ok(created)
    }

    async fn update_detector(&self, detector: &Detector) -> Result<Detector, ClientError> {
        let uuid = detector.uuid.ok_or_else(|| ClientError::MissingUuid(String::new()))?;
        let mut state = self.state.lock().unwrap();
        let stored = state
            .detectors
            .get_mut(&uuid)
            .ok_or(ClientError::DetectorNotFound(uuid))?;
        stored.config = detector.config.clone();
        stored.enabled = detector.enabled;
        stored.trusted = detector.trusted;
        stored.last_updated = Some(Utc::now());
        Ok(stored.clone())
    }

    async fn delete_detector(&self, uuid: Uuid) -> Result<(), ClientError> {
        self.state.lock().unwrap().detectors.remove(&uuid);
        Ok(())
    }

    async fn toggle_detector(&self, uuid: Uuid, enabled: bool) -> Result<(), ClientError> {
        self.update_with(uuid, |d| d.enabled = enabled);
        Ok(())
    }

    async fn save_metric_detector_mapping(&self, uuid: Uuid, metric: &MetricConfig) -> Result<(), ClientError> {
        let mut mapping = build_metric_detector_mapping(uuid, metric, &self.user);
        let mut state = self.state.lock().unwrap();
        state.next_mapping_id += 1;
        mapping.id = Some(format!("mapping-{}", state.next_mapping_id));
        mapping.enabled = Some(true);
        state.mappings.push(mapping);
        Ok(())
    }

    async fn list_detector_mappings(&self, uuid: Uuid) -> Result<Vec<DetectorMapping>, ClientError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .mappings
            .iter()
            .filter(|m| m.detector.uuid == uuid)
            .cloned()
            .collect())
    }

    async fn delete_metric_detector_mapping(&self, id: &str) -> Result<(), ClientError> {
        self.state
            .lock()
            .unwrap()
            .mappings
            .retain(|m| m.id.as_deref() != Some(id));
        Ok(())
    }

    async fn disable_metric_detector_mapping(&self, id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        for mapping in state.mappings.iter_mut().filter(|m| m.id.as_deref() == Some(id)) {
            mapping.enabled = Some(false);
        }
        Ok(())
    }
}
