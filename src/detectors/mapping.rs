//! Detector mappings bind a detector to the tag set of one metric.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::MetricConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorRef {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingUser {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandField {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub field: OperandField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub operands: Vec<Operand>,
    #[serde(default = "default_operator")]
    pub operator: String,
}

fn default_operator() -> String {
    "AND".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorMapping {
    pub detector: DetectorRef,
    pub expression: Expression,
    pub user: MappingUser,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "lastModifiedTimeInMillis", default, skip_serializing_if = "Option::is_none")]
    pub last_modified_time_in_millis: Option<i64>,
    #[serde(rename = "createdTimeInMillis", default, skip_serializing_if = "Option::is_none")]
    pub created_time_in_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Mapping whose expression ANDs one equality operand per metric tag.
pub fn build_metric_detector_mapping(detector_uuid: Uuid, metric: &MetricConfig, user: &str) -> DetectorMapping {
    let operands = metric
        .tags
        .iter()
        .map(|(key, value)| Operand {
            field: OperandField {
                key: key.clone(),
                value: value.clone(),
            },
        })
        .collect();
    DetectorMapping {
        detector: DetectorRef { uuid: detector_uuid },
        expression: Expression {
            operands,
            operator: default_operator(),
        },
        user: MappingUser { id: user.to_string() },
        fields: metric.tags.keys().cloned().collect(),
        id: None,
        last_modified_time_in_millis: None,
        created_time_in_millis: None,
        enabled: None,
    }
}
