//! Added / modified / deleted metric configs between two file versions.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use super::MetricConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDiff {
    pub added: Vec<MetricConfig>,
    pub modified: Vec<MetricConfig>,
    pub deleted: Vec<MetricConfig>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Canonical form used for the "modified" check. `serde_json::Value` keeps
/// object keys sorted, so field order in the source file does not matter.
fn canonical(config: &MetricConfig) -> Option<Value> {
    serde_json::to_value(config).ok()
}

type TagSet = BTreeMap<String, String>;

/// Configs are matched by their full tag set, independent of tag order.
/// Output lists keep the order of the file they came from.
pub fn diff_metric_configs(previous: &[MetricConfig], current: &[MetricConfig]) -> ConfigDiff {
    let previous_by_tags: BTreeMap<&TagSet, &MetricConfig> = previous.iter().map(|c| (&c.tags, c)).collect();
    let current_tags: BTreeSet<&TagSet> = current.iter().map(|c| &c.tags).collect();

    let mut diff = ConfigDiff::default();
    for config in current {
        match previous_by_tags.get(&config.tags) {
            None => diff.added.push(config.clone()),
            Some(prev) if canonical(prev) != canonical(config) => diff.modified.push(config.clone()),
            Some(_) => {}
        }
    }
    for config in previous {
        if !current_tags.contains(&config.tags) {
            diff.deleted.push(config.clone());
        }
    }
    diff
}
