//! Batch loops behind each subcommand.
//!
//! Files and metrics are processed sequentially. A failure is logged with the
//! file or metric name and processing moves on; the returned exit code is the
//! maximum seen across every file and metric.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::datasources::{self, DatasourceConfig};
use crate::metrics::diff::diff_metric_configs;
use crate::metrics::file::read_config_file;
use crate::metrics::{Metric, MetricConfig, TrainOutcome};
use crate::modelservice::ModelService;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// Per-metric reconciliation applied to every metric of every file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Build,
    Train,
    Disable,
    Delete,
}

/// Load a config file, logging instead of failing.
pub fn load_metric_configs(path: &Path) -> (Vec<MetricConfig>, u8) {
    match read_config_file(path) {
        Ok(configs) => (configs, EXIT_OK),
        Err(e) => {
            error!(path = %path.display(), "Unable to read config file: {}! Skipping!", e);
            (Vec::new(), EXIT_FAILURE)
        }
    }
}

/// Run `action` over every metric in every file.
pub async fn run_files(
    action: Action,
    files: &[PathBuf],
    client: &dyn ModelService,
    default_datasource: &DatasourceConfig,
) -> u8 {
    let mut exit_code = EXIT_OK;
    for path in files {
        let (configs, read_exit_code) = load_metric_configs(path);
        exit_code = exit_code.max(read_exit_code);
        let action_exit_code = run_metrics(action, &configs, client, default_datasource).await;
        exit_code = exit_code.max(action_exit_code);
        info!(path = %path.display(), ?action, "Done");
    }
    exit_code
}

pub async fn run_metrics(
    action: Action,
    configs: &[MetricConfig],
    client: &dyn ModelService,
    default_datasource: &DatasourceConfig,
) -> u8 {
    let mut exit_code = EXIT_OK;
    for config in configs {
        let datasource = match datasources::from_config(&config.datasource_config(default_datasource)) {
            Ok(ds) => ds,
            Err(e) => {
                error!(metric = %config.name, "Unable to create datasource for metric '{}': {}! Skipping!", config.name, e);
                exit_code = EXIT_FAILURE;
                continue;
            }
        };
        let metric = Metric::new(config, datasource, client);
        let metric_exit_code = match action {
            Action::Build => build_metric(&metric).await,
            Action::Train => train_metric(&metric).await,
            Action::Disable => disable_metric(&metric).await,
            Action::Delete => delete_metric(&metric).await,
        };
        exit_code = exit_code.max(metric_exit_code);
    }
    exit_code
}

async fn build_metric(metric: &Metric<'_>) -> u8 {
    let name = &metric.config().name;
    match metric.build_detectors().await {
        Ok(created) => {
            for detector in &created {
                info!(
                    metric = %name,
                    "New '{}' detector created with UUID: {}",
                    detector.detector_type,
                    detector.uuid_string()
                );
            }
            if created.is_empty() {
                info!("No detectors built for metric '{}'", name);
            }
            EXIT_OK
        }
        // legacy behaviour: a short sample does not fail `build`
        Err(e) if e.is_insufficient_sample() => {
            warn!("Unable to train detector for metric '{}', {}! Skipping!", name, e);
            EXIT_OK
        }
        Err(e) => {
            error!(metric = %name, error = %e, "Exception while creating detector for metric '{}'! Skipping!", name);
            EXIT_FAILURE
        }
    }
}

async fn train_metric(metric: &Metric<'_>) -> u8 {
    let name = &metric.config().name;
    let outcomes = match metric.train_detectors().await {
        Ok(outcomes) => outcomes,
        Err(e) => {
            error!(metric = %name, error = %e, "Exception while training detector(s) for metric '{}'! Skipping!", name);
            return EXIT_FAILURE;
        }
    };
    let mut exit_code = EXIT_OK;
    for outcome in outcomes {
        match outcome {
            TrainOutcome::Trained(d) => {
                info!("Trained '{}' detector with UUID: {}", d.detector_type, d.uuid_string());
            }
            TrainOutcome::NotRequired(d) => {
                info!(
                    "Training not required for '{}' detector with UUID: {}",
                    d.detector_type,
                    d.uuid_string()
                );
            }
            TrainOutcome::Failed { detector, error } => {
                error!(
                    uuid = %detector.uuid_string(),
                    "Unable to train detector for metric '{}', {}! Skipping!", name, error
                );
                exit_code = EXIT_FAILURE;
            }
        }
    }
    exit_code
}

async fn disable_metric(metric: &Metric<'_>) -> u8 {
    let name = &metric.config().name;
    match metric.disable_detectors().await {
        Ok(disabled) => {
            for detector in &disabled {
                info!("Detector/Detector Mapping with UUID '{}' disabled.", detector.uuid_string());
            }
            if disabled.is_empty() {
                info!("No detectors to disable for metric '{}'", name);
            }
            EXIT_OK
        }
        Err(e) => {
            error!(metric = %name, error = %e, "Exception while disabling detectors for metric '{}'! Skipping!", name);
            EXIT_FAILURE
        }
    }
}

async fn delete_metric(metric: &Metric<'_>) -> u8 {
    let name = &metric.config().name;
    match metric.delete_detectors().await {
        Ok(deleted) => {
            for detector in &deleted {
                info!("Detector/Detector Mapping with UUID '{}' deleted.", detector.uuid_string());
            }
            if deleted.is_empty() {
                info!("No detectors to delete for metric '{}'", name);
            }
            EXIT_OK
        }
        Err(e) => {
            error!(metric = %name, error = %e, "Exception while deleting detectors for metric '{}'! Skipping!", name);
            EXIT_FAILURE
        }
    }
}

/// Diff two config files and write the result as pretty JSON to `output`.
/// Nothing is written when either input fails to load.
pub fn diff_files(previous: &Path, current: &Path, output: &Path) -> u8 {
    let (previous_configs, previous_exit_code) = load_metric_configs(previous);
    let (current_configs, current_exit_code) = load_metric_configs(current);
    if previous_exit_code != EXIT_OK || current_exit_code != EXIT_OK {
        return EXIT_FAILURE;
    }
    let diff = diff_metric_configs(&previous_configs, &current_configs);
    let rendered = match serde_json::to_string_pretty(&diff) {
        Ok(rendered) => rendered,
        Err(e) => {
            error!(error = %e, "Unable to serialize config diff");
            return EXIT_FAILURE;
        }
    };
    if let Err(e) = std::fs::write(output, rendered) {
        error!(path = %output.display(), error = %e, "Unable to write diff output");
        return EXIT_FAILURE;
    }
    info!(
        added = diff.added.len(),
        modified = diff.modified.len(),
        deleted = diff.deleted.len(),
        path = %output.display(),
        "Config diff written"
    );
    EXIT_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modelservice::memory::InMemoryModelService;
    use std::io::Write;

    fn metric_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn configs(data: &str) -> Vec<MetricConfig> {
        serde_json::from_str(&format!(
            r#"[{{"name": "m", "type": "REQUEST_COUNT", "tags": {{"app": "a"}}, "datasource": {{"type": "mock", "data": {}}}}}]"#,
            data
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_then_train_then_delete() {
        let service = InMemoryModelService::new("tester");
        let default = DatasourceConfig::default();
        let metrics = configs("[1, 2, 3, 4, 5, null, 7]");

        assert_eq!(run_metrics(Action::Build, &metrics, &service, &default).await, EXIT_OK);
        assert_eq!(service.detector_count(), 1);
        assert_eq!(run_metrics(Action::Build, &metrics, &service, &default).await, EXIT_OK);
        assert_eq!(service.detector_count(), 1);
        assert_eq!(run_metrics(Action::Train, &metrics, &service, &default).await, EXIT_OK);
        assert_eq!(run_metrics(Action::Disable, &metrics, &service, &default).await, EXIT_OK);
        assert_eq!(run_metrics(Action::Delete, &metrics, &service, &default).await, EXIT_OK);
        assert_eq!(service.detector_count(), 0);
    }

    #[tokio::test]
    async fn test_build_insufficient_sample_does_not_fail() {
        let service = InMemoryModelService::new("tester");
        let code = run_metrics(Action::Build, &configs("[1]"), &service, &DatasourceConfig::default()).await;
        assert_eq!(code, EXIT_OK);
        assert_eq!(service.detector_count(), 0);
    }

    #[tokio::test]
    async fn test_build_fails_when_created_detector_unavailable() {
        let service = InMemoryModelService::new("tester").with_unavailable_creates();
        let code = run_metrics(
            Action::Build,
            &configs("[1, 2, 3, 4, 5, null, 7]"),
            &service,
            &DatasourceConfig::default(),
        )
        .await;
        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(service.detector_count(), 0);
    }

    #[tokio::test]
    async fn test_train_insufficient_sample_fails() {
        let service = InMemoryModelService::new("tester");
        let default = DatasourceConfig::default();
        run_metrics(Action::Build, &configs("[1, 2, 3]"), &service, &default).await;
        let uuid = service.list_detectors_for_metric(&configs("[]")[0].tags).await.unwrap()[0]
            .uuid
            .unwrap();
        service.age_detector(uuid, chrono::Duration::days(30));

        let code = run_metrics(Action::Train, &configs("[1]"), &service, &default).await;
        assert_eq!(code, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_unknown_datasource_fails_metric_only() {
        let service = InMemoryModelService::new("tester");
        let metrics: Vec<MetricConfig> = serde_json::from_str(
            r#"[
            {"name": "bad", "type": "LATENCY", "tags": {"app": "x"}, "datasource": {"type": "influx"}},
            {"name": "good", "type": "LATENCY", "tags": {"app": "y"}, "datasource": {"type": "mock"}}
        ]"#,
        )
        .unwrap();
        let code = run_metrics(Action::Build, &metrics, &service, &DatasourceConfig::default()).await;
        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(service.detector_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_code_is_max_across_files() {
        let service = InMemoryModelService::new("tester");
        let good = metric_file(
            r#"[{"name": "m", "type": "ERROR_COUNT", "tags": {"app": "a"}, "datasource": {"type": "mock"}}]"#,
        );
        let files = vec![PathBuf::from("/nonexistent/metrics.json"), good.path().to_path_buf()];
        let code = run_files(Action::Build, &files, &service, &DatasourceConfig::default()).await;
        assert_eq!(code, EXIT_FAILURE);
        // the later good file is still processed
        assert_eq!(service.detector_count(), 1);
    }

    #[test]
    fn test_diff_files_writes_output() {
        let previous = metric_file(r#"[{"name": "A", "type": "LATENCY", "tags": {"app": "a"}}]"#);
        let current = metric_file(r#"[{"name": "B", "type": "LATENCY", "tags": {"app": "b"}}]"#);
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("diff.json");

        assert_eq!(diff_files(previous.path(), current.path(), &output), EXIT_OK);
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written["added"][0]["name"], "B");
        assert_eq!(written["deleted"][0]["name"], "A");
        assert_eq!(written["modified"], serde_json::json!([]));
    }

    #[test]
    fn test_diff_files_missing_input_writes_nothing() {
        let current = metric_file("[]");
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("diff.json");
        let code = diff_files(Path::new("/nonexistent/prev.json"), current.path(), &output);
        assert_eq!(code, EXIT_FAILURE);
        assert!(!output.exists());
    }
}
