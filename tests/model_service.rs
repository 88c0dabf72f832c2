//! HTTP-level tests for the model service client against an in-process axum server.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use adaptive_alerting::config::ModelServiceSettings;
use adaptive_alerting::datasources::MockDatasource;
use adaptive_alerting::detectors::{Detector, DetectorType};
use adaptive_alerting::metrics::{Metric, MetricConfig};
use adaptive_alerting::modelservice::{ClientError, HttpModelService, ModelService};

const UUID: &str = "4fdc3395-e969-449a-a306-201db183c6d7";

fn detector_json() -> Value {
    json!({
        "uuid": UUID,
        "type": "constant-detector",
        "detectorConfig": {
            "hyperparams": {"strategy": "sigma", "lower_weak_multiplier": 3.0, "lower_strong_multiplier": 4.0,
                            "upper_weak_multiplier": 3.0, "upper_strong_multiplier": 4.0},
            "trainingMetaData": {"trainingInterval": "7d"},
            "params": {"type": "TWO_TAILED",
                       "thresholds": {"upperWeak": 30.0, "upperStrong": 40.0, "lowerWeak": 3.0, "lowerStrong": 1.0}}
        },
        "enabled": true,
        "trusted": true,
        "lastUpdateTimestamp": "2019-11-15 00:00:00",
        "createdBy": "adaptive-alerting",
        "meta": {"dateCreated": "2019-11-14 00:00:00"}
    })
}

#[derive(Default)]
struct Recorded {
    requests: Mutex<Vec<(String, String, Value)>>,
    lookups: AtomicUsize,
    /// findByUuid answers 404 until this many lookups have happened.
    not_found_until: usize,
}

impl Recorded {
    fn record(&self, method: &str, path: &str, body: Value) {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string(), body));
    }

    fn requests(&self) -> Vec<(String, String, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

type Shared = Arc<Recorded>;

async fn find_by_uuid(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> Response {
    let n = state.lookups.fetch_add(1, Ordering::SeqCst);
    state.record("GET", "findByUuid", json!(q));
    if n < state.not_found_until || q.get("uuid").map(String::as_str) != Some(UUID) {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(detector_json()).into_response()
}

async fn find_matching(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    state.record("POST", "findMatchingByTags", body);
    Json(json!({"groupedDetectorsBySearchIndex": {"0": [{"uuid": UUID}]}}))
}

async fn create_detector(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, String) {
    state.record("POST", "detectors", body);
    (StatusCode::CREATED, UUID.to_string())
}

async fn update_detector(
    State(state): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.record("PUT", &format!("detectors?uuid={}", q["uuid"]), body);
    StatusCode::OK
}

async fn toggle_detector(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> StatusCode {
    state.record("POST", "toggleDetector", json!(q));
    StatusCode::OK
}

async fn search_mappings(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    state.record("POST", "detectorMappings/search", body);
    Json(json!([{
        "id": "mapping-1",
        "detector": {"uuid": UUID},
        "expression": {"operands": [{"field": {"key": "app", "value": "shop"}}], "operator": "AND"},
        "user": {"id": "adaptive-alerting"},
        "enabled": true
    }]))
}

async fn disable_mapping(State(state): State<Shared>, Query(q): Query<HashMap<String, String>>) -> StatusCode {
    state.record("PUT", "detectorMappings/disable", json!(q));
    StatusCode::OK
}

async fn save_mapping(State(state): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    state.record("POST", "detectorMappings", body);
    StatusCode::OK
}

async fn start(state: Shared) -> SocketAddr {
    let app = Router::new()
        .route("/api/v3/detectors/findByUuid", get(find_by_uuid))
        .route("/api/v3/detectors", post(create_detector).put(update_detector))
        .route("/api/v3/detectors/toggleDetector", post(toggle_detector))
        .route("/api/detectorMappings", post(save_mapping))
        .route("/api/detectorMappings/findMatchingByTags", post(find_matching))
        .route("/api/detectorMappings/search", post(search_mappings))
        .route("/api/detectorMappings/disable", put(disable_mapping))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, create_timeout_secs: u64) -> HttpModelService {
    let settings = ModelServiceSettings {
        url: Some(format!("http://{}", addr)),
        user: Some("adaptive-alerting".to_string()),
        create_timeout_secs,
        poll_interval_ms: 10,
        request_timeout_secs: 5,
    };
    HttpModelService::from_settings(&settings).unwrap()
}

fn metric_config() -> MetricConfig {
    serde_json::from_value(json!({
        "name": "shop requests",
        "type": "REQUEST_COUNT",
        "tags": {"role": "web", "app": "shop"}
    }))
    .unwrap()
}

#[tokio::test]
async fn test_list_detectors_for_metric() {
    let state = Shared::default();
    let addr = start(state.clone()).await;
    let client = client(addr, 1);

    let tags = BTreeMap::from([("app".to_string(), "shop".to_string())]);
    let detectors = client.list_detectors_for_metric(&tags).await.unwrap();
    assert_eq!(detectors.len(), 1);
    assert_eq!(detectors[0].uuid.unwrap().to_string(), UUID);
    assert_eq!(detectors[0].detector_type, DetectorType::ConstantThreshold);

    let requests = state.requests();
    assert_eq!(requests[0].1, "findMatchingByTags");
    assert_eq!(requests[0].2, json!([{"app": "shop"}]));
}

#[tokio::test]
async fn test_create_detector_polls_until_available() {
    let state = Arc::new(Recorded {
        not_found_until: 3,
        ..Default::default()
    });
    let addr = start(state.clone()).await;
    let client = client(addr, 5);

    let detector = Detector::default_for(DetectorType::ConstantThreshold);
    let created = client.create_detector(&detector).await.unwrap();
    assert_eq!(created.uuid.unwrap().to_string(), UUID);
    assert_eq!(state.lookups.load(Ordering::SeqCst), 4);

    let requests = state.requests();
    assert_eq!(requests[0].1, "detectors");
    assert_eq!(requests[0].2["type"], "constant-detector");
    assert!(requests[0].2.get("uuid").is_none());
}

#[tokio::test]
async fn test_create_detector_times_out() {
    let state = Arc::new(Recorded {
        not_found_until: usize::MAX,
        ..Default::default()
    });
    let addr = start(state.clone()).await;
    let client = client(addr, 0);

    let detector = Detector::default_for(DetectorType::ConstantThreshold);
    let err = client.create_detector(&detector).await.unwrap_err();
    match err {
        ClientError::DetectorUnavailable { uuid, timeout_secs } => {
            assert_eq!(uuid.to_string(), UUID);
            assert_eq!(timeout_secs, 0);
        }
        other => panic!("expected DetectorUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_detector_strips_server_fields() {
    let state = Shared::default();
    let addr = start(state.clone()).await;
    let client = client(addr, 1);

    let detector: Detector = serde_json::from_value(detector_json()).unwrap();
    let updated = client.update_detector(&detector).await.unwrap();
    assert_eq!(updated.uuid, detector.uuid);

    let requests = state.requests();
    let (_, path, body) = &requests[0];
    assert_eq!(path, &format!("detectors?uuid={}", UUID));
    assert!(body.get("lastUpdateTimestamp").is_none());
    assert!(body.get("createdBy").is_none());
    assert!(body.get("meta").is_none());
    assert_eq!(body["detectorConfig"]["params"]["type"], "TWO_TAILED");
}

#[tokio::test]
async fn test_status_error_is_reported() {
    let app = Router::new().route(
        "/api/detectorMappings/findMatchingByTags",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let err = client(addr, 1)
        .list_detectors_for_metric(&BTreeMap::new())
        .await
        .unwrap_err();
    match err {
        ClientError::Status { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected Status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disable_metric_over_http() {
    let state = Shared::default();
    let addr = start(state.clone()).await;
    let client = client(addr, 1);
    let config = metric_config();
    let metric = Metric::new(&config, Box::new(MockDatasource::new(vec![])), &client);

    let disabled = metric.disable_detectors().await.unwrap();
    assert_eq!(disabled.len(), 1);

    let requests = state.requests();
    let paths: Vec<&str> = requests.iter().map(|(_, p, _)| p.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "findMatchingByTags",
            "findByUuid",
            "detectorMappings/search",
            "detectorMappings/disable",
            "toggleDetector"
        ]
    );
    assert_eq!(requests[2].2, json!({"detectorUuid": UUID}));
    assert_eq!(requests[3].2, json!({"id": "mapping-1"}));
    assert_eq!(requests[4].2, json!({"uuid": UUID, "enabled": "false"}));
}

#[tokio::test]
async fn test_save_mapping_body() {
    let state = Shared::default();
    let addr = start(state.clone()).await;
    let client = client(addr, 1);

    let uuid = UUID.parse().unwrap();
    client.save_metric_detector_mapping(uuid, &metric_config()).await.unwrap();

    let requests = state.requests();
    let body = &requests[0].2;
    assert_eq!(body["detector"]["uuid"], UUID);
    assert_eq!(body["user"]["id"], "adaptive-alerting");
    assert_eq!(body["expression"]["operands"][0]["field"]["key"], "app");
    assert_eq!(body["expression"]["operands"][1]["field"]["key"], "role");
}
