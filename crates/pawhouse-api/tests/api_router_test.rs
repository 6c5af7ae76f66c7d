//! Router tests against in-memory broker fakes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt; // for `oneshot`

use pawhouse_api::{create_router, AppState};
use pawhouse_broker::{
    Error as BrokerError, JobStream, Result as BrokerResult, StateCache, StreamMessage,
};
use pawhouse_core::{ClusterDescriptor, ClusterStrategy, HeuristicStrategy, Job, JobPayload};

const TOKEN: &str = "test-internal-token";

// ---------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------

#[derive(Default)]
struct FakeStream {
    appended: Mutex<Vec<Job>>,
    broker_down: bool,
    group_ready: bool,
}

impl FakeStream {
    fn healthy() -> Self {
        Self {
            group_ready: true,
            ..Default::default()
        }
    }

    fn down() -> Self {
        Self {
            broker_down: true,
            ..Default::default()
        }
    }

    fn appended(&self) -> Vec<Job> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStream for FakeStream {
    async fn ensure_group(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn append(&self, job: &Job) -> BrokerResult<String> {
        if self.broker_down {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        let mut appended = self.appended.lock().unwrap();
        appended.push(job.clone());
        Ok(format!("{}-0", appended.len()))
    }

    async fn read_group(
        &self,
        _consumer: &str,
        _count: usize,
        _block: Duration,
    ) -> BrokerResult<Vec<StreamMessage>> {
        Ok(vec![])
    }

    async fn read_pending_backlog(
        &self,
        _consumer: &str,
        _count: usize,
    ) -> BrokerResult<Vec<StreamMessage>> {
        Ok(vec![])
    }

    async fn claim_idle(
        &self,
        _consumer: &str,
        _min_idle: Duration,
        _start: &str,
        _count: usize,
    ) -> BrokerResult<(Vec<StreamMessage>, String)> {
        Ok((vec![], "0-0".to_string()))
    }

    async fn ack(&self, _message_id: &str) -> BrokerResult<()> {
        Ok(())
    }

    async fn dead_letter(
        &self,
        _message: &StreamMessage,
        _reason: &str,
        _attempts: u32,
    ) -> BrokerResult<()> {
        Ok(())
    }

    async fn pending_count(&self, _consumer: &str, _limit: usize) -> BrokerResult<usize> {
        Ok(0)
    }

    async fn group_ready(&self) -> BrokerResult<bool> {
        if self.broker_down {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(self.group_ready)
    }
}

#[derive(Default)]
struct FakeCache {
    values: Mutex<HashMap<String, String>>,
    broker_down: bool,
}

impl FakeCache {
    fn with_descriptor(descriptor: &ClusterDescriptor) -> Self {
        let cache = Self::default();
        cache.values.lock().unwrap().insert(
            descriptor.pet_id.clone(),
            descriptor.to_json().unwrap(),
        );
        cache
    }

    fn down() -> Self {
        Self {
            broker_down: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl StateCache for FakeCache {
    async fn put(&self, descriptor: &ClusterDescriptor, _ttl: Duration) -> BrokerResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(descriptor.pet_id.clone(), descriptor.to_json()?);
        Ok(())
    }

    async fn get(&self, pet_id: &str) -> BrokerResult<Option<ClusterDescriptor>> {
        match self.values.lock().unwrap().get(pet_id) {
            None => Ok(None),
            Some(json) => Ok(Some(ClusterDescriptor::from_json(json)?)),
        }
    }

    async fn delete(&self, pet_id: &str) -> BrokerResult<bool> {
        Ok(self.values.lock().unwrap().remove(pet_id).is_some())
    }

    async fn ping(&self) -> BrokerResult<()> {
        if self.broker_down {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------
// Harness
// ---------------------------------------------------------------

fn app(stream: FakeStream, cache: FakeCache) -> axum::Router {
    let state = AppState {
        stream: Arc::new(stream),
        cache: Arc::new(cache),
    };
    create_router(state, TOKEN, Duration::from_secs(5))
}

fn sample_descriptor(pet_id: &str) -> ClusterDescriptor {
    let strategy = HeuristicStrategy::default();
    let payload = JobPayload {
        image_ids: vec!["a".to_string(), "b".to_string()],
        labels: vec!["Portraits".to_string()],
        ..Default::default()
    };
    strategy.cluster(
        pet_id,
        &payload,
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-Internal-Token", token);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("X-Internal-Token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ---------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------

#[tokio::test]
async fn test_healthz_requires_no_token() {
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app.oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

// ---------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------

#[tokio::test]
async fn test_internal_rejects_missing_token() {
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app
        .oneshot(get("/internal/pets/p1/clusters", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["detail"], "invalid internal token");
}

#[tokio::test]
async fn test_internal_rejects_wrong_token() {
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app
        .oneshot(get("/internal/pets/p1/clusters", Some("nope")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["detail"], "invalid internal token");
}

#[tokio::test]
async fn test_auth_runs_before_body_parsing() {
    // A body that would fail JSON parsing must still yield 401, proving the
    // token check precedes any body read.
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app
        .oneshot(post("/internal/cluster-jobs", Some("nope"), "{broken"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------

#[tokio::test]
async fn test_enqueue_accepts_with_payload() {
    let stream = Arc::new(FakeStream::healthy());
    let state = AppState {
        stream: stream.clone(),
        cache: Arc::new(FakeCache::default()),
    };
    let app = create_router(state, TOKEN, Duration::from_secs(5));

    let body = r#"{"pet_id":"p1","payload":{"image_ids":["a","b"],"labels":["L"],"quality_score":1.0}}"#;
    let response = app
        .oneshot(post("/internal/cluster-jobs", Some(TOKEN), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "accepted");

    let appended = stream.appended();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].pet_id, "p1");
    assert_eq!(appended[0].payload.image_ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_enqueue_keeps_provided_job_id() {
    let stream = Arc::new(FakeStream::healthy());
    let state = AppState {
        stream: stream.clone(),
        cache: Arc::new(FakeCache::default()),
    };
    let app = create_router(state, TOKEN, Duration::from_secs(5));

    let body = r#"{"pet_id":"p1","job_id":"job-42"}"#;
    let response = app
        .oneshot(post("/internal/cluster-jobs", Some(TOKEN), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let appended = stream.appended();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].job_id, "job-42");
    assert_eq!(appended[0].attempts, 0);
}

#[tokio::test]
async fn test_enqueue_assigns_job_id_when_absent() {
    let stream = Arc::new(FakeStream::healthy());
    let state = AppState {
        stream: stream.clone(),
        cache: Arc::new(FakeCache::default()),
    };
    let app = create_router(state, TOKEN, Duration::from_secs(5));

    let response = app
        .oneshot(post("/internal/cluster-jobs", Some(TOKEN), r#"{"pet_id":"p1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(!stream.appended()[0].job_id.is_empty());
}

#[tokio::test]
async fn test_enqueue_rejects_blank_pet_id() {
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app
        .oneshot(post("/internal/cluster-jobs", Some(TOKEN), r#"{"pet_id":"  "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_enqueue_broker_down_is_503() {
    let app = app(FakeStream::down(), FakeCache::default());
    let response = app
        .oneshot(post("/internal/cluster-jobs", Some(TOKEN), r#"{"pet_id":"p1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ---------------------------------------------------------------
// Cluster state reads
// ---------------------------------------------------------------

#[tokio::test]
async fn test_get_clusters_miss_is_404() {
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app
        .oneshot(get("/internal/pets/p1/clusters", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "cluster state not found");
}

#[tokio::test]
async fn test_get_clusters_hit_returns_descriptor() {
    let descriptor = sample_descriptor("p1");
    let app = app(
        FakeStream::healthy(),
        FakeCache::with_descriptor(&descriptor),
    );
    let response = app
        .oneshot(get("/internal/pets/p1/clusters", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["pet_id"], "p1");
    assert_eq!(body["clusters"][0]["hero_image_id"], "a");
    assert_eq!(body["metrics"]["strategy_version"], "heuristic-v1");
}

#[tokio::test]
async fn test_hero_images_maps_cluster_to_hero() {
    let descriptor = sample_descriptor("p1");
    let app = app(
        FakeStream::healthy(),
        FakeCache::with_descriptor(&descriptor),
    );
    let response = app
        .oneshot(get("/internal/pets/p1/hero-images", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["p1-cluster-0"], "a");
}

// ---------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------

#[tokio::test]
async fn test_invalidate_then_noop() {
    let descriptor = sample_descriptor("p1");
    let state = AppState {
        stream: Arc::new(FakeStream::healthy()),
        cache: Arc::new(FakeCache::with_descriptor(&descriptor)),
    };
    let app = create_router(state, TOKEN, Duration::from_secs(5));

    let response = app
        .clone()
        .oneshot(post("/internal/pets/p1/invalidate", Some(TOKEN), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "removed");

    // Immediately afterwards the read misses.
    let response = app
        .clone()
        .oneshot(get("/internal/pets/p1/clusters", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Repeating the invalidate is a noop.
    let response = app
        .oneshot(post("/internal/pets/p1/invalidate", Some(TOKEN), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["status"], "noop");
}

// ---------------------------------------------------------------
// Broker health
// ---------------------------------------------------------------

#[tokio::test]
async fn test_redis_health_ok() {
    let app = app(FakeStream::healthy(), FakeCache::default());
    let response = app
        .oneshot(get("/internal/health/redis", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_redis_health_down_is_503() {
    let app = app(FakeStream::healthy(), FakeCache::down());
    let response = app
        .oneshot(get("/internal/health/redis", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_redis_health_missing_group_is_503() {
    let app = app(FakeStream::default(), FakeCache::default());
    let response = app
        .oneshot(get("/internal/health/redis", Some(TOKEN)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
