//! HTTP surface tests against the in-memory store.

use std::sync::Arc;

use anyhow::{bail, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use tether_core::{async_trait, Probe, RunStore};
use tether_server::{router, AdmissionService, AppState};
use tether_testing::{MemoryRunStore, RecordingQueue};

struct StaticProbe {
    name: &'static str,
    healthy: bool,
}

#[async_trait]
impl Probe for StaticProbe {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            bail!("connection refused")
        }
    }
}

fn app_with_probes(probes: Vec<Arc<dyn Probe>>) -> (Arc<MemoryRunStore>, Router) {
    let store = Arc::new(MemoryRunStore::new());
    let queue = Arc::new(RecordingQueue::new());
    let state = AppState {
        store: store.clone(),
        admission: Arc::new(AdmissionService::new(store.clone(), queue)),
        probes: Arc::new(probes),
    };
    (store, router(state))
}

fn app() -> (Arc<MemoryRunStore>, Router) {
    app_with_probes(vec![
        Arc::new(StaticProbe {
            name: "db",
            healthy: true,
        }),
        Arc::new(StaticProbe {
            name: "queue",
            healthy: true,
        }),
    ])
}

fn post_runs(body: &str, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/runs")
        .header("content-type", "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_create_run_happy_path() {
    let (_, app) = app();

    let response = app
        .oneshot(post_runs(r#"{"parameters":{"model":"test","x":1}}"#, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["attempt_count"], 0);
    assert_eq!(body["parameters"], json!({"model": "test", "x": 1}));
    assert_eq!(body["started_at"], Value::Null);
    assert_eq!(body["finished_at"], Value::Null);
    assert!(body["id"].as_str().unwrap().parse::<Uuid>().is_ok());
}

#[tokio::test]
async fn test_implicit_deduplication_returns_the_same_run() {
    let (_, app) = app();
    let body = r#"{"parameters":{"unique":"implicit_test"}}"#;

    let first = app.clone().oneshot(post_runs(body, None)).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let id1 = body_json(first).await["id"].clone();

    let second = app.oneshot(post_runs(body, None)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let id2 = body_json(second).await["id"].clone();

    assert_eq!(id1, id2);
}

#[tokio::test]
async fn test_idempotency_key_wins_even_when_payload_differs() {
    let (_, app) = app();

    let first = app
        .clone()
        .oneshot(post_runs(r#"{"parameters":{"x":"A"}}"#, Some("K")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let id1 = body_json(first).await["id"].clone();

    let second = app
        .oneshot(post_runs(r#"{"parameters":{"x":"B"}}"#, Some("K")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let id2 = body_json(second).await["id"].clone();

    assert_eq!(id1, id2);
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let (_, app) = app();

    let response = app
        .oneshot(post_runs(r#"{"parameters": nope}"#, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_schema_violation_is_422() {
    let (_, app) = app();

    for body in [r#"{}"#, r#"{"parameters": [1, 2]}"#, r#"{"parameters": "x"}"#] {
        let response = app.clone().oneshot(post_runs(body, None)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "body: {body}"
        );
    }
}

#[tokio::test]
async fn test_get_unknown_run_is_404() {
    let (_, app) = app();

    let response = app
        .oneshot(get(&format!("/runs/{}", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_run_round_trips_the_created_run() {
    let (_, app) = app();

    let created = app
        .clone()
        .oneshot(post_runs(r#"{"parameters":{"model":"test"}}"#, None))
        .await
        .unwrap();
    let created = body_json(created).await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = app.oneshot(get(&format!("/runs/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;

    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["status"], "PENDING");
    assert_eq!(fetched["attempt_count"], 0);
}

#[tokio::test]
async fn test_result_before_ready_is_409_with_status() {
    let (_, app) = app();

    let created = app
        .clone()
        .oneshot(post_runs(r#"{"parameters":{"x":1}}"#, None))
        .await
        .unwrap();
    let id = body_json(created).await["id"].as_str().unwrap().to_string();

    let response = app.oneshot(get(&format!("/runs/{id}/result"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["status"], "PENDING");
}

#[tokio::test]
async fn test_result_after_success_returns_the_reference() {
    let (store, app) = app();

    let created = app
        .clone()
        .oneshot(post_runs(r#"{"parameters":{"x":1}}"#, None))
        .await
        .unwrap();
    let id: Uuid = body_json(created).await["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    // Drive the run to success the way a worker would.
    let now = Utc::now();
    assert!(store
        .try_acquire_lease(id, "w1", now, Duration::seconds(60))
        .await
        .unwrap());
    assert!(store
        .finalize_success(id, "w1", "file:///results/out.json", now)
        .await
        .unwrap());

    let response = app.oneshot(get(&format!("/runs/{id}/result"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["run_id"], json!(id));
    assert_eq!(body["result_reference"], "file:///results/out.json");
}

#[tokio::test]
async fn test_result_for_unknown_run_is_404() {
    let (_, app) = app();

    let response = app
        .oneshot(get(&format!("/runs/{}/result", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_healthz_ok_when_dependencies_are_reachable() {
    let (_, app) = app();

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "ok");
    assert_eq!(body["queue"], "ok");
}

#[tokio::test]
async fn test_healthz_degraded_when_a_dependency_is_down() {
    let (_, app) = app_with_probes(vec![
        Arc::new(StaticProbe {
            name: "db",
            healthy: true,
        }),
        Arc::new(StaticProbe {
            name: "queue",
            healthy: false,
        }),
    ]);

    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["db"], "ok");
    assert_eq!(body["queue"], "error");
}
