use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use renec_core::{AttrValue, Config, Entity, EntityKind};
use renec_queue::{JobQueue, MemoryJobQueue, RetryPolicy};
use renec_reconcile::{EntityStore, MemoryStore};
use renec_scheduler::slots::parse_timezone;
use renec_scheduler::{default_rules, MemoryScheduleState, Scheduler, SchedulerSettings};

use crate::router::{build_router, cors_layer};
use crate::state::AppState;

struct Harness {
    app: axum::Router,
    queue: Arc<MemoryJobQueue>,
    store: Arc<MemoryStore>,
}

fn harness() -> Harness {
    let queue = Arc::new(MemoryJobQueue::new(RetryPolicy::default()));
    let store = Arc::new(MemoryStore::new());
    let settings = SchedulerSettings::new(parse_timezone("-06:00").unwrap());
    let scheduler = Scheduler::new(
        default_rules(),
        settings,
        queue.clone(),
        Arc::new(MemoryScheduleState::default()),
    )
    .unwrap();
    let state = Arc::new(AppState {
        queue: queue.clone(),
        store: store.clone(),
        scheduler: Arc::new(scheduler),
        backend: "memory",
        started_at: Utc::now(),
        config: Config::for_profile("").redacted_summary(),
    });
    Harness {
        app: build_router(state, cors_layer("*").unwrap()),
        queue,
        store,
    }
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed_standard(store: &MemoryStore, key: &str) {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
    let mut entity = Entity {
        kind: EntityKind::Standard,
        key: key.to_string(),
        attributes: Default::default(),
        vigente: true,
        stale: false,
        first_seen: at,
        last_seen: at,
    };
    entity
        .attributes
        .insert("titulo".into(), AttrValue::Text("Impartición de cursos".into()));
    store.upsert(entity).await.unwrap();
    store.upsert_edge(key, "CERT-001", true, at).await.unwrap();
}

#[tokio::test]
async fn health_reports_backend_and_lanes() {
    let h = harness();
    seed_standard(&h.store, "EC0217").await;

    let (status, body) = call(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["lanes"]["harvest"]["pending"], 0);
    assert_eq!(body["entities"]["standard"], 1);
    assert_eq!(body["config"]["profile"], "default");
    assert!(body["config"]["extractor"]["kind"].is_string());
    assert!(body["config"]["postgres"].get("password").is_none());
}

#[tokio::test]
async fn health_degrades_when_store_is_down() {
    let h = harness();
    h.store.set_available(false);

    let (status, body) = call(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["store_reachable"], false);
}

#[tokio::test]
async fn harvest_request_is_accepted_and_listed() {
    let h = harness();
    let (status, body) = call(
        &h.app,
        "POST",
        "/harvests",
        Some(json!({ "mode": "full", "kinds": ["standard"], "keys": ["EC0217"], "requested_by": "ops" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["mode"], "full");
    assert_eq!(body["lane"], "harvest");
    assert_eq!(body["scope"], "standard[1 keys]");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, job) = call(&h.app, "GET", &format!("/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["origin"]["type"], "on_demand");

    let (_, list) = call(&h.app, "GET", "/jobs?lane=harvest&status=pending", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    let (_, none) = call(&h.app, "GET", "/jobs?lane=monitoring", None).await;
    assert!(none.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn harvest_request_rejects_unknown_mode_and_kind() {
    let h = harness();
    let (status, body) = call(&h.app, "POST", "/harvests", Some(json!({ "mode": "deep" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("deep"));

    let (status, _) = call(
        &h.app,
        "POST",
        "/harvests",
        Some(json!({ "mode": "probe", "kinds": ["school"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_a_pending_job_is_immediate_and_idempotent() {
    let h = harness();
    let (_, body) = call(&h.app, "POST", "/harvests", Some(json!({ "mode": "probe" }))).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, body) = call(&h.app, "POST", &format!("/jobs/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, again) = call(&h.app, "POST", &format!("/jobs/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "cancelled");
    assert_eq!(h.queue.depth(renec_queue::Lane::Harvest).await.unwrap().pending, 0);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness();
    let id = uuid::Uuid::new_v4();
    let (status, _) = call(&h.app, "GET", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, "POST", &format!("/jobs/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schedule_lists_default_triggers() {
    let h = harness();
    let (status, body) = call(&h.app, "GET", "/schedule", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"weekly-full"));
    assert!(body[0]["next_fire"].is_string());

    let (status, drift) = call(&h.app, "GET", "/schedule/drift", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(drift.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn entity_and_edges_lookup() {
    let h = harness();
    seed_standard(&h.store, "EC0217").await;

    let (status, body) = call(&h.app, "GET", "/entities/standard/EC0217", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "EC0217");
    assert_eq!(body["vigente"], true);

    let (status, body) = call(&h.app, "GET", "/entities/standard/EC0217/edges", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], 1);
    assert_eq!(body["edges"][0]["certifier_key"], "CERT-001");

    let (status, _) = call(&h.app, "GET", "/entities/standard/EC9999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&h.app, "GET", "/entities/school/X", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
