// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - 503 before training (GET /model, POST /analyze)
// - POST /admin/retrain, then /analyze, /analyze/batch, /debug/history
// - 422 on a rejected training set

use std::path::PathBuf;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use valuation_triage::api::{self, AppState};
use valuation_triage::{dataset, EngineConfig, EngineHandle};

const BODY_LIMIT: usize = 4 * 1024 * 1024;

fn state() -> AppState {
    AppState::new(EngineHandle::new_untrained(), EngineConfig::default())
}

fn app(state: &AppState) -> Router {
    api::router(state.clone())
}

fn training_body() -> Vec<u8> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data");
    let set = dataset::load_training_set(
        &dir.join("historical_cases.csv"),
        &dir.join("valuation_rules.csv"),
    )
    .expect("bundled data");
    serde_json::to_vec(&set).expect("serialize training set")
}

fn post_json(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("build POST")
}

async fn read_json(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn record(id: &str, custodian: f64, internal: f64) -> Json {
    json!({
        "id": id,
        "date": "2024-10-02",
        "fund_code": "HKGBF",
        "asset_class": "Bond",
        "custodian_value": custodian,
        "internal_value": internal,
        "status": "open"
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let state = state();
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app(&state).oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap().trim(), "ok");
}

#[tokio::test]
async fn untrained_engine_answers_503() {
    let state = state();

    let req = Request::builder()
        .uri("/model")
        .body(Body::empty())
        .unwrap();
    let resp = app(&state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let v = read_json(resp).await;
    assert_eq!(v["error"], json!("model_not_trained"));

    let body = serde_json::to_vec(&record("VD1", 1000.0, 1001.0)).unwrap();
    let resp = app(&state).oneshot(post_json("/analyze", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn retrain_then_analyze_round_trip() {
    let state = state();

    let resp = app(&state)
        .oneshot(post_json("/admin/retrain", training_body()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let info = read_json(resp).await;
    assert_eq!(info["cases"], json!(40));
    assert_eq!(info["rules"], json!(5));
    assert_eq!(info["labels"].as_array().map(|a| a.len()), Some(5));

    // single record
    let body = serde_json::to_vec(&record("VD1", 1_000_000.0, 1_001_200.0)).unwrap();
    let resp = app(&state).oneshot(post_json("/analyze", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = read_json(resp).await;
    assert_eq!(v["record_id"], json!("VD1"));
    for key in [
        "is_anomaly",
        "anomaly_score",
        "predicted_type",
        "confidence",
        "top_similar_cases",
        "recommended_resolution",
        "estimated_resolution_time",
        "urgency",
    ] {
        assert!(v.get(key).is_some(), "missing key {key}");
    }
    let urgency = v["urgency"].as_str().unwrap();
    assert!(["low", "medium", "high", "critical"].contains(&urgency));

    // batch
    let body = serde_json::to_vec(&json!([
        record("VD2", 10_000.0, 15_000.0),
        record("VD3", 500_000.0, 500_150.0)
    ]))
    .unwrap();
    let resp = app(&state)
        .oneshot(post_json("/analyze/batch", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = read_json(resp).await;
    assert_eq!(v["results"][0]["record_id"], json!("VD2"));
    assert_eq!(v["results"][1]["record_id"], json!("VD3"));
    assert_eq!(v["summary"]["count"], json!(2));

    // history shows the three analyses
    let req = Request::builder()
        .uri("/debug/history")
        .body(Body::empty())
        .unwrap();
    let resp = app(&state).oneshot(req).await.unwrap();
    let v = read_json(resp).await;
    assert_eq!(v.as_array().map(|a| a.len()), Some(3));
    assert_eq!(v[2]["record_id"], json!("VD3"));
}

#[tokio::test]
async fn empty_training_set_is_unprocessable() {
    let state = state();
    let body = serde_json::to_vec(&json!({ "cases": [], "rules": [] })).unwrap();
    let resp = app(&state)
        .oneshot(post_json("/admin/retrain", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let v = read_json(resp).await;
    assert_eq!(v["error"], json!("data_error"));
}
