//! `/api/v1/servers` endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, TestApp, GPU_A, GPU_B};
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: registering a server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_server_starts_checking() {
    let app = TestApp::new(&[]).await;

    let response = app
        .post_json("/api/v1/servers", json!({ "name": "render box", "url": "http://gpu-a:8188/" }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let server = body_json(response).await["data"].clone();
    assert_eq!(server["display_name"], "render box");
    assert_eq!(server["url"], GPU_A);
    assert_eq!(server["liveness"], "checking");

    let listing = body_json(app.get("/api/v1/servers").await).await["data"].clone();
    assert_eq!(listing["active_id"], server["id"]);
    assert_eq!(listing["servers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn blank_name_falls_back_to_url() {
    let app = TestApp::new(&[]).await;

    let response = app.post_json("/api/v1/servers", json!({ "url": GPU_B })).await;
    let server = body_json(response).await["data"].clone();
    assert_eq!(server["display_name"], GPU_B);
}

#[tokio::test]
async fn duplicate_url_is_conflict() {
    let app = TestApp::new(&[GPU_A]).await;

    let response = app.post_json("/api/v1/servers", json!({ "url": "http://gpu-a:8188" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn malformed_url_is_rejected() {
    let app = TestApp::new(&[]).await;

    let response = app.post_json("/api/v1/servers", json!({ "url": "gpu-a:8188" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: editing and removing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn changing_url_resets_liveness() {
    let app = TestApp::new(&[GPU_A]).await;

    let response = app.put_json("/api/v1/servers/1", json!({ "url": GPU_B })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let server = body_json(response).await["data"].clone();
    assert_eq!(server["url"], GPU_B);
    assert_eq!(server["liveness"], "checking");
}

#[tokio::test]
async fn renaming_keeps_liveness() {
    let app = TestApp::new(&[GPU_A]).await;

    let server = body_json(app.put_json("/api/v1/servers/1", json!({ "name": "main" })).await).await["data"].clone();
    assert_eq!(server["display_name"], "main");
    assert_eq!(server["liveness"], "connected");
}

#[tokio::test]
async fn update_unknown_server_is_404() {
    let app = TestApp::new(&[]).await;

    let response = app.put_json("/api/v1/servers/9", json!({ "name": "x" })).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn removing_active_server_selects_next() {
    let app = TestApp::new(&[GPU_A, GPU_B]).await;

    let response = app.delete("/api/v1/servers/1").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let listing = body_json(app.get("/api/v1/servers").await).await["data"].clone();
    assert_eq!(listing["active_id"], 2);

    let response = app.delete("/api/v1/servers/1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn select_changes_active_server() {
    let app = TestApp::new(&[GPU_A, GPU_B]).await;

    let response = app.post("/api/v1/servers/2/select").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["url"], GPU_B);

    let listing = body_json(app.get("/api/v1/servers").await).await["data"].clone();
    assert_eq!(listing["active_id"], 2);

    // New uploads target the selected server.
    let job = app.create_job(&[]).await;
    assert_eq!(job["config"]["server_url"], GPU_B);
}
