//! `/api/v1/jobs` endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{body_bytes, body_json, multipart_body, TestApp, BOUNDARY, GPU_A, GPU_B};
use serde_json::json;
use vidflow_core::extraction::extract_result;
use vidflow_core::job::{JobId, JobStatus};
use vidflow_engine::store::{JobSelector, Transition};

fn job_uri(job: &serde_json::Value, suffix: &str) -> String {
    format!("/api/v1/jobs/{}{suffix}", job["id"])
}

/// Mark a job finished with a video whose file name carries a directory.
async fn complete(app: &TestApp, id: JobId) {
    let outputs = json!({
        "108": {"videos": [{"filename": "clips/out.mp4", "subfolder": "", "type": "output"}]}
    });
    let result = extract_result(&outputs, "108", GPU_A);
    let outcome = app
        .engine
        .store()
        .apply_transition(JobSelector::Id(id), Transition::to(JobStatus::Completed).with_result(result))
        .await;
    assert!(outcome.is_applied());
}

async fn fail(app: &TestApp, id: JobId) {
    let outcome = app
        .engine
        .store()
        .apply_transition(JobSelector::Id(id), Transition::to(JobStatus::Failed).with_error("out of memory"))
        .await;
    assert!(outcome.is_applied());
}

fn id_of(job: &serde_json::Value) -> JobId {
    job["id"].as_i64().unwrap()
}

// ---------------------------------------------------------------------------
// Test: upload creates an idle job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_creates_idle_job_with_defaults() {
    let app = TestApp::new(&[GPU_A]).await;

    let job = app.create_job(&[]).await;
    assert_eq!(job["status"], "idle");
    assert_eq!(job["input"], "input.png");
    assert_eq!(job["progress_percent"], 0);
    assert_eq!(job["config"]["server_url"], GPU_A);
    assert_eq!(job["config"]["fps"], 16);
    assert!(job["execution_id"].is_null());

    let stored: Vec<_> = std::fs::read_dir(app.upload_dir.path()).unwrap().collect();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn upload_applies_overrides() {
    let app = TestApp::new(&[GPU_A, GPU_B]).await;

    let job = app
        .create_job(&[
            ("server_url", "http://gpu-b:8188/"),
            ("positive_prompt", "waves crashing"),
            ("seed", "77"),
            ("fps", "24"),
            ("duration", "2"),
            ("width", "512"),
            ("height", "768"),
        ])
        .await;

    let config = &job["config"];
    assert_eq!(config["server_url"], GPU_B);
    assert_eq!(config["positive_prompt"], "waves crashing");
    assert_eq!(config["seed"], json!({ "mode": "fixed", "value": 77 }));
    assert_eq!(config["fps"], 24);
    assert_eq!(config["duration_secs"], 2);
    assert_eq!(config["resolution"], json!({ "width": 512, "height": 768 }));
}

#[tokio::test]
async fn upload_pins_seed_when_randomize_is_off() {
    let app = TestApp::new(&[GPU_A]).await;

    let job = app.create_job(&[("randomize_seed", "false")]).await;
    assert_eq!(job["config"]["seed"]["mode"], "fixed");
}

// ---------------------------------------------------------------------------
// Test: upload validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_without_file_is_400() {
    let app = TestApp::new(&[GPU_A]).await;

    let body = multipart_body(None, &[("fps", "16")]);
    let response = app
        .send(
            Request::post("/api/v1/jobs")
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn upload_rejects_unsupported_extension() {
    let app = TestApp::new(&[GPU_A]).await;

    let response = app.upload("clip.gif", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains(".gif"));
}

#[tokio::test]
async fn upload_rejects_bad_numbers() {
    let app = TestApp::new(&[GPU_A]).await;

    let response = app.upload("input.png", &[("fps", "fast")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_rejects_out_of_range_config() {
    let app = TestApp::new(&[GPU_A]).await;

    let response = app.upload("input.png", &[("fps", "240")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

    // The rejected upload leaves nothing behind.
    let stored: Vec<_> = std::fs::read_dir(app.upload_dir.path()).unwrap().collect();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn upload_without_servers_is_400() {
    let app = TestApp::new(&[]).await;

    let response = app.upload("input.png", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: reading jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_and_get_jobs() {
    let app = TestApp::new(&[GPU_A]).await;
    let first = app.create_job(&[]).await;
    let second = app.create_job(&[]).await;

    let jobs = body_json(app.get("/api/v1/jobs").await).await["data"].clone();
    let ids: Vec<_> = jobs.as_array().unwrap().iter().map(|j| j["id"].clone()).collect();
    assert_eq!(ids, vec![first["id"].clone(), second["id"].clone()]);

    let response = app.get(&job_uri(&second, "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["id"], second["id"]);

    let response = app.get("/api/v1/jobs/999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: enqueue and cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_then_cancel_returns_to_idle() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;

    let response = app.post(&job_uri(&job, "/enqueue")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "pending");

    // Only idle jobs can be queued.
    let response = app.post(&job_uri(&job, "/enqueue")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.post(&job_uri(&job, "/cancel")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "idle");
}

#[tokio::test]
async fn cancel_idle_job_is_conflict() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;

    let response = app.post(&job_uri(&job, "/cancel")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_submitted_job_fails_it_and_interrupts() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;
    app.post(&job_uri(&job, "/enqueue")).await;
    app.engine.dispatcher().tick(app.engine.context()).await;

    let current = body_json(app.get(&job_uri(&job, "")).await).await["data"].clone();
    assert_eq!(current["status"], "queued");
    assert!(current["execution_id"].is_string());

    let response = app.post(&job_uri(&job, "/cancel")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let cancelled = body_json(response).await["data"].clone();
    assert_eq!(cancelled["status"], "failed");
    assert_eq!(cancelled["error_message"], "cancelled by user");

    app.engine.cancellation().drain().await;
    assert_eq!(app.connector.remote(GPU_A).interrupts(), 1);
}

// ---------------------------------------------------------------------------
// Test: duplicate, retry, remove
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_copies_config_as_idle() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[("seed", "5")]).await;
    app.post(&job_uri(&job, "/enqueue")).await;

    let response = app.post(&job_uri(&job, "/duplicate")).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let copy = body_json(response).await["data"].clone();
    assert_ne!(copy["id"], job["id"]);
    assert_eq!(copy["status"], "idle");
    assert_eq!(copy["config"], job["config"]);
    assert_eq!(copy["input"], "input.png");
}

#[tokio::test]
async fn retry_failed_job_creates_linked_pending_job() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;
    fail(&app, id_of(&job)).await;

    let response = app.post(&job_uri(&job, "/retry")).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let retry = body_json(response).await["data"].clone();
    assert_eq!(retry["status"], "pending");
    assert_eq!(retry["retry_of"], job["id"]);
    assert!(retry["error_message"].is_null());
}

#[tokio::test]
async fn retry_requires_failed_job() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;

    let response = app.post(&job_uri(&job, "/retry")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn remove_job() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;

    let response = app.delete(&job_uri(&job, "")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get(&job_uri(&job, "")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn remove_running_job_is_conflict() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;
    app.post(&job_uri(&job, "/enqueue")).await;
    app.engine.dispatcher().tick(app.engine.context()).await;

    let response = app.delete(&job_uri(&job, "")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Test: result download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn result_requires_completed_job() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;

    let response = app.get(&job_uri(&job, "/result")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn result_streams_artifact() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;
    complete(&app, id_of(&job)).await;

    let response = app.get(&job_uri(&job, "/result")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp4");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"out.mp4\""
    );
    assert_eq!(body_bytes(response).await, b"/clips/out.mp4");
}

#[tokio::test]
async fn result_falls_back_to_alternate_locator() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;
    complete(&app, id_of(&job)).await;
    app.connector.remote(GPU_A).missing("clips/out.mp4");

    let response = app.get(&job_uri(&job, "/result")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"clips/out.mp4");
}

#[tokio::test]
async fn result_unavailable_is_502() {
    let app = TestApp::new(&[GPU_A]).await;
    let job = app.create_job(&[]).await;
    complete(&app, id_of(&job)).await;
    app.connector.remote(GPU_A).missing("clips/out.mp4");
    app.connector.remote(GPU_A).missing("out.mp4");

    let response = app.get(&job_uri(&job, "/result")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_ERROR");
}
