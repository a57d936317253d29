//! Shared helpers for API integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use vidflow_api::config::ServerConfig;
use vidflow_api::router::build_app_router;
use vidflow_api::state::AppState;
use vidflow_core::extraction::ResultLocator;
use vidflow_core::remote::{HistoryRecord, RemoteConnector, RemoteEndpoint, RemoteError};
use vidflow_engine::compiler::TemplateCompiler;
use vidflow_engine::config::EngineConfig;
use vidflow_engine::orchestrator::Orchestrator;

pub const GPU_A: &str = "http://gpu-a:8188";
pub const GPU_B: &str = "http://gpu-b:8188";

pub const BOUNDARY: &str = "vidflow-test-boundary";

// ---------------------------------------------------------------------------
// Stub ComfyUI server
// ---------------------------------------------------------------------------

/// Always-reachable server that accepts everything. Artifacts whose file
/// name is listed in `missing` fail to download.
#[derive(Default)]
pub struct StubRemote {
    url: String,
    next_execution: AtomicU64,
    interrupts: AtomicU64,
    missing: Mutex<HashSet<String>>,
}

impl StubRemote {
    pub fn missing(&self, filename: &str) {
        self.missing.lock().unwrap().insert(filename.to_string());
    }

    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteEndpoint for StubRemote {
    fn base_url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn upload(&self, _bytes: Vec<u8>, name: &str) -> Result<String, RemoteError> {
        Ok(name.to_string())
    }

    async fn submit(&self, _graph: &serde_json::Value) -> Result<String, RemoteError> {
        let n = self.next_execution.fetch_add(1, Ordering::SeqCst);
        Ok(format!("prompt-{n}"))
    }

    async fn interrupt(&self) -> Result<(), RemoteError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_queued(&self, _execution_id: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn lookup_result(&self, _execution_id: &str) -> Result<Option<HistoryRecord>, RemoteError> {
        Ok(None)
    }

    async fn fetch_artifact(&self, locator: &ResultLocator) -> Result<Vec<u8>, RemoteError> {
        if self.missing.lock().unwrap().contains(&locator.filename) {
            return Err(RemoteError::Rejected {
                status: 404,
                body: "file not found".into(),
            });
        }
        Ok(format!("{}/{}", locator.subfolder, locator.filename).into_bytes())
    }
}

#[derive(Default)]
pub struct StubConnector {
    remotes: Mutex<HashMap<String, Arc<StubRemote>>>,
}

impl StubConnector {
    pub fn remote(&self, url: &str) -> Arc<StubRemote> {
        let mut remotes = self.remotes.lock().unwrap();
        Arc::clone(remotes.entry(url.to_string()).or_insert_with(|| {
            Arc::new(StubRemote {
                url: url.to_string(),
                ..StubRemote::default()
            })
        }))
    }
}

impl RemoteConnector for StubConnector {
    fn connect(&self, url: &str) -> Arc<dyn RemoteEndpoint> {
        self.remote(url)
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub engine: Arc<Orchestrator>,
    pub connector: Arc<StubConnector>,
    pub upload_dir: TempDir,
}

/// Build a test `ServerConfig` writing uploads into `upload_dir`.
pub fn test_config(upload_dir: &TempDir) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        upload_dir: upload_dir.path().to_path_buf(),
        upload_retention_days: 7,
    }
}

impl TestApp {
    /// App with `urls` registered and probed; background loops are not
    /// started so tests control every step.
    pub async fn new(urls: &[&str]) -> Self {
        let connector = Arc::new(StubConnector::default());
        let engine_config = EngineConfig {
            servers: Vec::new(),
            remote_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let compiler = Arc::new(TemplateCompiler::builtin().expect("built-in template"));
        let engine = Arc::new(Orchestrator::new(engine_config, connector.clone(), compiler));
        for (idx, url) in urls.iter().enumerate() {
            engine
                .registry()
                .add(&format!("gpu-{idx}"), url)
                .await
                .expect("register server");
        }
        engine.registry().probe_all().await;

        let upload_dir = tempfile::tempdir().expect("temp dir");
        let config = test_config(&upload_dir);
        let state = AppState::new(Arc::clone(&engine), config.clone());
        let router = build_app_router(state, &config);

        Self {
            router,
            engine,
            connector,
            upload_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str) -> Response<Body> {
        self.send(Request::post(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send_json(Method::POST, uri, body).await
    }

    pub async fn put_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send_json(Method::PUT, uri, body).await
    }

    async fn send_json(&self, method: Method, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Upload `filename` with the given extra form fields.
    pub async fn upload(&self, filename: &str, fields: &[(&str, &str)]) -> Response<Body> {
        let body = multipart_body(Some((filename, b"\x89PNG fake image bytes")), fields);
        self.send(
            Request::post("/api/v1/jobs")
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Upload a PNG and return the created job JSON.
    pub async fn create_job(&self, fields: &[(&str, &str)]) -> serde_json::Value {
        let response = self.upload("input.png", fields).await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        body_json(response).await["data"].clone()
    }
}

/// Build a `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}
