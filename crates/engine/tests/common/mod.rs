//! Shared helpers for engine integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vidflow_core::extraction::ResultLocator;
use vidflow_core::job::{GenerationDefaults, InputRef, Job, JobId};
use vidflow_core::remote::{HistoryRecord, RemoteConnector, RemoteEndpoint, RemoteError};
use vidflow_engine::compiler::TemplateCompiler;
use vidflow_engine::config::EngineConfig;
use vidflow_engine::orchestrator::Orchestrator;

pub const GPU_A: &str = "http://gpu-a:8188";
pub const GPU_B: &str = "http://gpu-b:8188";

/// Remote timeout used by the harness; mocks that sleep longer than this
/// simulate a hung server.
pub const REMOTE_TIMEOUT: Duration = Duration::from_millis(300);

static NEXT_EXECUTION: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Mock remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe,
    Upload { name: String, bytes: usize },
    Submit { graph: serde_json::Value },
    Interrupt,
    CancelQueued(String),
    Lookup(String),
    Fetch(String),
}

/// In-process stand-in for a ComfyUI server that records every call.
pub struct MockRemote {
    url: String,
    calls: Mutex<Vec<Call>>,
    reachable: AtomicBool,
    probe_delay: Mutex<Duration>,
    upload_error: Mutex<Option<RemoteError>>,
    submit_error: Mutex<Option<RemoteError>>,
    upload_delay: Mutex<Duration>,
    submit_delay: Mutex<Duration>,
    lookup_error: Mutex<Option<RemoteError>>,
    history: Mutex<HashMap<String, HistoryRecord>>,
}

impl MockRemote {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            calls: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            probe_delay: Mutex::new(Duration::ZERO),
            upload_error: Mutex::new(None),
            submit_error: Mutex::new(None),
            upload_delay: Mutex::new(Duration::ZERO),
            submit_delay: Mutex::new(Duration::ZERO),
            lookup_error: Mutex::new(None),
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, error: RemoteError) {
        *self.upload_error.lock().unwrap() = Some(error);
    }

    pub fn fail_submits(&self, error: RemoteError) {
        *self.submit_error.lock().unwrap() = Some(error);
    }

    pub fn fail_lookups(&self, error: Option<RemoteError>) {
        *self.lookup_error.lock().unwrap() = error;
    }

    /// Make probes hang for `delay` before answering.
    pub fn delay_probes(&self, delay: Duration) {
        *self.probe_delay.lock().unwrap() = delay;
    }

    pub fn delay_uploads(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    pub fn delay_submits(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    /// Make `/history` report a finished execution.
    pub fn finish(&self, execution_id: &str, outputs: serde_json::Value) {
        self.history.lock().unwrap().insert(
            execution_id.to_string(),
            HistoryRecord { outputs, error: None },
        );
    }

    /// Make `/history` report a failed execution.
    pub fn fail_execution(&self, execution_id: &str, reason: &str) {
        self.history.lock().unwrap().insert(
            execution_id.to_string(),
            HistoryRecord {
                outputs: serde_json::json!({}),
                error: Some(reason.to_string()),
            },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn interrupts(&self) -> usize {
        self.count(|c| *c == Call::Interrupt)
    }

    pub fn submits(&self) -> usize {
        self.count(|c| matches!(c, Call::Submit { .. }))
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteEndpoint for MockRemote {
    fn base_url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        self.record(Call::Probe);
        let delay = *self.probe_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Transport("connection refused".into()))
        }
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String, RemoteError> {
        self.record(Call::Upload {
            name: name.to_string(),
            bytes: bytes.len(),
        });
        let delay = *self.upload_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if let Some(error) = self.upload_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(format!("stored_{name}"))
    }

    async fn submit(&self, graph: &serde_json::Value) -> Result<String, RemoteError> {
        self.record(Call::Submit { graph: graph.clone() });
        let delay = *self.submit_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if let Some(error) = self.submit_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(format!("exec-{}", NEXT_EXECUTION.fetch_add(1, Ordering::SeqCst)))
    }

    async fn interrupt(&self) -> Result<(), RemoteError> {
        self.record(Call::Interrupt);
        Ok(())
    }

    async fn cancel_queued(&self, execution_id: &str) -> Result<(), RemoteError> {
        self.record(Call::CancelQueued(execution_id.to_string()));
        Ok(())
    }

    async fn lookup_result(&self, execution_id: &str) -> Result<Option<HistoryRecord>, RemoteError> {
        self.record(Call::Lookup(execution_id.to_string()));
        if let Some(error) = self.lookup_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.history.lock().unwrap().get(execution_id).cloned())
    }

    async fn fetch_artifact(&self, locator: &ResultLocator) -> Result<Vec<u8>, RemoteError> {
        self.record(Call::Fetch(locator.filename.clone()));
        Ok(locator.filename.as_bytes().to_vec())
    }
}

/// Hands out one shared [`MockRemote`] per URL.
#[derive(Default)]
pub struct MockConnector {
    remotes: Mutex<HashMap<String, Arc<MockRemote>>>,
}

impl MockConnector {
    pub fn remote(&self, url: &str) -> Arc<MockRemote> {
        let mut remotes = self.remotes.lock().unwrap();
        Arc::clone(
            remotes
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(MockRemote::new(url))),
        )
    }
}

impl RemoteConnector for MockConnector {
    fn connect(&self, url: &str) -> Arc<dyn RemoteEndpoint> {
        self.remote(url)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Orchestrator,
    pub connector: Arc<MockConnector>,
    dir: TempDir,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        servers: Vec::new(),
        probe_interval: Duration::from_millis(50),
        poll_interval: Duration::from_millis(50),
        dispatch_interval: Duration::from_millis(20),
        remote_timeout: REMOTE_TIMEOUT,
        ..EngineConfig::default()
    }
}

impl Harness {
    /// Engine with `urls` registered and probed reachable.
    pub async fn new(urls: &[&str]) -> Self {
        Self::with_config(urls, test_config()).await
    }

    pub async fn with_config(urls: &[&str], config: EngineConfig) -> Self {
        let connector = Arc::new(MockConnector::default());
        let compiler = Arc::new(TemplateCompiler::builtin().expect("built-in template"));
        let engine = Orchestrator::new(config, connector.clone(), compiler);

        for (idx, url) in urls.iter().enumerate() {
            engine
                .registry()
                .add(&format!("gpu-{idx}"), url)
                .await
                .expect("register server");
        }
        engine.registry().probe_all().await;

        Self {
            engine,
            connector,
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn remote(&self, url: &str) -> Arc<MockRemote> {
        self.connector.remote(url)
    }

    /// Write a small input file and return a reference to it.
    pub fn input(&self, name: &str) -> InputRef {
        let path: PathBuf = self.dir.path().join(name);
        std::fs::write(&path, b"\x89PNG fake image bytes").expect("write input");
        InputRef::new(path, name)
    }

    pub async fn create_job(&self, url: &str) -> Job {
        let id = self.engine.store().list().await.len();
        let input = self.input(&format!("input_{id}.png"));
        self.engine
            .create_job(input, GenerationDefaults::default().snapshot(url))
            .await
            .expect("create job")
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.engine.store().get(id).await.expect("job exists")
    }

    /// Tick the dispatcher until it has nothing left to claim.
    pub async fn dispatch_all(&self) {
        let ctx = self.engine.context();
        while self.engine.dispatcher().tick(ctx).await.made_progress() {}
    }
}

/// Outputs record with a video on the save node.
pub fn video_outputs(filename: &str) -> serde_json::Value {
    serde_json::json!({
        "108": {"videos": [{"filename": filename, "subfolder": "", "type": "output"}]}
    })
}

/// Poll `check` every 10ms until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
