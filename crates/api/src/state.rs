use std::sync::Arc;

use tokio::sync::RwLock;
use vidflow_core::job::GenerationDefaults;
use vidflow_engine::orchestrator::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone; everything lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job orchestration engine (store, registry, background loops).
    pub engine: Arc<Orchestrator>,
    /// Global generation defaults new jobs are seeded from.
    pub defaults: Arc<RwLock<GenerationDefaults>>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(engine: Arc<Orchestrator>, config: ServerConfig) -> Self {
        Self {
            engine,
            defaults: Arc::new(RwLock::new(GenerationDefaults::default())),
            config: Arc::new(config),
        }
    }
}
