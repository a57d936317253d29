use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vidflow_api::background;
use vidflow_api::config::ServerConfig;
use vidflow_api::router::build_app_router;
use vidflow_api::state::AppState;
use vidflow_comfyui::api::ComfyUIConnector;
use vidflow_comfyui::client::new_client_id;
use vidflow_comfyui::manager::ComfyUIManager;
use vidflow_engine::compiler::TemplateCompiler;
use vidflow_engine::config::EngineConfig;
use vidflow_engine::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vidflow_api=debug,vidflow_engine=debug,vidflow_comfyui=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let engine_config = EngineConfig::from_env().expect("Invalid engine configuration");
    tracing::info!(
        host = %config.host,
        port = config.port,
        upload_dir = %config.upload_dir.display(),
        servers = engine_config.servers.len(),
        "Loaded configuration",
    );

    // --- Workflow template ---
    let compiler = TemplateCompiler::load(engine_config.workflow_template.as_deref())
        .expect("Failed to load workflow template");
    match &engine_config.workflow_template {
        Some(path) => tracing::info!(path = %path.display(), "Workflow template loaded"),
        None => tracing::info!("Using built-in workflow template"),
    }

    // --- ComfyUI ---
    // Submissions and the push stream must share one client id.
    let client_id = new_client_id();
    let connector = ComfyUIConnector::new(engine_config.remote_timeout, client_id.clone())
        .expect("Failed to build HTTP client");
    let push_manager = ComfyUIManager::new(client_id);

    // --- Engine ---
    let engine = Arc::new(Orchestrator::new(
        engine_config,
        Arc::new(connector),
        Arc::new(compiler),
    ));
    engine.register_configured_servers().await;
    engine.registry().probe_all().await;
    engine.start(Some(push_manager));

    // --- Background tasks ---
    let background_cancel = CancellationToken::new();
    let retention = tokio::spawn(background::upload_retention::run(
        Arc::clone(&engine),
        config.upload_dir.clone(),
        config.upload_retention_days,
        background_cancel.clone(),
    ));

    // --- App state + router ---
    let state = AppState::new(Arc::clone(&engine), config.clone());
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping engine");
    background_cancel.cancel();
    let _ = retention.await;
    engine.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
