//! Engine facade.
//!
//! [`Orchestrator`] owns the store, registry and dispatch context, exposes
//! the operator-facing operations, and runs the background loops
//! (dispatcher, liveness probe, result poller and, when a
//! [`ComfyUIManager`] is supplied, the push stream) on one
//! [`TaskTracker`].

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use validator::Validate;
use vidflow_comfyui::manager::ComfyUIManager;
use vidflow_core::error::CoreError;
use vidflow_core::job::{ConfigSnapshot, InputRef, Job, JobId, JobStatus};
use vidflow_core::remote::RemoteConnector;

use crate::cancellation::{BatchStopReport, CancellationController};
use crate::compiler::WorkflowCompiler;
use crate::config::EngineConfig;
use crate::context::DispatchContext;
use crate::dispatcher::Dispatcher;
use crate::push::{run_push_consumer, run_push_supervisor};
use crate::reconciler::Reconciler;
use crate::registry::ServerRegistry;
use crate::store::{JobSelector, JobStore, StatusCounts, Transition, TransitionOutcome};

/// Batch flag plus per-status counts.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub running: bool,
    pub counts: StatusCounts,
}

/// Outcome of starting a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStart {
    /// IDLE jobs moved to PENDING.
    pub promoted: Vec<JobId>,
    pub status: BatchStatus,
}

pub struct Orchestrator {
    config: EngineConfig,
    store: Arc<JobStore>,
    registry: Arc<ServerRegistry>,
    ctx: Arc<DispatchContext>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    cancellation: Arc<CancellationController>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn RemoteConnector>,
        compiler: Arc<dyn WorkflowCompiler>,
    ) -> Self {
        let store = Arc::new(JobStore::new());
        // A probe never outlives its interval.
        let probe_timeout = config.remote_timeout.min(config.probe_interval);
        let registry = Arc::new(ServerRegistry::new(connector, probe_timeout));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            compiler,
            config.remote_timeout,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.save_node_id.clone(),
            config.remote_timeout,
        ));
        let cancellation = Arc::new(CancellationController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.remote_timeout,
        ));

        Self {
            config,
            store,
            registry,
            ctx: Arc::new(DispatchContext::new()),
            dispatcher,
            reconciler,
            cancellation,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn cancellation(&self) -> &Arc<CancellationController> {
        &self.cancellation
    }

    /// Register the servers listed in the configuration. Invalid or
    /// duplicate entries are logged and skipped.
    pub async fn register_configured_servers(&self) {
        for seed in &self.config.servers {
            if let Err(e) = self.registry.add(&seed.name, &seed.url).await {
                tracing::warn!(name = %seed.name, url = %seed.url, error = %e, "Skipping configured server");
            }
        }
    }

    /// Spawn the background loops. Pass the push manager to also follow
    /// each server's WebSocket stream; polling runs either way.
    pub fn start(&self, push: Option<Arc<ComfyUIManager>>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let ctx = Arc::clone(&self.ctx);
        let interval = self.config.dispatch_interval;
        let cancel = self.shutdown.clone();
        self.tasks.spawn(async move { dispatcher.run(ctx, interval, cancel).await });

        let registry = Arc::clone(&self.registry);
        let interval = self.config.probe_interval;
        let cancel = self.shutdown.clone();
        self.tasks.spawn(async move { registry.run_probe_loop(interval, cancel).await });

        let reconciler = Arc::clone(&self.reconciler);
        let interval = self.config.poll_interval;
        let cancel = self.shutdown.clone();
        self.tasks.spawn(async move { reconciler.run_poll_loop(interval, cancel).await });

        if let Some(manager) = push {
            let events = manager.subscribe();
            self.tasks.spawn(run_push_consumer(
                Arc::clone(&self.reconciler),
                events,
                self.shutdown.clone(),
            ));
            self.tasks.spawn(run_push_supervisor(
                manager,
                Arc::clone(&self.registry),
                self.config.probe_interval,
                self.shutdown.clone(),
            ));
        }

        tracing::info!("Orchestrator started");
    }

    /// Stop the background loops and wait for them and for pending
    /// interrupt requests.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.cancellation.drain().await;
        tracing::info!("Orchestrator stopped");
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Create a job. It starts PENDING while a batch is running, IDLE
    /// otherwise.
    pub async fn create_job(&self, input: InputRef, config: ConfigSnapshot) -> Result<Job, CoreError> {
        config.validate()?;
        let status = if self.ctx.batch_running() {
            JobStatus::Pending
        } else {
            JobStatus::Idle
        };
        let job = self.store.insert(input, config, status).await;
        tracing::info!(
            job_id = job.id,
            status = %job.status,
            server_url = %job.config.server_url,
            input = %job.input.original_name(),
            "Job created",
        );
        Ok(job)
    }

    /// Queue a single IDLE job for dispatch.
    pub async fn enqueue(&self, id: JobId) -> Result<Job, CoreError> {
        let outcome = self
            .store
            .apply_transition(
                JobSelector::Id(id),
                Transition::to(JobStatus::Pending).only_from(&[JobStatus::Idle]),
            )
            .await;
        match outcome {
            TransitionOutcome::Applied(job) => Ok(job),
            TransitionOutcome::Rejected { current } => Err(CoreError::Conflict(format!(
                "job {id} is {current}; only idle jobs can be queued"
            ))),
            TransitionOutcome::NotFound => Err(CoreError::NotFound { entity: "job", id }),
        }
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<Job, CoreError> {
        self.cancellation.cancel_job(id).await
    }

    pub async fn duplicate_job(&self, id: JobId) -> Result<Job, CoreError> {
        self.store.duplicate(id).await
    }

    pub async fn retry_job(&self, id: JobId) -> Result<Job, CoreError> {
        let job = self.store.retry_failed(id).await?;
        tracing::info!(job_id = job.id, retry_of = id, "Retry queued");
        Ok(job)
    }

    pub async fn remove_job(&self, id: JobId) -> Result<Job, CoreError> {
        self.store.remove(id).await
    }

    // -----------------------------------------------------------------------
    // Batch
    // -----------------------------------------------------------------------

    /// Queue every IDLE job and set the batch flag.
    ///
    /// Jobs are promoted before the flag goes up so a concurrent tick never
    /// sees a running batch with nothing outstanding and clears it.
    pub async fn start_batch(&self) -> BatchStart {
        let mut promoted = self.store.promote_idle().await;
        self.ctx.set_batch_running(true);
        // Uploads that landed between the two steps were created IDLE.
        promoted.extend(self.store.promote_idle().await);
        tracing::info!(promoted = promoted.len(), "Batch started");
        BatchStart {
            promoted,
            status: self.batch_status().await,
        }
    }

    pub async fn stop_batch(&self) -> BatchStopReport {
        self.cancellation.stop_batch(&self.ctx).await
    }

    pub async fn batch_status(&self) -> BatchStatus {
        BatchStatus {
            running: self.ctx.batch_running(),
            counts: self.store.count_by_status().await,
        }
    }
}
