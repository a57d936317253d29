//! Background job dispatcher.
//!
//! Each tick claims at most one PENDING job for an idle, reachable server
//! and walks it through upload and submission:
//!
//! ```text
//! PENDING -> UPLOADING -> (upload) -> QUEUED -> (compile, submit) -> execution id recorded
//! ```
//!
//! Only one claim runs at a time across all servers (the
//! [`DispatchContext`] claim flag). Every step after the claim uses a
//! guarded transition, so a cancellation that lands mid-claim turns the
//! remaining steps into no-ops instead of being overwritten.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidflow_core::job::{Job, JobId, JobStatus};
use vidflow_core::remote::{RemoteEndpoint, RemoteError};

use crate::bounded;
use crate::compiler::{CompileError, WorkflowCompiler};
use crate::context::DispatchContext;
use crate::registry::ServerRegistry;
use crate::store::{JobSelector, JobStore, Transition};

/// Why a claimed job failed before its execution id was recorded.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot read input image: {0}")]
    Input(#[from] std::io::Error),

    #[error("upload failed: {0}")]
    Upload(RemoteError),

    #[error("workflow compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("submission failed: {0}")]
    Submit(RemoteError),
}

/// What a single [`Dispatcher::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing claimable.
    Idle,
    /// Another claim holds the dispatch flag.
    ClaimInFlight,
    /// The job was accepted by its server.
    Submitted { job_id: JobId, execution_id: String },
    /// The claim failed and the job is now FAILED.
    Failed { job_id: JobId, reason: String },
    /// The job was cancelled while the claim was running.
    Cancelled { job_id: JobId },
}

impl TickOutcome {
    /// Whether the tick consumed a PENDING job, so another tick may find
    /// more work.
    pub fn made_progress(&self) -> bool {
        !matches!(self, TickOutcome::Idle | TickOutcome::ClaimInFlight)
    }
}

/// Matches PENDING jobs with idle servers.
pub struct Dispatcher {
    store: Arc<JobStore>,
    registry: Arc<ServerRegistry>,
    compiler: Arc<dyn WorkflowCompiler>,
    remote_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<ServerRegistry>,
        compiler: Arc<dyn WorkflowCompiler>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            compiler,
            remote_timeout,
        }
    }

    /// Run one dispatch cycle.
    ///
    /// Also clears the batch flag once no job is outstanding.
    pub async fn tick(&self, ctx: &DispatchContext) -> TickOutcome {
        if ctx.batch_running() && !self.store.has_active_work().await {
            ctx.set_batch_running(false);
            tracing::info!("Batch finished, no outstanding jobs");
        }

        let Some(_claim) = ctx.try_claim() else {
            return TickOutcome::ClaimInFlight;
        };

        let connected = self.registry.connected_urls().await;
        if connected.is_empty() {
            return TickOutcome::Idle;
        }
        let Some(job) = self.store.next_claimable(&connected).await else {
            return TickOutcome::Idle;
        };

        let seed = job.config.seed.resolve();
        let claimed = self
            .store
            .apply_transition(
                JobSelector::Id(job.id),
                Transition::to(JobStatus::Uploading)
                    .only_from(&[JobStatus::Pending])
                    .with_seed(seed),
            )
            .await;
        if !claimed.is_applied() {
            return TickOutcome::Cancelled { job_id: job.id };
        }

        tracing::info!(
            job_id = job.id,
            server_url = %job.config.server_url,
            input = %job.input.original_name(),
            seed,
            "Job claimed",
        );

        let remote = self.registry.remote(&job.config.server_url).await;
        match self.submit(&job, seed, remote.as_ref()).await {
            Ok(Some(execution_id)) => self.record_submission(&job, remote.as_ref(), execution_id).await,
            Ok(None) => TickOutcome::Cancelled { job_id: job.id },
            Err(e) => self.fail(&job, e).await,
        }
    }

    /// Tick on every interval or store change until cancelled, draining
    /// all claimable work each time.
    pub async fn run(&self, ctx: Arc<DispatchContext>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Job dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.store.changed() => {}
            }

            while self.tick(&ctx).await.made_progress() {
                if cancel.is_cancelled() {
                    break;
                }
            }
        }
    }

    // ---- private helpers ----

    /// Upload and submit. `Ok(None)` when the job was cancelled between
    /// the upload and the submit.
    async fn submit(&self, job: &Job, seed: u64, remote: &dyn RemoteEndpoint) -> Result<Option<String>, DispatchError> {
        let bytes = tokio::fs::read(job.input.path()).await?;
        let stored_name = bounded(self.remote_timeout, remote.upload(bytes, job.input.original_name()))
            .await
            .map_err(DispatchError::Upload)?;

        let queued = self
            .store
            .apply_transition(
                JobSelector::Id(job.id),
                Transition::to(JobStatus::Queued).only_from(&[JobStatus::Uploading]),
            )
            .await;
        if !queued.is_applied() {
            tracing::info!(job_id = job.id, "Job cancelled during upload, not submitting");
            return Ok(None);
        }

        let graph = self.compiler.compile(&stored_name, &job.config, seed)?;
        let execution_id = bounded(self.remote_timeout, remote.submit(&graph))
            .await
            .map_err(DispatchError::Submit)?;
        Ok(Some(execution_id))
    }

    async fn record_submission(&self, job: &Job, remote: &dyn RemoteEndpoint, execution_id: String) -> TickOutcome {
        let Some(updated) = self.store.attach_execution_id(job.id, &execution_id).await else {
            tracing::warn!(job_id = job.id, execution_id = %execution_id, "Job removed before submission was recorded");
            return TickOutcome::Cancelled { job_id: job.id };
        };

        if updated.status == JobStatus::Failed {
            // Cancelled while the submit was in flight: drop the queued prompt.
            tracing::info!(job_id = job.id, execution_id = %execution_id, "Job cancelled during submit, removing queued prompt");
            if let Err(e) = bounded(self.remote_timeout, remote.cancel_queued(&execution_id)).await {
                tracing::warn!(job_id = job.id, execution_id = %execution_id, error = %e, "Failed to remove queued prompt");
            }
            return TickOutcome::Cancelled { job_id: job.id };
        }

        tracing::info!(job_id = job.id, execution_id = %execution_id, "Workflow submitted");
        TickOutcome::Submitted {
            job_id: job.id,
            execution_id,
        }
    }

    async fn fail(&self, job: &Job, error: DispatchError) -> TickOutcome {
        let reason = error.to_string();
        tracing::error!(
            job_id = job.id,
            server_url = %job.config.server_url,
            error = %reason,
            "Dispatch failed",
        );

        let failed = self
            .store
            .apply_transition(
                JobSelector::Id(job.id),
                Transition::to(JobStatus::Failed)
                    .only_from(&[JobStatus::Uploading, JobStatus::Queued])
                    .with_error(reason.clone()),
            )
            .await;

        if failed.is_applied() {
            TickOutcome::Failed { job_id: job.id, reason }
        } else {
            TickOutcome::Cancelled { job_id: job.id }
        }
    }
}
