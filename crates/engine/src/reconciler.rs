//! Event reconciler: folds remote observations into job state.
//!
//! Two independent producers feed it. Push events arrive from the
//! per-server WebSocket streams; the poll loop asks each server's history
//! for every active job that has an execution id. Both end in the same
//! guarded transitions, so whichever channel reports a result first wins
//! and the other becomes a no-op. A job the operator already failed stays
//! failed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use vidflow_core::extraction::{extract_result, progress_percent, ResultSource};
use vidflow_core::job::{Job, JobStatus};
use vidflow_core::remote::{HistoryRecord, PushEvent};

use crate::bounded;
use crate::registry::ServerRegistry;
use crate::store::{JobSelector, JobStore, Transition, TransitionOutcome};

pub struct Reconciler {
    store: Arc<JobStore>,
    registry: Arc<ServerRegistry>,
    save_node_id: String,
    remote_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<ServerRegistry>,
        save_node_id: impl Into<String>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            save_node_id: save_node_id.into(),
            remote_timeout,
        }
    }

    /// Apply one push event.
    pub async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::Started { execution_id } => {
                self.mark_processing(&execution_id).await;
            }
            PushEvent::Progress {
                execution_id,
                value,
                max,
            } => {
                // A missed start message must not leave the job looking queued.
                self.mark_processing(&execution_id).await;
                let percent = progress_percent(value, max);
                self.store
                    .record_progress(JobSelector::execution(execution_id), percent)
                    .await;
            }
            PushEvent::Succeeded {
                execution_id,
                outputs,
            } => {
                let Some(job) = self.store.find_by_execution(&execution_id).await else {
                    tracing::debug!(execution_id = %execution_id, "Success for unknown execution");
                    return;
                };
                self.complete(&job, &outputs).await;
            }
            PushEvent::Failed { execution_id, reason } => {
                self.fail(JobSelector::execution(execution_id), reason).await;
            }
            PushEvent::Finished { execution_id } => {
                let Some(job) = self.store.find_by_execution(&execution_id).await else {
                    return;
                };
                if job.status.is_active() {
                    self.check_history(&job).await;
                }
            }
        }
    }

    /// Look up every active job with an execution id once. Returns how many
    /// jobs reached a terminal state.
    pub async fn poll_once(&self) -> usize {
        let jobs = self.store.active_with_execution().await;
        if jobs.is_empty() {
            return 0;
        }

        let resolved = join_all(jobs.iter().map(|job| self.check_history(job))).await;
        resolved.into_iter().filter(|done| *done).count()
    }

    /// Poll every `interval` until cancelled.
    pub async fn run_poll_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Result poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Result poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let resolved = self.poll_once().await;
                    if resolved > 0 {
                        tracing::debug!(resolved, "Poll resolved jobs");
                    }
                }
            }
        }
    }

    // ---- private helpers ----

    async fn mark_processing(&self, execution_id: &str) {
        let outcome = self
            .store
            .apply_transition(
                JobSelector::execution(execution_id),
                Transition::to(JobStatus::Processing).only_from(&[JobStatus::Queued]),
            )
            .await;
        if let TransitionOutcome::Applied(job) = outcome {
            tracing::info!(job_id = job.id, execution_id, "Execution started");
        }
    }

    /// Query the job's server history. Returns `true` when the job reached
    /// a terminal state because of it.
    async fn check_history(&self, job: &Job) -> bool {
        let Some(execution_id) = job.execution_id.as_deref() else {
            return false;
        };
        let remote = self.registry.remote(&job.config.server_url).await;

        match bounded(self.remote_timeout, remote.lookup_result(execution_id)).await {
            Ok(Some(HistoryRecord { error: Some(reason), .. })) => {
                self.fail(JobSelector::Id(job.id), reason).await
            }
            Ok(Some(record)) => self.complete(job, &record.outputs).await,
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(
                    job_id = job.id,
                    execution_id,
                    error = %e,
                    "History lookup failed, retrying next interval",
                );
                false
            }
        }
    }

    async fn complete(&self, job: &Job, outputs: &serde_json::Value) -> bool {
        let extracted = extract_result(outputs, &self.save_node_id, &job.config.server_url);
        match &extracted {
            None => tracing::warn!(
                job_id = job.id,
                execution_id = ?job.execution_id,
                "Execution succeeded but produced no video or image output",
            ),
            Some(result) => {
                if let ResultSource::Fallback { node_id } = &result.source {
                    tracing::warn!(
                        job_id = job.id,
                        save_node_id = %self.save_node_id,
                        node_id = %node_id,
                        "Save node produced no output, using another node's artifact",
                    );
                }
            }
        }

        let outcome = self
            .store
            .apply_transition(
                JobSelector::Id(job.id),
                Transition::to(JobStatus::Completed)
                    .only_from(&JobStatus::ACTIVE)
                    .with_result(extracted),
            )
            .await;

        match outcome {
            TransitionOutcome::Applied(job) => {
                tracing::info!(
                    job_id = job.id,
                    execution_id = ?job.execution_id,
                    result = ?job.result_name,
                    "Job completed",
                );
                true
            }
            TransitionOutcome::Rejected { current } => {
                tracing::debug!(job_id = job.id, status = %current, "Late success ignored");
                false
            }
            TransitionOutcome::NotFound => false,
        }
    }

    async fn fail(&self, selector: JobSelector, reason: String) -> bool {
        let outcome = self
            .store
            .apply_transition(
                selector,
                Transition::to(JobStatus::Failed)
                    .only_from(&JobStatus::ACTIVE)
                    .with_error(reason.clone()),
            )
            .await;

        match outcome {
            TransitionOutcome::Applied(job) => {
                tracing::warn!(
                    job_id = job.id,
                    execution_id = ?job.execution_id,
                    reason = %reason,
                    "Job failed on server",
                );
                true
            }
            _ => false,
        }
    }
}
