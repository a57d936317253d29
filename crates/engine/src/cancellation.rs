//! Operator-initiated cancellation.
//!
//! Local state changes first and immediately; remote interrupts follow as
//! background tasks whose outcome is only logged. A remote success that
//! arrives after the local cancellation cannot revive the job because the
//! store refuses FAILED -> COMPLETED.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::task::TaskTracker;
use vidflow_core::error::CoreError;
use vidflow_core::job::{Job, JobId, JobStatus, CANCELLED_BY_USER};

use crate::bounded;
use crate::context::DispatchContext;
use crate::registry::ServerRegistry;
use crate::store::{JobSelector, JobStore, Transition, TransitionOutcome};

/// What a batch stop changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStopReport {
    /// PENDING jobs put back to IDLE.
    pub reverted: Vec<JobId>,
    /// Active jobs failed as cancelled.
    pub cancelled: Vec<JobId>,
    /// Servers that were sent an interrupt.
    pub interrupted: Vec<String>,
}

enum Stopped {
    Reverted(Job),
    /// `before` is the job as it was when the transition applied.
    Cancelled { before: Job, after: Job },
}

pub struct CancellationController {
    store: Arc<JobStore>,
    registry: Arc<ServerRegistry>,
    tracker: TaskTracker,
    remote_timeout: Duration,
}

impl CancellationController {
    pub fn new(store: Arc<JobStore>, registry: Arc<ServerRegistry>, remote_timeout: Duration) -> Self {
        Self {
            store,
            registry,
            tracker: TaskTracker::new(),
            remote_timeout,
        }
    }

    /// Stop one job.
    ///
    /// PENDING goes back to IDLE. An active job becomes FAILED with
    /// [`CANCELLED_BY_USER`] and its server gets a best-effort interrupt.
    /// Any other status is a conflict.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job, CoreError> {
        match self.stop(id).await? {
            Stopped::Reverted(updated) => {
                tracing::info!(job_id = id, "Pending job returned to idle");
                Ok(updated)
            }
            Stopped::Cancelled { before, after } => {
                tracing::info!(job_id = id, from = %before.status, "Job cancelled");
                self.cleanup_remote(&before);
                self.spawn_interrupt(before.config.server_url.clone());
                Ok(after)
            }
        }
    }

    /// Stop the batch: clear the flag, revert PENDING jobs, fail active
    /// ones and interrupt each affected server once.
    ///
    /// A job claimed by the dispatcher while the stop runs is re-read and
    /// failed instead of reverted.
    pub async fn stop_batch(&self, ctx: &DispatchContext) -> BatchStopReport {
        ctx.set_batch_running(false);

        let mut report = BatchStopReport::default();
        let mut servers = BTreeSet::new();

        let outstanding = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|job| job.status.is_outstanding());
        for job in outstanding {
            match self.stop(job.id).await {
                Ok(Stopped::Reverted(_)) => report.reverted.push(job.id),
                Ok(Stopped::Cancelled { before, .. }) => {
                    report.cancelled.push(job.id);
                    self.cleanup_remote(&before);
                    servers.insert(before.config.server_url.clone());
                }
                // Finished or removed since the listing.
                Err(_) => {}
            }
        }

        for url in &servers {
            self.spawn_interrupt(url.clone());
        }
        report.interrupted = servers.into_iter().collect();

        tracing::info!(
            reverted = report.reverted.len(),
            cancelled = report.cancelled.len(),
            interrupted = report.interrupted.len(),
            "Batch stopped",
        );
        report
    }

    /// Wait for outstanding interrupt requests.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    // ---- private helpers ----

    /// Apply the stop action matching the job's current status, re-reading
    /// whenever the job moved on between the read and the transition.
    async fn stop(&self, id: JobId) -> Result<Stopped, CoreError> {
        loop {
            let job = self
                .store
                .get(id)
                .await
                .ok_or(CoreError::NotFound { entity: "job", id })?;

            let outcome = match job.status {
                JobStatus::Pending => self.revert_pending(id).await,
                status if status.is_active() => self.fail_active(id).await,
                status => {
                    return Err(CoreError::Conflict(format!("job {id} is {status} and cannot be cancelled")));
                }
            };

            match outcome {
                TransitionOutcome::Applied(after) if job.status.is_active() => {
                    return Ok(Stopped::Cancelled { before: job, after });
                }
                TransitionOutcome::Applied(after) => return Ok(Stopped::Reverted(after)),
                TransitionOutcome::Rejected { current } => {
                    tracing::debug!(job_id = id, from = %job.status, now = %current, "Job moved during stop, retrying");
                }
                TransitionOutcome::NotFound => return Err(CoreError::NotFound { entity: "job", id }),
            }
        }
    }

    async fn revert_pending(&self, id: JobId) -> TransitionOutcome {
        self.store
            .apply_transition(
                JobSelector::Id(id),
                Transition::to(JobStatus::Idle).only_from(&[JobStatus::Pending]),
            )
            .await
    }

    async fn fail_active(&self, id: JobId) -> TransitionOutcome {
        self.store
            .apply_transition(
                JobSelector::Id(id),
                Transition::to(JobStatus::Failed)
                    .only_from(&JobStatus::ACTIVE)
                    .with_error(CANCELLED_BY_USER),
            )
            .await
    }

    /// A prompt still waiting in the server queue would run after the
    /// interrupt; remove it.
    fn cleanup_remote(&self, job: &Job) {
        let (JobStatus::Queued, Some(execution_id)) = (job.status, job.execution_id.clone()) else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let url = job.config.server_url.clone();
        let timeout = self.remote_timeout;
        let job_id = job.id;

        self.tracker.spawn(async move {
            let remote = registry.remote(&url).await;
            if let Err(e) = bounded(timeout, remote.cancel_queued(&execution_id)).await {
                tracing::warn!(job_id, execution_id = %execution_id, error = %e, "Failed to remove queued prompt");
            }
        });
    }

    fn spawn_interrupt(&self, url: String) {
        let registry = Arc::clone(&self.registry);
        let timeout = self.remote_timeout;

        self.tracker.spawn(async move {
            let remote = registry.remote(&url).await;
            match bounded(timeout, remote.interrupt()).await {
                Ok(()) => tracing::info!(server_url = %url, "Interrupt sent"),
                Err(e) => tracing::warn!(server_url = %url, error = %e, "Interrupt failed"),
            }
        });
    }
}
