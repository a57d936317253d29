//! In-memory job store.
//!
//! Every status change goes through [`JobStore::apply_transition`], which
//! runs the whole read-check-write under one write lock. Concurrent
//! producers (dispatcher, push consumer, poll loop, cancellation) therefore
//! never interleave inside a transition, and an invalid transition is
//! simply reported back instead of blocking anyone.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use vidflow_core::error::CoreError;
use vidflow_core::extraction::ExtractedResult;
use vidflow_core::job::{ConfigSnapshot, InputRef, Job, JobId, JobStatus};

// ---------------------------------------------------------------------------
// Transition vocabulary
// ---------------------------------------------------------------------------

/// How a transition finds its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    Id(JobId),
    /// Correlate through the remote execution id.
    Execution(String),
}

impl JobSelector {
    pub fn execution(id: impl Into<String>) -> Self {
        JobSelector::Execution(id.into())
    }
}

/// A requested status change plus the fields to merge with it.
#[derive(Debug, Clone)]
pub struct Transition {
    to: JobStatus,
    only_from: Option<&'static [JobStatus]>,
    execution_id: Option<String>,
    seed: Option<u64>,
    error_message: Option<String>,
    result: Option<ExtractedResult>,
}

impl Transition {
    pub fn to(status: JobStatus) -> Self {
        Self {
            to: status,
            only_from: None,
            execution_id: None,
            seed: None,
            error_message: None,
            result: None,
        }
    }

    /// Apply only when the current status is one of `statuses`.
    pub fn only_from(mut self, statuses: &'static [JobStatus]) -> Self {
        self.only_from = Some(statuses);
        self
    }

    /// Attach the execution id. Ignored when the job already has one.
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Record the seed the job will be submitted with.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_result(mut self, result: Option<ExtractedResult>) -> Self {
        self.result = result;
        self
    }
}

/// Result of [`JobStore::apply_transition`].
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The transition applied; carries the updated job.
    Applied(Job),
    /// The guard refused the transition; the job is unchanged.
    Rejected { current: JobStatus },
    NotFound,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<Job> {
        match self {
            TransitionOutcome::Applied(job) => Some(job),
            _ => None,
        }
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub idle: usize,
    pub pending: usize,
    pub uploading: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn bump(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Idle => &mut self.idle,
            JobStatus::Pending => &mut self.pending,
            JobStatus::Uploading => &mut self.uploading,
            JobStatus::Queued => &mut self.queued,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.idle + self.pending + self.uploading + self.queued + self.processing + self.completed + self.failed
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    jobs: BTreeMap<JobId, Job>,
    by_execution: HashMap<String, JobId>,
    next_id: JobId,
}

impl StoreState {
    fn allocate_id(&mut self) -> JobId {
        self.next_id += 1;
        self.next_id
    }

    fn resolve(&self, selector: &JobSelector) -> Option<JobId> {
        match selector {
            JobSelector::Id(id) => self.jobs.contains_key(id).then_some(*id),
            JobSelector::Execution(execution_id) => self.by_execution.get(execution_id).copied(),
        }
    }
}

/// Monitor over all jobs, keyed by id with a secondary execution-id index.
#[derive(Debug, Default)]
pub struct JobStore {
    state: RwLock<StoreState>,
    changed: Notify,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the store changes. A change that happened while nobody
    /// was waiting is delivered to the next waiter.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Create a job with a fresh id.
    pub async fn insert(&self, input: InputRef, config: ConfigSnapshot, status: JobStatus) -> Job {
        let mut state = self.state.write().await;
        let id = state.allocate_id();
        let job = Job::new(id, input, config, status);
        state.jobs.insert(id, job.clone());
        drop(state);

        self.changed.notify_one();
        job
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.state.read().await.jobs.get(&id).cloned()
    }

    pub async fn find_by_execution(&self, execution_id: &str) -> Option<Job> {
        let state = self.state.read().await;
        let id = state.by_execution.get(execution_id)?;
        state.jobs.get(id).cloned()
    }

    /// All jobs in creation order.
    pub async fn list(&self) -> Vec<Job> {
        self.state.read().await.jobs.values().cloned().collect()
    }

    /// Apply a guarded status transition.
    ///
    /// Refused when the job is FAILED and the target is COMPLETED, when it
    /// is already COMPLETED and the target is COMPLETED again, or when the
    /// transition's `only_from` set does not contain the current status.
    pub async fn apply_transition(&self, selector: JobSelector, transition: Transition) -> TransitionOutcome {
        let mut state = self.state.write().await;
        let Some(id) = state.resolve(&selector) else {
            return TransitionOutcome::NotFound;
        };

        let current = state.jobs[&id].status;
        if !transition_allowed(current, &transition) {
            tracing::debug!(
                job_id = id,
                from = %current,
                to = %transition.to,
                "Transition rejected",
            );
            return TransitionOutcome::Rejected { current };
        }

        let Transition {
            to,
            execution_id,
            seed,
            error_message,
            result,
            ..
        } = transition;

        let Some(job) = state.jobs.get_mut(&id) else {
            return TransitionOutcome::NotFound;
        };
        let now = chrono::Utc::now();

        job.status = to;
        match to {
            JobStatus::Uploading => job.started_at = Some(now),
            JobStatus::Completed => {
                job.progress_percent = 100;
                job.completed_at = Some(now);
            }
            JobStatus::Failed => job.completed_at = Some(now),
            JobStatus::Idle | JobStatus::Pending => job.progress_percent = 0,
            JobStatus::Queued | JobStatus::Processing => {}
        }
        if seed.is_some() {
            job.submitted_seed = seed;
        }
        if let Some(message) = error_message {
            job.error_message = Some(message);
        }
        if let Some(extracted) = result {
            job.result_name = Some(extracted.name);
            job.result_locator = Some(extracted.locator);
            job.alternate_result_locator = extracted.alternate;
            job.result_source = Some(extracted.source);
        }

        let attached = execution_id.filter(|e| !e.is_empty() && job.execution_id.is_none());
        if let Some(execution_id) = &attached {
            job.execution_id = Some(execution_id.clone());
        }
        let updated = job.clone();
        if let Some(execution_id) = attached {
            state.by_execution.insert(execution_id, id);
        }
        drop(state);

        tracing::debug!(job_id = id, from = %current, to = %to, "Job transitioned");
        self.changed.notify_one();
        TransitionOutcome::Applied(updated)
    }

    /// Record the execution id on a job without touching its status.
    ///
    /// Used after a successful submit, including when a cancellation
    /// already moved the job to FAILED. Returns the job as it is after the
    /// call; an existing id is never replaced.
    pub async fn attach_execution_id(&self, id: JobId, execution_id: &str) -> Option<Job> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id)?;
        if job.execution_id.is_some() || execution_id.is_empty() {
            return Some(job.clone());
        }
        job.execution_id = Some(execution_id.to_string());
        let updated = job.clone();
        state.by_execution.insert(execution_id.to_string(), id);
        Some(updated)
    }

    /// Update progress of an active job. Returns `false` when the job is
    /// unknown or not active.
    pub async fn record_progress(&self, selector: JobSelector, percent: u8) -> bool {
        let mut state = self.state.write().await;
        let Some(id) = state.resolve(&selector) else {
            return false;
        };
        match state.jobs.get_mut(&id) {
            Some(job) if job.status.is_active() => {
                job.progress_percent = percent.min(100);
                true
            }
            _ => false,
        }
    }

    /// Fresh IDLE copy of a job.
    pub async fn duplicate(&self, id: JobId) -> Result<Job, CoreError> {
        let mut state = self.state.write().await;
        let source = state.jobs.get(&id).ok_or(CoreError::NotFound { entity: "job", id })?;
        let copy_id = state.next_id + 1;
        let copy = source.duplicate_as(copy_id);
        state.next_id = copy_id;
        state.jobs.insert(copy_id, copy.clone());
        drop(state);

        self.changed.notify_one();
        Ok(copy)
    }

    /// New PENDING job from a FAILED one.
    pub async fn retry_failed(&self, id: JobId) -> Result<Job, CoreError> {
        let mut state = self.state.write().await;
        let source = state.jobs.get(&id).ok_or(CoreError::NotFound { entity: "job", id })?;
        if source.status != JobStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "job {id} is {} and only failed jobs can be retried",
                source.status
            )));
        }
        let retry_id = state.next_id + 1;
        let retry = source.retry_as(retry_id);
        state.next_id = retry_id;
        state.jobs.insert(retry_id, retry.clone());
        drop(state);

        self.changed.notify_one();
        Ok(retry)
    }

    /// Remove a job that is not occupying a server.
    pub async fn remove(&self, id: JobId) -> Result<Job, CoreError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get(&id).ok_or(CoreError::NotFound { entity: "job", id })?;
        if job.status.is_active() {
            return Err(CoreError::Conflict(format!(
                "job {id} is {}; cancel it before removing",
                job.status
            )));
        }
        let removed = state.jobs.remove(&id).ok_or(CoreError::NotFound { entity: "job", id })?;
        if let Some(execution_id) = &removed.execution_id {
            state.by_execution.remove(execution_id);
        }
        Ok(removed)
    }

    /// Move every IDLE job to PENDING. Returns the promoted ids.
    pub async fn promote_idle(&self) -> Vec<JobId> {
        let mut state = self.state.write().await;
        let promoted: Vec<JobId> = state
            .jobs
            .values_mut()
            .filter(|job| job.status == JobStatus::Idle)
            .map(|job| {
                job.status = JobStatus::Pending;
                job.id
            })
            .collect();
        drop(state);

        if !promoted.is_empty() {
            self.changed.notify_one();
        }
        promoted
    }

    pub async fn count_by_status(&self) -> StatusCounts {
        let state = self.state.read().await;
        let mut counts = StatusCounts::default();
        for job in state.jobs.values() {
            counts.bump(job.status);
        }
        counts
    }

    /// Whether any job is PENDING or occupying a server.
    pub async fn has_active_work(&self) -> bool {
        self.state
            .read()
            .await
            .jobs
            .values()
            .any(|job| job.status.is_outstanding())
    }

    /// Oldest PENDING job whose target is in `claimable` and not busy.
    pub async fn next_claimable(&self, claimable: &HashSet<String>) -> Option<Job> {
        let state = self.state.read().await;
        let busy = busy_urls(&state.jobs);
        state
            .jobs
            .values()
            .find(|job| {
                job.status == JobStatus::Pending
                    && claimable.contains(&job.config.server_url)
                    && !busy.contains(&job.config.server_url)
            })
            .cloned()
    }

    /// Active jobs that already carry an execution id, for polling.
    pub async fn active_with_execution(&self) -> Vec<Job> {
        self.state
            .read()
            .await
            .jobs
            .values()
            .filter(|job| job.status.is_active() && job.execution_id.is_some())
            .cloned()
            .collect()
    }
}

// ---- private helpers ----

fn transition_allowed(current: JobStatus, transition: &Transition) -> bool {
    if transition.to == JobStatus::Completed && current.is_terminal() {
        return false;
    }
    transition
        .only_from
        .map_or(true, |allowed| allowed.contains(&current))
}

fn busy_urls(jobs: &BTreeMap<JobId, Job>) -> HashSet<String> {
    jobs.values()
        .filter(|job| job.status.is_active())
        .map(|job| job.config.server_url.clone())
        .collect()
}
