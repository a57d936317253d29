//! Job entity, status machine vocabulary and generation parameters.
//!
//! A [`Job`] is one image submitted for generation on one remote server.
//! Its [`ConfigSnapshot`] is a value copy taken at creation time, so later
//! edits to [`GenerationDefaults`] never reach existing jobs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use validator::Validate;

use crate::extraction::{ResultLocator, ResultSource};
use crate::types::{DbId, Timestamp};

/// Job identifier. Assigned by the job store in creation order.
pub type JobId = DbId;

/// Fixed failure reason recorded when the operator stops a job.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
///
/// ```text
/// IDLE -> PENDING -> UPLOADING -> QUEUED -> PROCESSING -> COMPLETED
///   ^        |           |          |           |
///   +--------+           +----------+-----------+------> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Pending,
    Uploading,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Statuses in which a job occupies its target server.
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Uploading, JobStatus::Queued, JobStatus::Processing];

    /// The job owns its server: it is being uploaded, queued or executed.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Work is still outstanding for this job (waiting for a claim or running).
    pub fn is_outstanding(self) -> bool {
        self == JobStatus::Pending || self.is_active()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// How the sampler seed is chosen when the job is submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SeedPolicy {
    Fixed { value: u64 },
    #[default]
    Randomize,
}

impl SeedPolicy {
    /// Resolve to a concrete seed. Random seeds stay within six digits,
    /// which every sampler node accepts.
    pub fn resolve(self) -> u64 {
        match self {
            SeedPolicy::Fixed { value } => value,
            SeedPolicy::Randomize => rand::random_range(0..1_000_000),
        }
    }
}

/// Output frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Resolution {
    #[validate(range(min = 64, max = 4096))]
    pub width: u32,
    #[validate(range(min = 64, max = 4096))]
    pub height: u32,
}

/// Global generation defaults used to seed new jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationDefaults {
    #[validate(length(min = 1, message = "positive prompt must not be empty"))]
    pub positive_prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub seed: SeedPolicy,
    #[validate(nested)]
    pub resolution: Resolution,
    #[validate(range(min = 1, max = 60))]
    pub fps: u32,
    #[validate(range(min = 1, max = 30))]
    pub duration_secs: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            positive_prompt: "a cinematic shot, smooth natural motion".to_string(),
            negative_prompt: "blurry, distorted, static, watermark".to_string(),
            seed: SeedPolicy::Randomize,
            resolution: Resolution {
                width: 832,
                height: 480,
            },
            fps: 16,
            duration_secs: 5,
        }
    }
}

impl GenerationDefaults {
    /// Take a value copy of these defaults aimed at `server_url`.
    pub fn snapshot(&self, server_url: impl Into<String>) -> ConfigSnapshot {
        ConfigSnapshot {
            positive_prompt: self.positive_prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            seed: self.seed,
            resolution: self.resolution,
            fps: self.fps,
            duration_secs: self.duration_secs,
            server_url: server_url.into(),
        }
    }
}

/// Per-job copy of the generation parameters, including the target server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ConfigSnapshot {
    #[validate(length(min = 1, message = "positive prompt must not be empty"))]
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub seed: SeedPolicy,
    #[validate(nested)]
    pub resolution: Resolution,
    #[validate(range(min = 1, max = 60))]
    pub fps: u32,
    #[validate(range(min = 1, max = 30))]
    pub duration_secs: u32,
    #[validate(url)]
    pub server_url: String,
}

impl ConfigSnapshot {
    /// Number of frames the workflow should render.
    pub fn frame_count(&self) -> u32 {
        self.fps * self.duration_secs + 1
    }
}

// ---------------------------------------------------------------------------
// Input reference
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InputFile {
    path: PathBuf,
    original_name: String,
}

/// Shared, immutable reference to a source image on local disk.
///
/// Cloning shares the reference; the bytes are only read at upload time.
#[derive(Debug, Clone)]
pub struct InputRef(Arc<InputFile>);

impl InputRef {
    pub fn new(path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self(Arc::new(InputFile {
            path: path.into(),
            original_name: original_name.into(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// File name as chosen by the operator, used as the upload name.
    pub fn original_name(&self) -> &str {
        &self.0.original_name
    }

    /// Whether both references point at the same source file record.
    pub fn same_source(&self, other: &InputRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Serialize for InputRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.original_name())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One submission of one input image to one remote server.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub input: InputRef,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub config: ConfigSnapshot,
    pub execution_id: Option<String>,
    /// Concrete seed resolved from the config's policy when the job was
    /// claimed for submission.
    pub submitted_seed: Option<u64>,
    pub result_locator: Option<ResultLocator>,
    pub result_name: Option<String>,
    pub alternate_result_locator: Option<ResultLocator>,
    pub result_source: Option<ResultSource>,
    pub error_message: Option<String>,
    /// Set when this job was created by retrying a failed job.
    pub retry_of: Option<JobId>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    pub fn new(id: JobId, input: InputRef, config: ConfigSnapshot, status: JobStatus) -> Self {
        Self {
            id,
            input,
            status,
            progress_percent: 0,
            config,
            execution_id: None,
            submitted_seed: None,
            result_locator: None,
            result_name: None,
            alternate_result_locator: None,
            result_source: None,
            error_message: None,
            retry_of: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Fresh IDLE copy sharing this job's input and config.
    ///
    /// Status, execution id, progress and result fields are never carried
    /// over.
    pub fn duplicate_as(&self, id: JobId) -> Job {
        Job::new(id, self.input.clone(), self.config.clone(), JobStatus::Idle)
    }

    /// Fresh PENDING copy of a failed job, linked back through `retry_of`.
    pub fn retry_as(&self, id: JobId) -> Job {
        let mut job = Job::new(id, self.input.clone(), self.config.clone(), JobStatus::Pending);
        job.retry_of = Some(self.id);
        job
    }
}
