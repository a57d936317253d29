//! Handlers for the `/jobs` resource.
//!
//! Jobs are created from a multipart upload: the image is written to the
//! upload directory and the job gets a snapshot of the current generation
//! defaults, optionally overridden per request.

use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use vidflow_core::error::CoreError;
use vidflow_core::extraction::ResultLocator;
use vidflow_core::job::{ConfigSnapshot, InputRef, Job, JobId, JobStatus, SeedPolicy};
use vidflow_core::remote::RemoteError;
use vidflow_core::server::normalize_url;
use vidflow_engine::bounded;

use crate::error::{AppError, AppResult};
use crate::handlers::servers::active_url;
use crate::response::DataResponse;
use crate::state::AppState;

/// Accepted source image extensions.
const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(state: &AppState, id: JobId) -> AppResult<Job> {
    state
        .engine
        .store()
        .get(id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound { entity: "job", id }))
}

/// Form fields of a job upload other than the image itself.
#[derive(Debug, Default)]
struct JobOverrides {
    server_url: Option<String>,
    positive_prompt: Option<String>,
    negative_prompt: Option<String>,
    seed: Option<u64>,
    randomize_seed: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    duration_secs: Option<u32>,
}

impl JobOverrides {
    fn set(&mut self, field: &str, value: String) -> AppResult<()> {
        let value = value.trim().to_string();
        if value.is_empty() {
            return Ok(());
        }
        match field {
            "server_url" => self.server_url = Some(value),
            "positive_prompt" => self.positive_prompt = Some(value),
            "negative_prompt" => self.negative_prompt = Some(value),
            "seed" => self.seed = Some(parse_field(field, &value)?),
            "randomize_seed" => self.randomize_seed = Some(parse_field(field, &value)?),
            "width" => self.width = Some(parse_field(field, &value)?),
            "height" => self.height = Some(parse_field(field, &value)?),
            "fps" => self.fps = Some(parse_field(field, &value)?),
            "duration" | "duration_secs" => self.duration_secs = Some(parse_field(field, &value)?),
            _ => {} // ignore unknown fields
        }
        Ok(())
    }

    fn apply(self, config: &mut ConfigSnapshot) {
        if let Some(prompt) = self.positive_prompt {
            config.positive_prompt = prompt;
        }
        if let Some(prompt) = self.negative_prompt {
            config.negative_prompt = prompt;
        }
        match (self.randomize_seed, self.seed) {
            (Some(true), _) => config.seed = SeedPolicy::Randomize,
            (_, Some(value)) => config.seed = SeedPolicy::Fixed { value },
            (Some(false), None) => pin_seed(config),
            (None, None) => {}
        }
        if let Some(width) = self.width {
            config.resolution.width = width;
        }
        if let Some(height) = self.height {
            config.resolution.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(duration) = self.duration_secs {
            config.duration_secs = duration;
        }
    }
}

/// `randomize_seed=false` without a seed pins a freshly drawn one, so the
/// job and its duplicates render identically.
fn pin_seed(config: &mut ConfigSnapshot) {
    if config.seed == SeedPolicy::Randomize {
        config.seed = SeedPolicy::Fixed {
            value: SeedPolicy::Randomize.resolve(),
        };
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> AppResult<T> {
    value
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid value for '{field}': {value}")))
}

/// Keep the file name readable but safe to join onto the upload directory.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Multipart upload with a required `file` (or `image`) field and optional
/// overrides: `server_url`, `positive_prompt`, `negative_prompt`, `seed`,
/// `randomize_seed`, `width`, `height`, `fps`, `duration`. Without
/// `server_url` the job targets the selected server. The job starts
/// `pending` while a batch runs, `idle` otherwise.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut file_data: Option<(String, Vec<u8>)> = None;
    let mut overrides = JobOverrides::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" | "image" => {
                let filename = field.file_name().unwrap_or("upload.png").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file_data = Some((filename, data.to_vec()));
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                overrides.set(&name, text)?;
            }
        }
    }

    let (original_name, data) =
        file_data.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".into()));
    }
    let ext = original_name.rsplit('.').next().unwrap_or("").to_lowercase();
    if !SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported image format '.{ext}'. Supported: {}",
            SUPPORTED_IMAGE_EXTENSIONS.join(", ")
        )));
    }

    let server_url = match overrides.server_url.take() {
        Some(url) => normalize_url(&url)?,
        None => active_url(&state).await?,
    };
    let mut config = state.defaults.read().await.snapshot(server_url);
    overrides.apply(&mut config);

    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let stored_name = format!("{}_{}", uuid::Uuid::now_v7().simple(), sanitize_filename(&original_name));
    let path = upload_dir.join(&stored_name);
    tokio::fs::write(&path, &data)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let job = match state
        .engine
        .create_job(InputRef::new(path.clone(), original_name), config)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            // Nothing references the file yet.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
    };

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// All jobs in creation order.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.engine.store().list().await;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
///
/// Remove a job from the list. Returns 409 while it occupies a server.
pub async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.engine.remove_job(id).await?;
    tracing::info!(job_id = id, "Job removed");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/{id}/enqueue
pub async fn enqueue_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.enqueue(id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Pending jobs return to idle; running jobs become failed and their server
/// is interrupted. Returns 409 for idle or finished jobs.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.cancel_job(id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/jobs/{id}/duplicate
pub async fn duplicate_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.duplicate_job(id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// POST /api/v1/jobs/{id}/retry
///
/// Returns 409 unless the job failed.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.engine.retry_job(id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/result
///
/// Stream the result artifact from the server that produced it. When the
/// primary locator fails and the job has an alternate one, that is tried
/// before giving up with 502.
pub async fn download_result(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, id).await?;
    let (JobStatus::Completed, Some(primary)) = (job.status, job.result_locator.as_ref()) else {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "job {id} has no result to download"
        ))));
    };

    let bytes = match fetch(&state, primary).await {
        Ok(bytes) => bytes,
        Err(primary_err) => match &job.alternate_result_locator {
            Some(alternate) => {
                tracing::warn!(
                    job_id = id,
                    filename = %primary.filename,
                    error = %primary_err,
                    "Primary result locator failed, trying alternate",
                );
                fetch(&state, alternate).await?
            }
            None => return Err(primary_err.into()),
        },
    };

    let name = job.result_name.unwrap_or_else(|| primary.filename.clone());
    let headers = [
        (CONTENT_TYPE, content_type_for(&name).to_string()),
        (CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
    ];
    Ok((headers, bytes))
}

async fn fetch(state: &AppState, locator: &ResultLocator) -> Result<Vec<u8>, RemoteError> {
    let remote = state.engine.registry().remote(&locator.server_url).await;
    let limit = state.engine.config().remote_timeout;
    bounded(limit, remote.fetch_artifact(locator)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidflow_core::job::GenerationDefaults;

    #[test]
    fn filenames_lose_directories_and_spaces() {
        assert_eq!(sanitize_filename("my photo.png"), "my_photo.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\pics\\a b.jpg"), "a_b.jpg");
    }

    #[test]
    fn overrides_replace_snapshot_fields() {
        let mut config = GenerationDefaults::default().snapshot("http://gpu:8188");
        let mut overrides = JobOverrides::default();
        overrides.set("fps", "24".into()).unwrap();
        overrides.set("duration", "3".into()).unwrap();
        overrides.set("seed", "42".into()).unwrap();
        overrides.set("positive_prompt", "a cat".into()).unwrap();
        overrides.set("negative_prompt", "  ".into()).unwrap();
        overrides.apply(&mut config);

        assert_eq!(config.fps, 24);
        assert_eq!(config.duration_secs, 3);
        assert_eq!(config.seed, SeedPolicy::Fixed { value: 42 });
        assert_eq!(config.positive_prompt, "a cat");
        assert_eq!(config.negative_prompt, GenerationDefaults::default().negative_prompt);
    }

    #[test]
    fn randomize_wins_over_explicit_seed() {
        let mut config = GenerationDefaults::default().snapshot("http://gpu:8188");
        let mut overrides = JobOverrides::default();
        overrides.set("seed", "42".into()).unwrap();
        overrides.set("randomize_seed", "true".into()).unwrap();
        overrides.apply(&mut config);
        assert_eq!(config.seed, SeedPolicy::Randomize);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut overrides = JobOverrides::default();
        assert!(matches!(overrides.set("fps", "fast".into()), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("clip_00001.mp4"), "video/mp4");
        assert_eq!(content_type_for("frame.PNG"), "image/png");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
