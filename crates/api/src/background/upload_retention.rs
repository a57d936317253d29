//! Periodic cleanup of uploaded source images.
//!
//! Duplicates and retries share their source's upload, so a file is kept
//! for as long as any job in the store references it. Unreferenced files
//! older than the retention period are deleted once an hour.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use vidflow_engine::orchestrator::Orchestrator;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

const SECS_PER_DAY: u64 = 24 * 3600;

/// Run the upload retention loop until `cancel` is triggered.
///
/// A `retention_days` of zero disables cleanup.
pub async fn run(
    engine: Arc<Orchestrator>,
    upload_dir: PathBuf,
    retention_days: u64,
    cancel: CancellationToken,
) {
    if retention_days == 0 {
        tracing::info!("Upload retention disabled");
        return;
    }
    let retention = Duration::from_secs(retention_days.saturating_mul(SECS_PER_DAY));

    tracing::info!(
        retention_days,
        upload_dir = %upload_dir.display(),
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Upload retention job started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Upload retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
                    continue;
                };
                let referenced = referenced_inputs(&engine).await;
                match sweep(&upload_dir, cutoff, &referenced).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "Upload retention: purged old uploads");
                    }
                    Ok(_) => tracing::debug!("Upload retention: nothing to purge"),
                    Err(e) => {
                        tracing::error!(error = %e, "Upload retention: cleanup failed");
                    }
                }
            }
        }
    }
}

/// Input paths of every job currently in the store.
pub async fn referenced_inputs(engine: &Orchestrator) -> HashSet<PathBuf> {
    engine
        .store()
        .list()
        .await
        .into_iter()
        .map(|job| job.input.path().to_path_buf())
        .collect()
}

/// Delete regular files in `dir` last modified before `cutoff`, skipping
/// anything in `keep`. Returns how many files were removed.
///
/// A missing directory means nothing was ever uploaded.
pub async fn sweep(dir: &Path, cutoff: SystemTime, keep: &HashSet<PathBuf>) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut deleted = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if keep.contains(&path) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() || metadata.modified()? >= cutoff {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Upload retention: could not delete file");
            }
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"png").unwrap();
        path
    }

    #[tokio::test]
    async fn old_unreferenced_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let stale = touch(dir.path(), "stale.png");
        let referenced = touch(dir.path(), "referenced.png");
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let cutoff = SystemTime::now() + Duration::from_secs(60);
        let keep = HashSet::from([referenced.clone()]);
        let deleted = sweep(dir.path(), cutoff, &keep).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!stale.exists());
        assert!(referenced.exists());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn recent_files_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = touch(dir.path(), "fresh.png");

        let cutoff = SystemTime::now() - Duration::from_secs(3600);
        let deleted = sweep(dir.path(), cutoff, &HashSet::new()).await.unwrap();

        assert_eq!(deleted, 0);
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");

        let deleted = sweep(&missing, SystemTime::now(), &HashSet::new()).await.unwrap();
        assert_eq!(deleted, 0);
    }
}
