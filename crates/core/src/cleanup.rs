//! Cleanup module for Storyframe staging directories.
//!
//! Two jobs: best-effort removal of a request's own files right after it
//! finishes, and periodic age-based eviction of whatever was left behind.
//! Neither ever fails a request; problems are logged and reported back as
//! plain values.

use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use storyframe_config::{CleanupConfig, PathsConfig};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Error type for file removal.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The file stayed locked through every attempt.
    #[error("Gave up removing {path} after {attempts} attempts: {source}")]
    Exhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// An error that retrying cannot fix.
    #[error("Failed to remove {path}: {source}")]
    Failed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of a single removal.
#[derive(Debug)]
pub enum CleanupOutcome {
    Removed,
    /// Nothing was there to remove.
    AlreadyGone,
    GaveUp(CleanupError),
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, CleanupOutcome::GaveUp(_))
    }
}

/// Locked or busy files are worth another try; everything else is final.
fn is_retryable(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("busy") || msg.contains("being used by another process")
}

/// Delete `path` from disk, retrying while it is locked.
pub async fn remove_with_retry(path: &Path, attempts: u32, backoff: Duration) -> CleanupOutcome {
    remove_with(path, attempts, backoff, |p| async move {
        tokio::fs::remove_file(p).await
    })
    .await
}

/// [`remove_with_retry`] with the actual removal supplied by the caller.
pub async fn remove_with<F, Fut>(
    path: &Path,
    attempts: u32,
    backoff: Duration,
    mut remover: F,
) -> CleanupOutcome
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match remover(path.to_path_buf()).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed file");
                return CleanupOutcome::Removed;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return CleanupOutcome::AlreadyGone;
            }
            Err(e) if is_retryable(&e) && attempt < attempts => {
                debug!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "file locked, retrying removal"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                let error = if is_retryable(&e) {
                    CleanupError::Exhausted {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source: e,
                    }
                } else {
                    CleanupError::Failed {
                        path: path.to_path_buf(),
                        source: e,
                    }
                };
                warn!(error = %error, "cleanup failed");
                return CleanupOutcome::GaveUp(error);
            }
        }
    }
}

/// What one sweep of a directory did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
    pub bytes_freed: u64,
}

/// Remove regular files in `dir` (not recursing) older than `max_age`.
pub fn sweep_dir(dir: &Path, max_age: Duration) -> SweepReport {
    sweep_dir_at(dir, max_age, SystemTime::now())
}

/// [`sweep_dir`] against an explicit clock.
pub fn sweep_dir_at(dir: &Path, max_age: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();

    if !dir.exists() {
        return report;
    }

    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in entries {
        report.scanned += 1;

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.removed += 1;
                report.bytes_freed += metadata.len();
                info!(path = %entry.path().display(), age_secs = age.as_secs(), "removed stale file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                report.failed += 1;
                warn!(path = %entry.path().display(), error = %e, "could not remove stale file");
            }
        }
    }

    report
}

/// Sweep both staging directories with their configured ages.
pub fn sweep_staging(paths: &PathsConfig, cleanup: &CleanupConfig) -> (SweepReport, SweepReport) {
    let temp = sweep_dir(&paths.temp_dir, Duration::from_secs(cleanup.temp_max_age_secs));
    let output = sweep_dir(
        &paths.output_dir,
        Duration::from_secs(cleanup.output_max_age_secs),
    );
    (temp, output)
}

/// Background task sweeping the staging directories every
/// `sweep_interval_secs`. The first sweep runs one interval after start.
///
/// Returns `None` when the interval is zero.
pub fn spawn_sweeper(paths: PathsConfig, cleanup: CleanupConfig) -> Option<JoinHandle<()>> {
    if cleanup.sweep_interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let period = Duration::from_secs(cleanup.sweep_interval_secs);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;

            let (paths, cleanup) = (paths.clone(), cleanup.clone());
            match tokio::task::spawn_blocking(move || sweep_staging(&paths, &cleanup)).await {
                Ok((temp, output)) => {
                    if temp.removed + output.removed > 0 {
                        info!(
                            temp_removed = temp.removed,
                            output_removed = output.removed,
                            bytes_freed = temp.bytes_freed + output.bytes_freed,
                            "periodic sweep finished"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "periodic sweep task failed"),
            }
        }
    }))
}

/// File count and total size of a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirStats {
    pub files: u64,
    pub bytes: u64,
}

/// Count regular files directly inside `dir`. A missing directory is empty.
pub fn dir_stats(dir: &Path) -> DirStats {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .fold(DirStats::default(), |mut stats, entry| {
            stats.files += 1;
            stats.bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            stats
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_remove_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("variant.mp4");
        fs::write(&path, b"data").unwrap();

        let outcome = remove_with_retry(&path, 3, Duration::from_millis(1)).await;

        assert!(matches!(outcome, CleanupOutcome::Removed));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_success() {
        let dir = TempDir::new().unwrap();
        let outcome =
            remove_with_retry(&dir.path().join("nope.mp4"), 3, Duration::from_millis(1)).await;

        assert!(matches!(outcome, CleanupOutcome::AlreadyGone));
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn test_locked_file_retried_until_released() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = remove_with(
            Path::new("locked.mp4"),
            3,
            Duration::from_millis(1),
            move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert!(matches!(outcome, CleanupOutcome::Removed));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = remove_with(
            Path::new("locked.mp4"),
            3,
            Duration::from_millis(1),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::new(io::ErrorKind::Other, "Device or resource busy")) }
            },
        )
        .await;

        assert!(matches!(
            outcome,
            CleanupOutcome::GaveUp(CleanupError::Exhausted { attempts: 3, .. })
        ));
        assert!(!outcome.is_clean());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = remove_with(
            Path::new("dir"),
            5,
            Duration::from_millis(1),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::new(io::ErrorKind::InvalidInput, "is a directory")) }
            },
        )
        .await;

        assert!(matches!(
            outcome,
            CleanupOutcome::GaveUp(CleanupError::Failed { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sweep_removes_only_old_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.mp4"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.mp4"), b"x").unwrap();

        // Two hours from now, everything just written is older than one hour
        let later = SystemTime::now() + 2 * HOUR;
        let report = sweep_dir_at(dir.path(), HOUR, later);

        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.bytes_freed, 100);
        assert!(!dir.path().join("old.mp4").exists());
        // Only the top level is swept
        assert!(dir.path().join("nested").join("deep.mp4").exists());
    }

    #[test]
    fn test_sweep_keeps_fresh_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fresh.mp4"), b"data").unwrap();

        let report = sweep_dir(dir.path(), HOUR);

        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 0);
        assert!(dir.path().join("fresh.mp4").exists());
    }

    #[test]
    fn test_sweep_missing_dir() {
        let dir = TempDir::new().unwrap();
        let report = sweep_dir(&dir.path().join("absent"), HOUR);
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn test_sweep_staging_uses_per_dir_ages() {
        let dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            temp_dir: dir.path().join("temp"),
            output_dir: dir.path().join("output"),
        };
        fs::create_dir_all(&paths.temp_dir).unwrap();
        fs::create_dir_all(&paths.output_dir).unwrap();
        fs::write(paths.temp_dir.join("in.mp4"), b"in").unwrap();
        fs::write(paths.output_dir.join("out.mp4"), b"out").unwrap();

        let cleanup = CleanupConfig {
            temp_max_age_secs: 0,
            output_max_age_secs: 86_400,
            ..CleanupConfig::default()
        };

        std::thread::sleep(Duration::from_millis(20));
        let (temp, output) = sweep_staging(&paths, &cleanup);

        assert_eq!(temp.removed, 1);
        assert_eq!(output.removed, 0);
        assert!(paths.output_dir.join("out.mp4").exists());
    }

    #[tokio::test]
    async fn test_sweeper_disabled_by_zero_interval() {
        let cleanup = CleanupConfig {
            sweep_interval_secs: 0,
            ..CleanupConfig::default()
        };
        assert!(spawn_sweeper(PathsConfig::default(), cleanup).is_none());
    }

    #[test]
    fn test_dir_stats() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.mp4"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("b.mp4"), vec![0u8; 32]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let stats = dir_stats(dir.path());
        assert_eq!(stats, DirStats { files: 2, bytes: 42 });

        assert_eq!(dir_stats(&dir.path().join("absent")), DirStats::default());
    }
}
