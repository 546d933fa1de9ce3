//! Background deletion of expired artifacts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::ArtifactRegistry;

/// Outcome of one reclamation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    /// Expired artifacts deleted (or found already gone)
    pub removed: usize,
    /// Stale unregistered or scratch files deleted
    pub orphans_removed: usize,
    /// Files that could not be deleted; retried next pass
    pub failed: usize,
}

struct RunningTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Deletes expired artifacts on a fixed interval.
///
/// Each pass also sweeps files the registry does not know about (left by a
/// previous process, a one-shot conversion or a crash) once they are older
/// than `orphan_expiry`.
///
/// Construction does not start anything; call [`Reclaimer::start`]. Passes can
/// also be driven directly with [`Reclaimer::run_once_at`].
pub struct Reclaimer {
    registry: Arc<ArtifactRegistry>,
    orphan_expiry: chrono::Duration,
    task: Mutex<Option<RunningTask>>,
}

impl Reclaimer {
    pub fn new(registry: Arc<ArtifactRegistry>, orphan_expiry: chrono::Duration) -> Self {
        Self {
            registry,
            orphan_expiry,
            task: Mutex::new(None),
        }
    }

    pub async fn run_once(&self) -> ReclaimReport {
        Self::reclaim(&self.registry, self.orphan_expiry, Utc::now()).await
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> ReclaimReport {
        Self::reclaim(&self.registry, self.orphan_expiry, now).await
    }

    async fn reclaim(
        registry: &ArtifactRegistry,
        orphan_expiry: chrono::Duration,
        now: DateTime<Utc>,
    ) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        let expired = registry.expired_at(now).await;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Reclaiming expired artifacts");
        }

        for record in expired {
            match registry.purge(&record.filename).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        filename = %record.filename,
                        error = %e,
                        "Failed to delete expired artifact, will retry next pass"
                    );
                }
            }
        }

        Self::sweep_orphans(registry, now - orphan_expiry, &mut report).await;

        if report == ReclaimReport::default() {
            tracing::debug!("Nothing to reclaim");
        } else {
            tracing::info!(
                removed = report.removed,
                orphans_removed = report.orphans_removed,
                failed = report.failed,
                "Reclamation pass finished"
            );
        }
        report
    }

    /// Delete unregistered artifacts and scratch files last modified before `cutoff`
    async fn sweep_orphans(
        registry: &ArtifactRegistry,
        cutoff: DateTime<Utc>,
        report: &mut ReclaimReport,
    ) {
        let store = registry.store();

        match store.list_artifacts().await {
            Ok(files) => {
                for file in files.into_iter().filter(|f| f.modified <= cutoff) {
                    if registry.lookup_by_filename(&file.filename).await.is_some() {
                        continue;
                    }
                    match store.remove(&file.filename).await {
                        Ok(_) => {
                            report.orphans_removed += 1;
                            tracing::info!(
                                filename = %file.filename,
                                "Deleted unregistered artifact"
                            );
                        }
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                filename = %file.filename,
                                error = %e,
                                "Failed to delete orphan"
                            );
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to list artifact directory"),
        }

        match store.list_scratch().await {
            Ok(files) => {
                for file in files.into_iter().filter(|f| f.modified <= cutoff) {
                    match store.remove_scratch(&file.filename).await {
                        Ok(_) => {
                            report.orphans_removed += 1;
                            tracing::info!(filename = %file.filename, "Deleted stale scratch file");
                        }
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                filename = %file.filename,
                                error = %e,
                                "Failed to delete scratch file"
                            );
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to list scratch directory"),
        }
    }

    /// Start the periodic loop. The first pass runs one `interval` from now.
    pub async fn start(&self, interval: Duration) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::warn!("Reclaimer already running");
            return;
        }

        let registry = self.registry.clone();
        let orphan_expiry = self.orphan_expiry;
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::reclaim(&registry, orphan_expiry, Utc::now()).await;
                    }
                    _ = token.cancelled() => {
                        break;
                    }
                }
            }
        });

        tracing::info!(interval_secs = interval.as_secs(), "Reclaimer started");
        *task = Some(RunningTask {
            handle,
            cancel_token,
        });
    }

    /// Stop the periodic loop and wait for an in-flight pass to finish
    pub async fn stop(&self) {
        let Some(running) = self.task.lock().await.take() else {
            return;
        };

        running.cancel_token.cancel();
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Reclaimer task ended abnormally");
        }
        tracing::info!("Reclaimer stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::ArtifactKind;
    use crate::registry::ArtifactRecord;
    use crate::store::ArtifactStore;
    use chrono::Duration as ChronoDuration;

    async fn setup() -> (Arc<ArtifactRegistry>, Reclaimer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let registry = Arc::new(ArtifactRegistry::new(store, ChronoDuration::minutes(30)));
        let reclaimer = Reclaimer::new(registry.clone(), ChronoDuration::hours(24));
        (registry, reclaimer, dir)
    }

    async fn put(registry: &ArtifactRegistry, filename: &str, created_at: DateTime<Utc>) {
        std::fs::write(registry.store().path_for(filename), b"audio").unwrap();
        registry
            .insert(ArtifactRecord::new(
                filename,
                "https://b23.tv/abc",
                ArtifactKind::Audio,
                5,
                created_at,
                registry.ttl(),
            ))
            .await;
    }

    #[tokio::test]
    async fn test_pass_removes_only_expired() {
        let (registry, reclaimer, _dir) = setup().await;
        let now = Utc::now();
        put(&registry, "stale.mp3", now).await;
        put(&registry, "live.mp3", now + ChronoDuration::minutes(20)).await;

        // Past stale.mp3's expiry, before live.mp3's
        let report = reclaimer.run_once_at(now + ChronoDuration::minutes(31)).await;

        assert_eq!(report, ReclaimReport { removed: 1, orphans_removed: 0, failed: 0 });
        assert!(registry.lookup_by_filename("stale.mp3").await.is_none());
        assert!(!registry.store().path_for("stale.mp3").exists());
        assert!(registry.lookup_by_filename("live.mp3").await.is_some());
        assert!(registry.store().path_for("live.mp3").exists());
    }

    #[tokio::test]
    async fn test_already_deleted_file_counts_as_removed() {
        let (registry, reclaimer, _dir) = setup().await;
        let now = Utc::now();
        put(&registry, "gone.mp3", now - ChronoDuration::hours(1)).await;
        std::fs::remove_file(registry.store().path_for("gone.mp3")).unwrap();

        let report = reclaimer.run_once_at(now).await;
        assert_eq!(report.removed, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_record_for_retry() {
        let (registry, reclaimer, _dir) = setup().await;
        let now = Utc::now();
        put(&registry, "ok.mp3", now - ChronoDuration::hours(1)).await;
        registry
            .insert(ArtifactRecord::new(
                "stuck.mp3",
                "https://b23.tv/abc",
                ArtifactKind::Audio,
                5,
                now - ChronoDuration::hours(1),
                registry.ttl(),
            ))
            .await;
        // A directory cannot be removed with remove_file
        std::fs::create_dir(registry.store().path_for("stuck.mp3")).unwrap();

        let report = reclaimer.run_once_at(now).await;
        assert_eq!(report, ReclaimReport { removed: 1, orphans_removed: 0, failed: 1 });
        assert!(registry.lookup_by_filename("stuck.mp3").await.is_some());

        std::fs::remove_dir(registry.store().path_for("stuck.mp3")).unwrap();
        let report = reclaimer.run_once_at(now).await;
        assert_eq!(report, ReclaimReport { removed: 1, orphans_removed: 0, failed: 0 });
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_unregistered_files_are_swept() {
        let (registry, reclaimer, _dir) = setup().await;
        let store = registry.store();
        let three_days_ago = std::time::SystemTime::now() - Duration::from_secs(3 * 24 * 3600);
        let backdate = |path: std::path::PathBuf| {
            filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(three_days_ago))
                .unwrap();
        };

        std::fs::write(store.path_for("stale.mp3"), b"left by a previous run").unwrap();
        backdate(store.path_for("stale.mp3"));
        std::fs::write(store.scratch_dir().join("123_abc.webm.part"), b"x").unwrap();
        backdate(store.scratch_dir().join("123_abc.webm.part"));
        std::fs::write(store.path_for("fresh.mp3"), b"just written").unwrap();
        std::fs::write(store.scratch_dir().join("456_def.webm.part"), b"x").unwrap();

        let report = reclaimer.run_once().await;

        assert_eq!(report, ReclaimReport { removed: 0, orphans_removed: 2, failed: 0 });
        assert!(!store.path_for("stale.mp3").exists());
        assert!(!store.scratch_dir().join("123_abc.webm.part").exists());
        assert!(store.path_for("fresh.mp3").exists());
        assert!(store.scratch_dir().join("456_def.webm.part").exists());
    }

    #[tokio::test]
    async fn test_orphan_sweep_follows_pass_time() {
        let (registry, reclaimer, _dir) = setup().await;
        let now = Utc::now();
        std::fs::write(registry.store().path_for("orphan.mp4"), b"video").unwrap();

        let report = reclaimer.run_once_at(now + ChronoDuration::hours(1)).await;
        assert_eq!(report.orphans_removed, 0);
        assert!(registry.store().path_for("orphan.mp4").exists());

        let report = reclaimer.run_once_at(now + ChronoDuration::hours(25)).await;
        assert_eq!(report.orphans_removed, 1);
        assert!(!registry.store().path_for("orphan.mp4").exists());
    }

    #[tokio::test]
    async fn test_registered_files_are_not_swept_as_orphans() {
        let (registry, reclaimer, _dir) = setup().await;
        let now = Utc::now();
        // Registered long after its file was written, still within its TTL
        put(&registry, "live.mp3", now + ChronoDuration::hours(30)).await;

        let report = reclaimer.run_once_at(now + ChronoDuration::hours(30)).await;

        assert_eq!(report, ReclaimReport::default());
        assert!(registry.store().path_for("live.mp3").exists());
        assert!(registry.lookup_by_filename("live.mp3").await.is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (registry, reclaimer, _dir) = setup().await;
        put(&registry, "old.mp3", Utc::now() - ChronoDuration::hours(1)).await;

        reclaimer.start(Duration::from_millis(50)).await;
        assert!(reclaimer.is_running().await);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !registry.is_empty().await && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registry.is_empty().await);

        reclaimer.stop().await;
        assert!(!reclaimer.is_running().await);
        // Stopping twice is harmless
        reclaimer.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_reclaimer_does_nothing() {
        let (registry, reclaimer, _dir) = setup().await;
        reclaimer.start(Duration::from_millis(20)).await;
        reclaimer.stop().await;

        put(&registry, "old.mp3", Utc::now() - ChronoDuration::hours(1)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.len().await, 1);
    }
}
