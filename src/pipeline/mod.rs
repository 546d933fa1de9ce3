use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::Url;

use crate::platforms::{ArtifactKind, Platform};
use crate::registry::{ArtifactRecord, ArtifactRegistry};
use crate::store::ScratchGuard;
use crate::tools::{DownloadJob, Downloader, TranscodeJob, Transcoder};
use crate::{utils, AcquireError, Result};

/// Reference to a produced (or cached) artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True when served from the registry without running any tool
    pub cached: bool,
}

impl ArtifactHandle {
    fn from_record(record: &ArtifactRecord, cached: bool) -> Self {
        Self {
            filename: record.filename.clone(),
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            expires_at: record.expires_at,
            cached,
        }
    }

    /// Path of the serving endpoint for this artifact
    pub fn download_path(&self) -> String {
        download_path(&self.filename)
    }
}

pub fn download_path(filename: &str) -> String {
    format!("/api/download/{}", urlencoding::encode(filename))
}

/// Turns a source URL into a registered artifact: dedup check, download,
/// transcode, validate, register.
///
/// Concurrent requests for the same unseen URL are not coalesced; each runs
/// the full pipeline and produces its own artifact.
pub struct AcquisitionPipeline {
    registry: Arc<ArtifactRegistry>,
    downloader: Arc<dyn Downloader>,
    transcoder: Arc<dyn Transcoder>,
    limiter: Option<Arc<Semaphore>>,
}

impl AcquisitionPipeline {
    pub fn new(
        registry: Arc<ArtifactRegistry>,
        downloader: Arc<dyn Downloader>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            registry,
            downloader,
            transcoder,
            limiter: None,
        }
    }

    /// Bound the number of concurrent pipeline runs. Cache hits never wait.
    pub fn with_max_concurrent(mut self, max_jobs: usize) -> Self {
        self.limiter = (max_jobs > 0).then(|| Arc::new(Semaphore::new(max_jobs)));
        self
    }

    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.registry
    }

    pub async fn acquire(&self, source_url: &str, kind: ArtifactKind) -> Result<ArtifactHandle> {
        if let Some(record) = self.registry.lookup(source_url, kind).await {
            tracing::info!(url = %source_url, filename = %record.filename, "Cache hit");
            return Ok(ArtifactHandle::from_record(&record, true));
        }

        let _permit = match &self.limiter {
            Some(limiter) => limiter.clone().acquire_owned().await.ok(),
            None => None,
        };

        let platform = Url::parse(source_url)
            .ok()
            .and_then(|u| u.host_str().and_then(Platform::from_host));

        tracing::info!(
            url = %source_url,
            platform = ?platform,
            kind = %kind,
            "Starting acquisition"
        );
        let started = std::time::Instant::now();

        let scratch = ScratchGuard::new(self.registry.store(), utils::generate_scratch_base());
        let result = self.run_stages(source_url, kind, platform, &scratch).await;
        scratch.cleanup().await;

        match &result {
            Ok(handle) => tracing::info!(
                url = %source_url,
                filename = %handle.filename,
                size = %utils::format_file_size(handle.size_bytes),
                elapsed = %utils::format_duration(started.elapsed().as_secs_f64()),
                "Acquisition complete"
            ),
            Err(e) => tracing::error!(url = %source_url, error = %e, "Acquisition failed"),
        }

        result
    }

    async fn run_stages(
        &self,
        source_url: &str,
        kind: ArtifactKind,
        platform: Option<Platform>,
        scratch: &ScratchGuard,
    ) -> Result<ArtifactHandle> {
        let store = self.registry.store();

        let job = DownloadJob {
            url: source_url.to_string(),
            platform,
            kind,
            scratch_dir: store.scratch_dir(),
            base: scratch.base().to_string(),
        };
        self.downloader
            .download(&job)
            .await
            .map_err(AcquireError::DownloadFailed)?;

        let input = store
            .find_scratch(scratch.base())
            .await?
            .ok_or_else(|| AcquireError::OutputMissing {
                base: scratch.base().to_string(),
            })?;
        tracing::debug!(path = %input.display(), "Download complete");

        let filename = utils::artifact_filename(source_url, kind.extension());
        let job = TranscodeJob {
            input,
            output: store.path_for(&filename),
            kind,
        };
        if let Err(e) = self.transcoder.transcode(&job).await {
            self.discard(&filename).await;
            return Err(AcquireError::TranscodeFailed(e));
        }

        let size_bytes = match store.size_of(&filename).await? {
            Some(size) if size > 0 => size,
            _ => {
                self.discard(&filename).await;
                return Err(AcquireError::EmptyArtifact { filename });
            }
        };

        let record = ArtifactRecord::new(
            filename,
            source_url,
            kind,
            size_bytes,
            Utc::now(),
            self.registry.ttl(),
        );
        let handle = ArtifactHandle::from_record(&record, false);
        self.registry.insert(record).await;

        Ok(handle)
    }

    /// Remove an unregistered output so it cannot be served as an orphan
    async fn discard(&self, filename: &str) {
        if let Err(e) = self.registry.store().remove(filename).await {
            tracing::warn!(filename = %filename, error = %e, "Failed to remove rejected output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessError;
    use crate::store::ArtifactStore;
    use crate::tools::{MockDownloader, MockTranscoder};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const URL: &str = "https://example.com/v/abc";

    async fn registry() -> (Arc<ArtifactRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        (Arc::new(ArtifactRegistry::new(store, chrono::Duration::minutes(30))), dir)
    }

    fn writing_downloader(times: usize) -> MockDownloader {
        let mut downloader = MockDownloader::new();
        downloader.expect_download().times(times).returning(|job| {
            std::fs::write(job.scratch_dir.join(format!("{}.webm", job.base)), b"media").unwrap();
            Ok(())
        });
        downloader
    }

    fn writing_transcoder(times: usize, size: usize) -> MockTranscoder {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(times).returning(move |job| {
            std::fs::write(&job.output, vec![7u8; size]).unwrap();
            Ok(())
        });
        transcoder
    }

    fn scratch_is_empty(registry: &ArtifactRegistry) -> bool {
        std::fs::read_dir(registry.store().scratch_dir()).unwrap().next().is_none()
    }

    fn pipeline(
        registry: &Arc<ArtifactRegistry>,
        downloader: impl Downloader + 'static,
        transcoder: impl Transcoder + 'static,
    ) -> AcquisitionPipeline {
        AcquisitionPipeline::new(registry.clone(), Arc::new(downloader), Arc::new(transcoder))
    }

    #[tokio::test]
    async fn test_acquire_registers_artifact_and_removes_scratch() {
        let (registry, _dir) = registry().await;
        let pipeline = pipeline(&registry, writing_downloader(1), writing_transcoder(1, 50_000));

        let handle = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap();

        assert!(!handle.cached);
        assert!(handle.filename.ends_with(".mp3"));
        let record = registry.lookup_by_filename(&handle.filename).await.unwrap();
        assert_eq!(record.size_bytes, 50_000);
        assert_eq!(record.source_url, URL);
        assert_eq!(record.expires_at - record.created_at, chrono::Duration::minutes(30));
        assert_eq!(registry.len().await, 1);
        assert!(scratch_is_empty(&registry));
        assert_eq!(handle.download_path(), format!("/api/download/{}", handle.filename));
    }

    #[tokio::test]
    async fn test_second_acquire_is_cache_hit_without_tool_runs() {
        let (registry, _dir) = registry().await;
        // times(1): a second invocation would panic the mock
        let pipeline = pipeline(&registry, writing_downloader(1), writing_transcoder(1, 10));

        let first = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap();
        let second = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap();

        assert_eq!(first.filename, second.filename);
        assert!(second.cached);
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn test_missing_file_triggers_fresh_run() {
        let (registry, _dir) = registry().await;
        let pipeline = pipeline(&registry, writing_downloader(2), writing_transcoder(2, 10));

        let first = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap();
        std::fs::remove_file(registry.store().path_for(&first.filename)).unwrap();

        let second = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap();
        assert_ne!(first.filename, second.filename);
        assert!(!second.cached);
        assert!(registry.lookup_by_filename(&first.filename).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_transcode_failure_registers_nothing() {
        let (registry, _dir) = registry().await;
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(1).returning(|job| {
            std::fs::write(&job.output, b"partial").unwrap();
            Err(ProcessError::ProcessFailed {
                program: "ffmpeg".to_string(),
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            })
        });
        let pipeline = pipeline(&registry, writing_downloader(1), transcoder);

        let err = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap_err();

        assert!(matches!(err, AcquireError::TranscodeFailed(_)));
        assert!(registry.is_empty().await);
        assert!(scratch_is_empty(&registry));
        let leftovers: Vec<_> = std::fs::read_dir(registry.store().root())
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_file())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_zero_byte_output_is_rejected() {
        let (registry, _dir) = registry().await;
        let pipeline = pipeline(&registry, writing_downloader(1), writing_transcoder(1, 0));

        let err = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap_err();

        match err {
            AcquireError::EmptyArtifact { filename } => {
                assert!(!registry.store().path_for(&filename).exists());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.is_empty().await);
        assert!(scratch_is_empty(&registry));
    }

    #[tokio::test]
    async fn test_missing_transcoder_output_is_rejected() {
        let (registry, _dir) = registry().await;
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(1).returning(|_| Ok(()));
        let pipeline = pipeline(&registry, writing_downloader(1), transcoder);

        let err = pipeline.acquire(URL, ArtifactKind::Video).await.unwrap_err();
        assert!(matches!(err, AcquireError::EmptyArtifact { .. }));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_download_without_output_is_output_missing() {
        let (registry, _dir) = registry().await;
        let mut downloader = MockDownloader::new();
        downloader.expect_download().times(1).returning(|_| Ok(()));
        let pipeline = pipeline(&registry, downloader, writing_transcoder(0, 10));

        let err = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap_err();
        assert!(matches!(err, AcquireError::OutputMissing { .. }));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_download_timeout_is_reported_as_timeout() {
        let (registry, _dir) = registry().await;
        let mut downloader = MockDownloader::new();
        downloader.expect_download().times(1).returning(|job| {
            // Interrupted downloads leave fragments behind
            std::fs::write(job.scratch_dir.join(format!("{}.webm.part", job.base)), b"x").unwrap();
            Err(ProcessError::Timeout {
                program: "yt-dlp".to_string(),
                timeout: Duration::from_secs(300),
            })
        });
        let pipeline = pipeline(&registry, downloader, writing_transcoder(0, 10));

        let err = pipeline.acquire(URL, ArtifactKind::Audio).await.unwrap_err();
        assert!(matches!(err, AcquireError::DownloadFailed(_)));
        assert!(err.is_timeout());
        assert!(registry.is_empty().await);
        assert!(scratch_is_empty(&registry));
    }

    #[tokio::test]
    async fn test_download_job_carries_platform() {
        let (registry, _dir) = registry().await;
        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|job| job.platform == Some(Platform::Youtube) && job.kind == ArtifactKind::Video)
            .times(1)
            .returning(|job| {
                let scratch = job.scratch_dir.join(format!("{}.mkv", job.base));
                std::fs::write(scratch, b"media").unwrap();
                Ok(())
            });
        let pipeline = pipeline(&registry, downloader, writing_transcoder(1, 10));

        let handle = pipeline
            .acquire("https://youtu.be/dQw4w9WgXcQ", ArtifactKind::Video)
            .await
            .unwrap();
        assert!(handle.filename.ends_with(".mp4"));
    }

    struct BarrierDownloader {
        barrier: tokio::sync::Barrier,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for BarrierDownloader {
        async fn download(&self, job: &DownloadJob) -> std::result::Result<(), ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.barrier.wait().await;
            std::fs::write(job.scratch_dir.join(format!("{}.m4a", job.base)), b"media").unwrap();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "barrier"
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_produce_distinct_artifacts() {
        let (registry, _dir) = registry().await;
        let downloader = Arc::new(BarrierDownloader {
            barrier: tokio::sync::Barrier::new(2),
            calls: AtomicUsize::new(0),
        });
        let pipeline = AcquisitionPipeline::new(
            registry.clone(),
            downloader.clone(),
            Arc::new(writing_transcoder(2, 10)),
        );

        let (a, b) = tokio::join!(
            pipeline.acquire(URL, ArtifactKind::Audio),
            pipeline.acquire(URL, ArtifactKind::Audio)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
        assert_ne!(a.filename, b.filename);
        let records = registry.all().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source_url == URL));
    }

    #[tokio::test]
    async fn test_concurrency_limit_still_completes_runs() {
        let (registry, _dir) = registry().await;
        let pipeline = pipeline(&registry, writing_downloader(2), writing_transcoder(2, 10))
            .with_max_concurrent(1);

        let (a, b) = tokio::join!(
            pipeline.acquire(URL, ArtifactKind::Audio),
            pipeline.acquire("https://example.com/v/other", ArtifactKind::Audio)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(registry.len().await, 2);
    }
}
