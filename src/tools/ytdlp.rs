use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use super::{DownloadJob, Downloader};
use crate::config::ToolsConfig;
use crate::platforms::{ArtifactKind, Platform};
use crate::process::{ProcessError, ProcessRunner, ProcessSpec};

/// Downloader backed by the yt-dlp binary
pub struct YtDlpDownloader {
    yt_dlp_path: PathBuf,
    runner: ProcessRunner,
    timeout: Duration,
    extended_timeout: Duration,
}

impl YtDlpDownloader {
    pub fn new(yt_dlp_path: PathBuf, runner: ProcessRunner, tools: &ToolsConfig) -> Self {
        Self {
            yt_dlp_path,
            runner,
            timeout: tools.download_timeout(),
            extended_timeout: tools.extended_download_timeout(),
        }
    }

    /// Timeout for a platform: extended where retries with backoff are used
    pub fn timeout_for(&self, platform: Option<Platform>) -> Duration {
        match platform {
            Some(p) if p.needs_backoff() => self.extended_timeout,
            _ => self.timeout,
        }
    }

    pub fn build_args(job: &DownloadJob) -> Vec<String> {
        let template = job.scratch_dir.join(format!("{}.%(ext)s", job.base));
        let selector = match job.platform {
            Some(platform) => platform.format_selector(job.kind),
            None => match job.kind {
                ArtifactKind::Audio => "bestaudio/best",
                ArtifactKind::Video => "best[height<=720]/best",
            },
        };

        let mut args: Vec<String> = vec![
            "-f".into(),
            selector.into(),
            "--no-playlist".into(),
            "--restrict-filenames".into(),
            "--no-progress".into(),
            "--no-exec".into(),
        ];

        if job.platform.is_some_and(|p| p.needs_backoff()) {
            args.extend([
                String::from("--retries"),
                "10".into(),
                "--fragment-retries".into(),
                "10".into(),
                "--retry-sleep".into(),
                "exp=1:30".into(),
            ]);
        }

        if job.kind == ArtifactKind::Video {
            args.extend([String::from("--merge-output-format"), String::from("mp4")]);
        }

        args.extend([
            "-o".into(),
            template.to_string_lossy().into_owned(),
            // Everything after `--` is a URL, never an option
            "--".into(),
            job.url.clone(),
        ]);

        args
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, job: &DownloadJob) -> Result<(), ProcessError> {
        let timeout = self.timeout_for(job.platform);
        tracing::debug!(
            url = %job.url,
            platform = ?job.platform,
            timeout_secs = timeout.as_secs(),
            "Downloading with yt-dlp"
        );

        let spec = ProcessSpec::new(&self.yt_dlp_path, timeout)
            .args(Self::build_args(job))
            .current_dir(&job.scratch_dir);

        let output = self.runner.run(&spec).await?;
        if !output.stdout.trim().is_empty() {
            tracing::debug!(stdout = %output.stdout.trim(), "yt-dlp output");
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}
