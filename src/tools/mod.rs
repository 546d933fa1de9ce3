use async_trait::async_trait;
use std::path::PathBuf;

pub mod ffmpeg;
pub mod ytdlp;

pub use ffmpeg::FfmpegTranscoder;
pub use ytdlp::YtDlpDownloader;

use crate::platforms::{ArtifactKind, Platform};
use crate::process::ProcessError;

/// One download into the scratch directory
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Source URL, passed to the tool as a single argument
    pub url: String,

    /// Platform the URL belongs to, if recognised
    pub platform: Option<Platform>,

    /// Artifact the download will be transcoded into
    pub kind: ArtifactKind,

    /// Directory the tool writes into
    pub scratch_dir: PathBuf,

    /// The produced file must be named `<base>.<ext>`
    pub base: String,
}

/// One conversion from a scratch file to a final artifact
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: ArtifactKind,
}

/// Fetches a source URL into the scratch directory
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, job: &DownloadJob) -> Result<(), ProcessError>;

    /// Get the name of this tool
    fn name(&self) -> &'static str;
}

/// Converts a downloaded file into the final artifact encoding
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, job: &TranscodeJob) -> Result<(), ProcessError>;

    /// Get the name of this tool
    fn name(&self) -> &'static str;
}
