//! clipcache - convert videos from supported platforms into short-lived MP3/MP4 downloads
//!
//! Source URLs are fetched with yt-dlp, transcoded with ffmpeg, and the result is
//! kept in a directory-backed store for a fixed time window. Repeated requests for
//! the same URL are served from that store until the artifact expires and a
//! background reclaimer deletes it.

pub mod cli;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod platforms;
pub mod process;
pub mod reclaimer;
pub mod registry;
pub mod server;
pub mod store;
pub mod tools;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use pipeline::{AcquisitionPipeline, ArtifactHandle};
pub use platforms::{ArtifactKind, Platform};
pub use process::{ProcessError, ProcessRunner, ProcessSpec};
pub use reclaimer::{ReclaimReport, Reclaimer};
pub use registry::{ArtifactRecord, ArtifactRegistry, RegistryStats};
pub use store::ArtifactStore;

/// Result type used throughout the library
pub type Result<T, E = AcquireError> = std::result::Result<T, E>;

/// Errors surfaced by an acquisition run
#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    #[error("Unsupported URL: {0}")]
    Validation(String),

    #[error("Download failed: {0}")]
    DownloadFailed(#[source] ProcessError),

    #[error("Downloader reported success but no file with prefix {base} was found")]
    OutputMissing { base: String },

    #[error("Transcode failed: {0}")]
    TranscodeFailed(#[source] ProcessError),

    #[error("Transcoder produced an empty or missing file: {filename}")]
    EmptyArtifact { filename: String },

    #[error("Storage operation failed ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        AcquireError::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            AcquireError::DownloadFailed(e) | AcquireError::TranscodeFailed(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AcquireError::Validation(_) => "validation_error",
            AcquireError::DownloadFailed(e) if e.is_timeout() => "download_timeout",
            AcquireError::DownloadFailed(_) => "download_failed",
            AcquireError::OutputMissing { .. } => "output_missing",
            AcquireError::TranscodeFailed(e) if e.is_timeout() => "transcode_timeout",
            AcquireError::TranscodeFailed(_) => "transcode_failed",
            AcquireError::EmptyArtifact { .. } => "empty_artifact",
            AcquireError::Storage { .. } => "storage_error",
        }
    }

    /// Message suitable for showing to the person who submitted the URL
    pub fn user_message(&self) -> String {
        match self {
            AcquireError::Validation(msg) => msg.clone(),
            AcquireError::DownloadFailed(e) if e.is_timeout() => {
                "Download timed out, please retry later".to_string()
            }
            AcquireError::DownloadFailed(e) => format!("Video download failed: {e}"),
            AcquireError::OutputMissing { .. } => {
                "Download finished but no output file was found".to_string()
            }
            AcquireError::TranscodeFailed(e) if e.is_timeout() => {
                "Transcoding timed out, please retry later".to_string()
            }
            AcquireError::TranscodeFailed(e) => format!("Transcoding failed: {e}"),
            AcquireError::EmptyArtifact { .. } => "The generated file is empty".to_string(),
            AcquireError::Storage { .. } => "Internal storage error".to_string(),
        }
    }
}
