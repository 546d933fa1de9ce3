use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AcquireError, Result};

/// Kind of artifact produced by the transcoder
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum ArtifactKind {
    /// MP3 audio track
    #[default]
    #[serde(rename = "mp3")]
    #[value(name = "mp3")]
    Audio,
    /// MP4 video capped at 720p
    #[serde(rename = "mp4")]
    #[value(name = "mp4")]
    Video,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "mp3",
            ArtifactKind::Video => "mp4",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(ArtifactKind::Audio),
            "mp4" => Some(ArtifactKind::Video),
            _ => None,
        }
    }

    /// Derive the kind from a stored filename's extension
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio/mpeg",
            ArtifactKind::Video => "video/mp4",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Video platforms whose URLs are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bilibili,
    Youtube,
    Douyin,
    Xiaohongshu,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Bilibili,
        Platform::Youtube,
        Platform::Douyin,
        Platform::Xiaohongshu,
    ];

    /// Match a hostname against the supported platforms
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.to_lowercase();
        let is = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        if is("bilibili.com") || host == "b23.tv" {
            Some(Platform::Bilibili)
        } else if is("youtube.com") || host == "youtu.be" {
            Some(Platform::Youtube)
        } else if is("douyin.com") || is("iesdouyin.com") {
            Some(Platform::Douyin)
        } else if is("xiaohongshu.com") || host == "xhslink.com" {
            Some(Platform::Xiaohongshu)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Bilibili => "Bilibili",
            Platform::Youtube => "YouTube",
            Platform::Douyin => "Douyin",
            Platform::Xiaohongshu => "Xiaohongshu",
        }
    }

    pub fn hosts(&self) -> &'static str {
        match self {
            Platform::Bilibili => "bilibili.com, b23.tv",
            Platform::Youtube => "youtube.com, youtu.be",
            Platform::Douyin => "douyin.com, iesdouyin.com",
            Platform::Xiaohongshu => "xiaohongshu.com, xhslink.com",
        }
    }

    /// Platforms that throttle or reject aggressively get retries with backoff
    /// and the extended download timeout.
    pub fn needs_backoff(&self) -> bool {
        matches!(self, Platform::Youtube | Platform::Douyin)
    }

    /// yt-dlp `-f` selector for the requested artifact
    pub fn format_selector(&self, kind: ArtifactKind) -> &'static str {
        match (self, kind) {
            (_, ArtifactKind::Audio) => "bestaudio/best",
            // Single-stream platforms rarely expose separate audio/video tracks
            (Platform::Douyin | Platform::Xiaohongshu, ArtifactKind::Video) => {
                "best[height<=720]/best"
            }
            (_, ArtifactKind::Video) => "bestvideo[height<=720]+bestaudio/best[height<=720]/best",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Validate a raw URL and identify its platform.
///
/// This is the only gate; the pipeline does not re-validate.
pub fn validate_url(raw: &str) -> Result<(Url, Platform)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AcquireError::Validation("Please provide a video URL".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|_| AcquireError::Validation(format!("Invalid URL format: {trimmed}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AcquireError::Validation(
            "URL must use HTTP or HTTPS protocol".to_string(),
        ));
    }

    let platform = parsed
        .host_str()
        .and_then(Platform::from_host)
        .ok_or_else(|| {
            AcquireError::Validation(format!("Unsupported platform: {trimmed}"))
        })?;

    Ok((parsed, platform))
}
