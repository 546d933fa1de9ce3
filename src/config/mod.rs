use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Artifact storage and lifetime
    pub storage: StorageConfig,

    /// External downloader / transcoder settings
    pub tools: ToolsConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind_address: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding produced artifacts (scratch files live in a subdirectory)
    pub dir: PathBuf,

    /// Lifetime of a produced artifact
    pub ttl_secs: u64,

    /// Interval between background reclamation passes
    pub reclaim_interval_secs: u64,

    /// Synthetic lifetime granted to unregistered files found on disk
    pub orphan_expiry_secs: u64,

    /// Delay before re-checking an artifact after it was served
    pub serve_recheck_delay_secs: u64,

    /// Served artifacts expiring within this window are deleted on re-check
    pub serve_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp binary (looked up in PATH when unset)
    pub yt_dlp: Option<PathBuf>,

    /// ffmpeg binary (FFMPEG_PATH, common install locations, then PATH when unset)
    pub ffmpeg: Option<PathBuf>,

    /// Download timeout for most platforms
    pub download_timeout_secs: u64,

    /// Download timeout for platforms that need retries with backoff
    pub extended_download_timeout_secs: u64,

    /// Transcode timeout
    pub transcode_timeout_secs: u64,

    /// Maximum captured stdout/stderr per process, in bytes
    pub output_buffer_bytes: usize,

    /// MP3 bitrate passed to ffmpeg
    pub audio_bitrate: String,

    /// Maximum video height for MP4 artifacts
    pub max_video_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Maximum concurrent pipeline runs (0 = unbounded)
    pub max_concurrent_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("temp"),
            ttl_secs: 30 * 60,
            reclaim_interval_secs: 5 * 60,
            orphan_expiry_secs: 24 * 60 * 60,
            serve_recheck_delay_secs: 10,
            serve_grace_secs: 5 * 60,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: None,
            ffmpeg: None,
            download_timeout_secs: 5 * 60,
            extended_download_timeout_secs: 10 * 60,
            transcode_timeout_secs: 5 * 60,
            output_buffer_bytes: 10 * 1024 * 1024,
            audio_bitrate: "192k".to_string(),
            max_video_height: 720,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
        }
    }
}

impl StorageConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn orphan_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.orphan_expiry_secs as i64)
    }

    pub fn serve_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.serve_grace_secs as i64)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn serve_recheck_delay(&self) -> Duration {
        Duration::from_secs(self.serve_recheck_delay_secs)
    }
}

impl ToolsConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn extended_download_timeout(&self) -> Duration {
        Duration::from_secs(self.extended_download_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            tracing::info!(path = %config_path.display(), "Wrote default configuration");
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("clipcache.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("clipcache").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.ttl_secs == 0 {
            anyhow::bail!("storage.ttl_secs must be greater than zero");
        }
        if self.storage.reclaim_interval_secs == 0 {
            anyhow::bail!("storage.reclaim_interval_secs must be greater than zero");
        }
        if self.storage.orphan_expiry_secs == 0 {
            anyhow::bail!("storage.orphan_expiry_secs must be greater than zero");
        }
        if self.tools.download_timeout_secs == 0
            || self.tools.extended_download_timeout_secs == 0
            || self.tools.transcode_timeout_secs == 0
        {
            anyhow::bail!("tool timeouts must be greater than zero");
        }
        if self.tools.output_buffer_bytes == 0 {
            anyhow::bail!("tools.output_buffer_bytes must be greater than zero");
        }
        if self.tools.max_video_height == 0 {
            anyhow::bail!("tools.max_video_height must be greater than zero");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Bind Address: {}", self.server.bind_address);
        println!("  Storage Dir: {}", self.storage.dir.display());
        println!("  Artifact TTL: {}", crate::utils::format_duration(self.storage.ttl_secs as f64));
        println!(
            "  Reclaim Interval: {}",
            crate::utils::format_duration(self.storage.reclaim_interval_secs as f64)
        );
        println!(
            "  Download Timeout: {} (extended {})",
            crate::utils::format_duration(self.tools.download_timeout_secs as f64),
            crate::utils::format_duration(self.tools.extended_download_timeout_secs as f64)
        );
        println!(
            "  Transcode Timeout: {}",
            crate::utils::format_duration(self.tools.transcode_timeout_secs as f64)
        );
        if let Some(path) = &self.tools.yt_dlp {
            println!("  yt-dlp: {}", path.display());
        }
        if let Some(path) = &self.tools.ffmpeg {
            println!("  ffmpeg: {}", path.display());
        }
        println!("  Max Concurrent Jobs: {}", self.app.max_concurrent_jobs);
    }
}
