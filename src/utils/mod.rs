use std::path::{Path, PathBuf};

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Size in megabytes rounded to two decimals
pub fn size_in_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Unique base name for a scratch download: `<millis>_<random>`
pub fn generate_scratch_base() -> String {
    format!("{}_{}", chrono::Utc::now().timestamp_millis(), random_suffix())
}

/// Final artifact filename: `<md5(url)>_<millis>_<random>.<ext>`
///
/// The URL hash keeps the file traceable to its source; the timestamp and
/// suffix keep concurrent runs for the same URL from colliding.
pub fn artifact_filename(source_url: &str, extension: &str) -> String {
    let hash = md5::compute(source_url.as_bytes());
    format!(
        "{:x}_{}_{}.{}",
        hash,
        chrono::Utc::now().timestamp_millis(),
        random_suffix(),
        extension
    )
}

/// A filename is servable only if it cannot escape the store directory
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}

/// Resolve the yt-dlp binary: configured path, then PATH
pub fn resolve_yt_dlp(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    which::which("yt-dlp").unwrap_or_else(|_| PathBuf::from("yt-dlp"))
}

/// Resolve the ffmpeg binary: configured path, `FFMPEG_PATH`, common
/// Homebrew locations, then PATH
pub fn resolve_ffmpeg(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    if let Some(path) = std::env::var_os("FFMPEG_PATH").map(PathBuf::from) {
        if path.exists() {
            return path;
        }
    }

    for candidate in ["/opt/homebrew/bin/ffmpeg", "/usr/local/bin/ffmpeg"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return path;
        }
    }

    which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from("ffmpeg"))
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp: &Path, ffmpeg: &Path) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!(
            "yt-dlp ({}) - install with `pip install yt-dlp` or from https://github.com/yt-dlp/yt-dlp/releases",
            yt_dlp.display()
        ));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!(
            "ffmpeg ({}) - install with `brew install ffmpeg` or `apt install ffmpeg`",
            ffmpeg.display()
        ));
    }

    missing
}

/// Check if a command is available
async fn check_command_available(command: &Path, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
