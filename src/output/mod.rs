use anyhow::Result;
use console::style;
use serde_json::json;
use std::path::Path;

use crate::cli::OutputFormat;
use crate::pipeline::ArtifactHandle;
use crate::utils;

/// Render a conversion result for the terminal
pub fn format_handle(handle: &ArtifactHandle, path: &Path, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_as_text(handle, path)),
        OutputFormat::Json => format_as_json(handle, path),
    }
}

fn format_as_text(handle: &ArtifactHandle, path: &Path) -> String {
    let status = if handle.cached {
        style("cached").yellow()
    } else {
        style("converted").green()
    };

    [
        format!("{} {}", style("✓").green().bold(), style(&handle.filename).bold()),
        format!("  Status:   {}", status),
        format!("  Size:     {}", utils::format_file_size(handle.size_bytes)),
        format!("  Path:     {}", path.display()),
        format!("  Expires:  {}", handle.expires_at.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("  Download: {}", handle.download_path()),
    ]
    .join("\n")
}

fn format_as_json(handle: &ArtifactHandle, path: &Path) -> Result<String> {
    let value = json!({
        "filename": handle.filename,
        "path": path,
        "fileSize": handle.size_bytes,
        "createdAt": handle.created_at,
        "expiresAt": handle.expires_at,
        "cached": handle.cached,
        "downloadUrl": handle.download_path(),
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Print a conversion result to stdout
pub fn print_to_console(handle: &ArtifactHandle, path: &Path, format: OutputFormat) -> Result<()> {
    println!("{}", format_handle(handle, path, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn handle() -> ArtifactHandle {
        let now = Utc::now();
        ArtifactHandle {
            filename: "abc_1_def.mp3".to_string(),
            size_bytes: 1536,
            created_at: now,
            expires_at: now + Duration::minutes(30),
            cached: false,
        }
    }

    #[test]
    fn test_text_output() {
        console::set_colors_enabled(false);
        let path = Path::new("temp/abc_1_def.mp3");
        let text = format_handle(&handle(), path, OutputFormat::Text).unwrap();

        assert!(text.contains("abc_1_def.mp3"));
        assert!(text.contains("1.5 KB"));
        assert!(text.contains("converted"));
        assert!(text.contains("/api/download/abc_1_def.mp3"));
    }

    #[test]
    fn test_json_output() {
        let path = Path::new("temp/abc_1_def.mp3");
        let text = format_handle(&handle(), path, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["fileSize"], 1536);
        assert_eq!(value["cached"], false);
        assert_eq!(value["path"], "temp/abc_1_def.mp3");
    }
}
