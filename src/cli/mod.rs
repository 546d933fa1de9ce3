use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::platforms::ArtifactKind;

#[derive(Parser)]
#[command(
    name = "clipcache",
    about = "Convert Bilibili, YouTube, Douyin and Xiaohongshu videos into short-lived MP3/MP4 downloads",
    version,
    long_about = "Downloads a video with yt-dlp, transcodes it with ffmpeg and keeps the result in a local store for a limited time. Run `serve` for the HTTP API or `convert` for a one-off conversion."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./clipcache.yaml or the user config directory)
    #[arg(short, long, global = true, value_name = "FILE", env = "CLIPCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server and the background reclaimer
    Serve {
        /// Address to bind (overrides server.bind_address)
        #[arg(short, long, value_name = "ADDR", env = "CLIPCACHE_BIND")]
        bind: Option<SocketAddr>,

        /// Artifact directory (overrides storage.dir)
        #[arg(long, value_name = "DIR", env = "CLIPCACHE_STORAGE_DIR")]
        storage_dir: Option<PathBuf>,
    },

    /// Convert a single URL and print where the artifact was stored
    Convert {
        /// Video page URL
        #[arg(value_name = "URL")]
        url: String,

        /// Artifact format
        #[arg(short, long, value_enum, default_value = "mp3")]
        format: ArtifactKind,

        /// Result format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Write or show the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List supported platforms
    Platforms,

    /// Check that yt-dlp and ffmpeg can be executed
    Doctor,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// JSON object
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_convert_defaults() {
        let cli = Cli::try_parse_from(["clipcache", "convert", "https://b23.tv/abc"]).unwrap();
        match cli.command {
            Commands::Convert { url, format, output } => {
                assert_eq!(url, "https://b23.tv/abc");
                assert_eq!(format, ArtifactKind::Audio);
                assert_eq!(output, OutputFormat::Text);
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_convert_video_json() {
        let cli = Cli::try_parse_from([
            "clipcache",
            "convert",
            "https://youtu.be/x",
            "--format",
            "mp4",
            "--output",
            "json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Convert { format: ArtifactKind::Video, output: OutputFormat::Json, .. }
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["clipcache", "serve", "--bind", "0.0.0.0:8080", "--log-json"])
                .unwrap();
        assert!(cli.log_json);
        match cli.command {
            Commands::Serve { bind, .. } => assert_eq!(bind.unwrap().port(), 8080),
            _ => panic!("expected serve"),
        }
    }
}
