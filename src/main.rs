use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipcache::server::{self, AppState, ServingPolicy};
use clipcache::tools::{Downloader, FfmpegTranscoder, Transcoder, YtDlpDownloader};
use clipcache::{
    output, platforms, utils, AcquisitionPipeline, ArtifactRegistry, ArtifactStore, Cli, Commands,
    Config, Platform, ProcessRunner, Reclaimer,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Platforms => {
            println!("Supported platforms:");
            for platform in Platform::ALL {
                println!("  • {} ({})", platform.name(), platform.hosts());
            }
            println!("Output formats: mp3 (audio), mp4 (video, up to 720p)");
        }
        Commands::Config { show } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => Config::config_path()?,
            };
            let config = Config::load(Some(path.as_path())).await?;
            if show {
                config.display();
            }
            println!("Configuration file: {}", path.display());
        }
        Commands::Doctor => {
            let config = Config::load(cli.config.as_deref()).await?;
            let yt_dlp = utils::resolve_yt_dlp(config.tools.yt_dlp.as_deref());
            let ffmpeg = utils::resolve_ffmpeg(config.tools.ffmpeg.as_deref());

            let missing = utils::check_dependencies(&yt_dlp, &ffmpeg).await;
            if !missing.is_empty() {
                for dep in &missing {
                    eprintln!("{} {}", style("✗").red().bold(), dep);
                }
                anyhow::bail!("{} required tool(s) unavailable", missing.len());
            }

            println!("{} yt-dlp: {}", style("✓").green().bold(), yt_dlp.display());
            println!("{} ffmpeg: {}", style("✓").green().bold(), ffmpeg.display());
        }
        Commands::Convert { url, format, output } => {
            // Reject unsupported URLs before touching config or tools
            platforms::validate_url(&url)?;

            let config = Config::load(cli.config.as_deref()).await?;
            warn_missing_tools(&config).await;

            let store = ArtifactStore::open(&config.storage.dir).await?;
            let registry = Arc::new(ArtifactRegistry::new(store, config.storage.ttl()));
            let pipeline = build_pipeline(&config, registry.clone());

            let progress = (!cli.quiet).then(|| {
                let progress = ProgressBar::new_spinner();
                progress.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg} [{elapsed}]")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                progress.set_message(format!("Converting to {format}..."));
                progress.enable_steady_tick(Duration::from_millis(120));
                progress
            });

            let result = pipeline.acquire(url.trim(), format).await;
            if let Some(progress) = progress {
                progress.finish_and_clear();
            }

            let handle = result.map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;
            let path = registry.store().path_for(&handle.filename);
            output::print_to_console(&handle, &path, output)?;
        }
        Commands::Serve { bind, storage_dir } => {
            let mut config = Config::load(cli.config.as_deref()).await?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(dir) = storage_dir {
                config.storage.dir = dir;
            }
            config.validate()?;
            warn_missing_tools(&config).await;

            serve(config).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "clipcache=debug,tower_http=debug"
    } else {
        "clipcache=info,tower_http=info"
    };

    // Logs go to stderr so `convert --output json` stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

/// Wire the production downloader and transcoder into a pipeline
fn build_pipeline(config: &Config, registry: Arc<ArtifactRegistry>) -> AcquisitionPipeline {
    let runner = ProcessRunner::new(config.tools.output_buffer_bytes);
    let downloader = YtDlpDownloader::new(
        utils::resolve_yt_dlp(config.tools.yt_dlp.as_deref()),
        runner.clone(),
        &config.tools,
    );
    let transcoder = FfmpegTranscoder::new(
        utils::resolve_ffmpeg(config.tools.ffmpeg.as_deref()),
        runner,
        &config.tools,
    );

    tracing::debug!(
        downloader = downloader.name(),
        transcoder = transcoder.name(),
        ffmpeg = %transcoder.ffmpeg_path().display(),
        "Tools configured"
    );

    AcquisitionPipeline::new(registry, Arc::new(downloader), Arc::new(transcoder))
        .with_max_concurrent(config.app.max_concurrent_jobs)
}

/// Missing tools are reported but not fatal; they may appear on PATH later
async fn warn_missing_tools(config: &Config) {
    let yt_dlp = utils::resolve_yt_dlp(config.tools.yt_dlp.as_deref());
    let ffmpeg = utils::resolve_ffmpeg(config.tools.ffmpeg.as_deref());

    let missing = utils::check_dependencies(&yt_dlp, &ffmpeg).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - conversions will fail until the tools are installed)");
    }
}

async fn serve(config: Config) -> Result<()> {
    let store = ArtifactStore::open(&config.storage.dir)
        .await
        .context("Failed to prepare storage directory")?;
    let registry = Arc::new(ArtifactRegistry::new(store, config.storage.ttl()));
    let pipeline = Arc::new(build_pipeline(&config, registry.clone()));

    let reclaimer = Arc::new(Reclaimer::new(registry, config.storage.orphan_expiry()));
    reclaimer.start(config.storage.reclaim_interval()).await;

    tracing::info!(
        storage = %config.storage.dir.display(),
        ttl = %utils::format_duration(config.storage.ttl_secs as f64),
        "Artifact store ready"
    );

    let state = AppState::new(pipeline, reclaimer.clone(), ServingPolicy::from(&config.storage));
    let result = server::start_server(state, config.server.bind_address, shutdown_signal()).await;

    reclaimer.stop().await;
    result.context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
