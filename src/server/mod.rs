//! HTTP surface: conversion, artifact download, storage stats and manual reclaim.

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::StorageConfig;
use crate::pipeline::AcquisitionPipeline;
use crate::reclaimer::Reclaimer;
use crate::registry::ArtifactRegistry;

pub mod error;
pub mod routes;

pub use error::ApiError;

/// How the download endpoint treats artifact lifetimes
#[derive(Debug, Clone)]
pub struct ServingPolicy {
    /// Synthetic lifetime for files on disk that the registry does not know
    pub orphan_expiry: chrono::Duration,

    /// Delay before the post-serve expiry re-check
    pub recheck_delay: std::time::Duration,

    /// Artifacts expiring within this window are deleted on re-check
    pub grace: chrono::Duration,
}

impl From<&StorageConfig> for ServingPolicy {
    fn from(storage: &StorageConfig) -> Self {
        Self {
            orphan_expiry: storage.orphan_expiry(),
            recheck_delay: storage.serve_recheck_delay(),
            grace: storage.serve_grace(),
        }
    }
}

/// Shared state handed to every handler (cheap to clone)
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AcquisitionPipeline>,
    pub registry: Arc<ArtifactRegistry>,
    pub reclaimer: Arc<Reclaimer>,
    pub serving: ServingPolicy,
}

impl AppState {
    pub fn new(
        pipeline: Arc<AcquisitionPipeline>,
        reclaimer: Arc<Reclaimer>,
        serving: ServingPolicy,
    ) -> Self {
        Self {
            registry: pipeline.registry().clone(),
            pipeline,
            reclaimer,
            serving,
        }
    }
}

/// Create the router
///
/// # Routes
///
/// - `POST /api/convert` - Convert a video URL (or return the cached artifact)
/// - `GET /api/download/:filename` - Fetch an artifact
/// - `GET /api/storage/stats` - Registry totals
/// - `GET /api/storage/records` - Registered artifacts, newest first
/// - `POST /api/storage/cleanup` - Run a reclamation pass now
/// - `GET /health` - Health check
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/convert", post(routes::convert))
        .route("/api/download/:filename", get(routes::download))
        .route("/api/storage/stats", get(routes::storage_stats))
        .route("/api/storage/records", get(routes::storage_records))
        .route("/api/storage/cleanup", post(routes::storage_cleanup))
        .route("/health", get(routes::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn start_server<F>(
    state: AppState,
    bind_address: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = TcpListener::bind(bind_address).await?;

    tracing::info!(address = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
