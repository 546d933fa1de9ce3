use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::pipeline::{download_path, ArtifactHandle};
use crate::platforms::{self, ArtifactKind};
use crate::registry::ArtifactRegistry;
use crate::utils;

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub url: String,
    #[serde(default)]
    pub format: ArtifactKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    pub download_url: String,
    pub filename: String,
    pub file_size: u64,
    pub expires_at: DateTime<Utc>,
    pub cached: bool,
}

impl From<ArtifactHandle> for ConvertResponse {
    fn from(handle: ArtifactHandle) -> Self {
        Self {
            success: true,
            download_url: handle.download_path(),
            filename: handle.filename,
            file_size: handle.size_bytes,
            expires_at: handle.expires_at,
            cached: handle.cached,
        }
    }
}

/// POST /api/convert
///
/// The pipeline runs on its own task: if the client goes away the artifact is
/// still produced and registered.
pub async fn convert(
    State(state): State<AppState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;

    let (url, platform) = platforms::validate_url(&request.url)?;
    tracing::info!(
        url = %url,
        platform = %platform,
        format = %request.format,
        "Conversion requested"
    );

    let pipeline = state.pipeline.clone();
    let source_url = request.url.trim().to_string();
    let kind = request.format;
    let handle = tokio::spawn(async move { pipeline.acquire(&source_url, kind).await })
        .await
        .map_err(|e| ApiError::Internal(format!("Conversion task failed: {e}")))??;

    Ok(Json(handle.into()))
}

/// GET /api/download/:filename
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !utils::is_safe_filename(&filename) {
        return Err(ApiError::BadRequest("Invalid filename".to_string()));
    }

    let kind = ArtifactKind::from_filename(&filename)
        .ok_or_else(|| ApiError::BadRequest("Unsupported file type".to_string()))?;

    let store = state.registry.store();
    let now = Utc::now();
    let file = store.stat(&filename).await?;
    let record = state.registry.lookup_by_filename(&filename).await;

    let expires_at = match (&record, file) {
        (Some(record), _) if record.is_expired_at(now) => {
            if let Err(e) = state.registry.purge(&filename).await {
                tracing::warn!(
                    filename = %filename,
                    error = %e,
                    "Failed to delete expired artifact"
                );
            }
            return Err(ApiError::Gone("File has expired".to_string()));
        }
        (Some(_), None) => {
            state.registry.remove(&filename).await;
            return Err(ApiError::NotFound("File not found or expired".to_string()));
        }
        (Some(record), Some(_)) => record.expires_at,
        // Present on disk but unknown to this process, e.g. after a restart
        (None, Some(file)) => {
            let expires_at = file.modified + state.serving.orphan_expiry;
            if expires_at <= now {
                if let Err(e) = store.remove(&filename).await {
                    tracing::warn!(
                        filename = %filename,
                        error = %e,
                        "Failed to delete stale orphan"
                    );
                }
                return Err(ApiError::Gone("File has expired".to_string()));
            }
            expires_at
        }
        (None, None) => {
            return Err(ApiError::NotFound("File not found or expired".to_string()));
        }
    };

    let bytes = store.read(&filename).await?;
    tracing::info!(
        filename = %filename,
        size = bytes.len(),
        registered = record.is_some(),
        "Serving artifact"
    );

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, kind.mime_type())
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-file-expires", expires_at.to_rfc3339())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if record.is_some() {
        schedule_recheck(state.registry.clone(), filename, &state.serving);
    }

    Ok(response)
}

/// After serving, delete the artifact if it is about to expire anyway
fn schedule_recheck(
    registry: Arc<ArtifactRegistry>,
    filename: String,
    policy: &super::ServingPolicy,
) {
    let delay = policy.recheck_delay;
    let grace = policy.grace;

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let Some(record) = registry.lookup_by_filename(&filename).await else {
            return;
        };
        if record.expires_at - Utc::now() < grace {
            tracing::debug!(filename = %filename, "Artifact close to expiry after serving");
            if let Err(e) = registry.purge(&filename).await {
                tracing::warn!(filename = %filename, error = %e, "Delayed deletion failed");
            }
        }
    });
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_files: usize,
    pub total_size: u64,
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: f64,
    pub expired_files: usize,
}

/// GET /api/storage/stats
pub async fn storage_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.registry.stats().await;

    Json(json!({
        "success": true,
        "stats": StorageStats {
            total_files: stats.count,
            total_size: stats.total_bytes,
            total_size_mb: utils::size_in_mb(stats.total_bytes),
            expired_files: stats.expired_count,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub filename: String,
    pub original_url: String,
    pub format: ArtifactKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub size: u64,
    pub expired: bool,
    pub time_left_seconds: i64,
    pub download_url: String,
}

/// GET /api/storage/records
pub async fn storage_records(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let mut records: Vec<RecordView> = state
        .registry
        .all()
        .await
        .into_iter()
        .map(|r| RecordView {
            download_url: download_path(&r.filename),
            expired: r.is_expired_at(now),
            time_left_seconds: r.seconds_remaining(now),
            filename: r.filename,
            original_url: r.source_url,
            format: r.kind,
            created_at: r.created_at,
            expires_at: r.expires_at,
            size: r.size_bytes,
        })
        .collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Json(json!({ "success": true, "records": records }))
}

/// POST /api/storage/cleanup
pub async fn storage_cleanup(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.reclaimer.run_once().await;
    let remaining = state.registry.len().await;

    Json(json!({
        "success": true,
        "message": "Cleanup complete",
        "removed": report.removed,
        "orphansRemoved": report.orphans_removed,
        "failed": report.failed,
        "remainingFiles": remaining,
    }))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
