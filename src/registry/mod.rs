use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::platforms::ArtifactKind;
use crate::store::ArtifactStore;

/// Bookkeeping for one produced artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Filename inside the store; also the registry key
    pub filename: String,

    /// URL the artifact was produced from
    pub source_url: String,

    /// Output encoding
    pub kind: ArtifactKind,

    /// When the artifact was registered
    pub created_at: DateTime<Utc>,

    /// `created_at + ttl`
    pub expires_at: DateTime<Utc>,

    /// Size of the file at registration time
    pub size_bytes: u64,
}

impl ArtifactRecord {
    pub fn new(
        filename: impl Into<String>,
        source_url: impl Into<String>,
        kind: ArtifactKind,
        size_bytes: u64,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            filename: filename.into(),
            source_url: source_url.into(),
            kind,
            created_at,
            expires_at: created_at + ttl,
            size_bytes,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whole seconds until expiry, never negative
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Aggregate registry figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub count: usize,
    pub total_bytes: u64,
    pub expired_count: usize,
}

/// In-memory index of produced artifacts, scoped to one process lifetime.
///
/// Each operation is atomic on its own; sequences of operations are not.
/// A record is expected to exist exactly as long as its file does.
pub struct ArtifactRegistry {
    store: ArtifactStore,
    ttl: Duration,
    records: RwLock<HashMap<String, ArtifactRecord>>,
}

impl ArtifactRegistry {
    /// `ttl` must be positive.
    pub fn new(store: ArtifactStore, ttl: Duration) -> Self {
        debug_assert!(ttl > Duration::zero(), "artifact TTL must be positive");
        Self {
            store,
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn insert(&self, record: ArtifactRecord) {
        tracing::info!(
            filename = %record.filename,
            size_bytes = record.size_bytes,
            expires_at = %record.expires_at,
            "Registered artifact"
        );
        self.records
            .write()
            .await
            .insert(record.filename.clone(), record);
    }

    /// Find a live artifact for a URL
    pub async fn lookup(&self, source_url: &str, kind: ArtifactKind) -> Option<ArtifactRecord> {
        self.lookup_at(source_url, kind, Utc::now()).await
    }

    /// Find a live artifact for a URL as of `now`.
    ///
    /// Records whose file has disappeared are dropped on the way.
    pub async fn lookup_at(
        &self,
        source_url: &str,
        kind: ArtifactKind,
        now: DateTime<Utc>,
    ) -> Option<ArtifactRecord> {
        let mut candidates: Vec<ArtifactRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.source_url == source_url && r.kind == kind && !r.is_expired_at(now))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for candidate in candidates {
            if self.store.exists(&candidate.filename).await {
                return Some(candidate);
            }

            tracing::warn!(
                filename = %candidate.filename,
                "Registered artifact missing from store, dropping record"
            );
            self.records.write().await.remove(&candidate.filename);
        }

        None
    }

    pub async fn lookup_by_filename(&self, filename: &str) -> Option<ArtifactRecord> {
        self.records.read().await.get(filename).cloned()
    }

    pub async fn remove(&self, filename: &str) -> Option<ArtifactRecord> {
        self.records.write().await.remove(filename)
    }

    /// Delete an artifact's file, then its record.
    ///
    /// A file that is already gone counts as deleted. If unlinking fails the
    /// record stays registered so the next reclamation pass retries it.
    pub async fn purge(&self, filename: &str) -> std::io::Result<()> {
        let existed = self.store.remove(filename).await?;
        self.records.write().await.remove(filename);
        tracing::info!(filename = %filename, file_existed = existed, "Deleted artifact");
        Ok(())
    }

    /// Every registered record, expired or not
    pub async fn all(&self) -> Vec<ArtifactRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Records that have not expired yet
    pub async fn all_live(&self) -> Vec<ArtifactRecord> {
        let now = Utc::now();
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.is_expired_at(now))
            .cloned()
            .collect()
    }

    /// Records with `expires_at <= now`
    pub async fn expired_at(&self, now: DateTime<Utc>) -> Vec<ArtifactRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.is_expired_at(now))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.stats_at(Utc::now()).await
    }

    pub async fn stats_at(&self, now: DateTime<Utc>) -> RegistryStats {
        let records = self.records.read().await;
        RegistryStats {
            count: records.len(),
            total_bytes: records.values().map(|r| r.size_bytes).sum(),
            expired_count: records.values().filter(|r| r.is_expired_at(now)).count(),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
