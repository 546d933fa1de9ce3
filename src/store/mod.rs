use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{AcquireError, Result};

const SCRATCH_DIR_NAME: &str = ".scratch";

/// A regular file found in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl StoredFile {
    fn from_metadata(filename: String, metadata: &std::fs::Metadata) -> Self {
        // Filesystems without mtime support make the file look brand new
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Self {
            filename,
            size_bytes: metadata.len(),
            modified,
        }
    }
}

/// Directory-backed location where produced artifacts live, addressed by filename.
///
/// Scratch downloads go to a hidden subdirectory so they can never be
/// mistaken for a servable artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a store, creating the artifact and scratch directories if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        store.ensure_dirs().await?;
        Ok(store)
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        let scratch = self.scratch_dir();
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| AcquireError::storage(format!("create {}", scratch.display()), e))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR_NAME)
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Only a confirmed absence counts as missing. Any other I/O error is
    /// logged and the file is assumed present.
    pub async fn exists(&self, filename: &str) -> bool {
        match tokio::fs::try_exists(self.path_for(filename)).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(filename = %filename, error = %e, "Could not check artifact");
                true
            }
        }
    }

    /// Size and modification time of a stored artifact, `None` if it is not on disk
    pub async fn stat(&self, filename: &str) -> Result<Option<StoredFile>> {
        match tokio::fs::metadata(self.path_for(filename)).await {
            Ok(metadata) if metadata.is_file() => {
                Ok(Some(StoredFile::from_metadata(filename.to_string(), &metadata)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AcquireError::storage(format!("stat {filename}"), e)),
        }
    }

    pub async fn size_of(&self, filename: &str) -> Result<Option<u64>> {
        Ok(self.stat(filename).await?.map(|file| file.size_bytes))
    }

    /// Delete an artifact. A file that is already gone counts as deleted.
    pub async fn remove(&self, filename: &str) -> std::io::Result<bool> {
        remove_path(&self.path_for(filename)).await
    }

    /// Delete a file from the scratch directory
    pub async fn remove_scratch(&self, filename: &str) -> std::io::Result<bool> {
        remove_path(&self.scratch_dir().join(filename)).await
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.path_for(filename))
            .await
            .map_err(|e| AcquireError::storage(format!("read {filename}"), e))
    }

    /// Regular files in the store root, registered or not
    pub async fn list_artifacts(&self) -> Result<Vec<StoredFile>> {
        list_files(&self.root).await
    }

    /// Everything in the scratch directory, including partial downloads
    pub async fn list_scratch(&self) -> Result<Vec<StoredFile>> {
        list_files(&self.scratch_dir()).await
    }

    /// Find the completed scratch file named `<base>.<ext>`.
    ///
    /// The downloader picks its own extension, so the scratch directory is
    /// scanned for the allocated prefix. In-progress fragments are ignored.
    pub async fn find_scratch(&self, base: &str) -> Result<Option<PathBuf>> {
        let prefix = format!("{base}.");
        let found = self
            .list_scratch()
            .await?
            .into_iter()
            .find(|file| file.filename.starts_with(&prefix) && !is_partial(&file.filename));

        Ok(found.map(|file| self.scratch_dir().join(file.filename)))
    }
}

async fn remove_path(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Regular, non-hidden files directly inside `dir`
async fn list_files(dir: &Path) -> Result<Vec<StoredFile>> {
    let list_err = |e| AcquireError::storage(format!("list {}", dir.display()), e);
    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let filename = entry.file_name().to_string_lossy().into_owned();
        if filename.starts_with('.') {
            continue;
        }
        // Raced with a concurrent delete
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if metadata.is_file() {
            files.push(StoredFile::from_metadata(filename, &metadata));
        }
    }

    Ok(files)
}

fn is_partial(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".part-Frag")
}

/// Removes every scratch file carrying a prefix.
///
/// Call [`ScratchGuard::cleanup`] on normal completion. If the owning future
/// is dropped first (cancelled request, panic), `Drop` removes the files
/// synchronously instead. Failures are logged and swallowed.
pub struct ScratchGuard {
    dir: PathBuf,
    base: String,
    armed: bool,
}

impl ScratchGuard {
    pub fn new(store: &ArtifactStore, base: impl Into<String>) -> Self {
        Self {
            dir: store.scratch_dir(),
            base: base.into(),
            armed: true,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn prefix(&self) -> String {
        format!("{}.", self.base)
    }

    pub async fn cleanup(mut self) {
        self.armed = false;
        let prefix = self.prefix();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "Failed to list scratch directory"
                );
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            match remove_path(&path).await {
                Ok(_) => tracing::debug!(path = %path.display(), "Removed scratch file"),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove scratch file"
                    )
                }
            }
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // Blocking, but only reached when the acquisition was abandoned
        let prefix = self.prefix();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    error = %e,
                    "Failed to list scratch directory"
                );
                return;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed scratch file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove scratch file"
                    )
                }
            }
        }
    }
}
