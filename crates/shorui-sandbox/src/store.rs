//! Filesystem-backed artifact store
//!
//! Layout: `<root>/<filename>` for artifacts, `<root>/.scratch/` for snippet
//! files. Names starting with `.` are never accepted as artifact names, so
//! the scratch area is unreachable through the public API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shorui_core::filename::validate_filename;
use shorui_core::{Result, ShoruiError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory under the root holding snippet files
pub const SCRATCH_DIR: &str = ".scratch";

/// Listing entry for a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open the store at `root`, creating it if needed.
    ///
    /// The root is canonicalized so every resolved path is absolute.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Absolute path for `filename`, or `PathValidation` if it could escape
    /// the root
    pub fn resolve_safe_path(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    /// True when `filename` is safe and names a regular file
    pub async fn exists(&self, filename: &str) -> bool {
        match self.resolve_safe_path(filename) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn size(&self, filename: &str) -> Result<u64> {
        let path = self.resolve_safe_path(filename)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, filename))?;
        // an empty file is a target still claimed by a running snippet
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(ShoruiError::NotFound(filename.to_string()));
        }
        Ok(metadata.len())
    }

    /// Open an artifact for streaming
    pub async fn open(&self, filename: &str) -> Result<tokio::fs::File> {
        let path = self.resolve_safe_path(filename)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, filename))?;

        if !file.metadata().await?.is_file() {
            return Err(ShoruiError::NotFound(filename.to_string()));
        }
        Ok(file)
    }

    /// Write `bytes` atomically: temp file in the root, then rename.
    pub async fn write(&self, filename: &str, bytes: Vec<u8>) -> Result<PathBuf> {
        let path = self.resolve_safe_path(filename)?;
        let root = self.root.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = NamedTempFile::new_in(&root)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| ShoruiError::Storage(format!("write task failed: {}", e)))??;

        Ok(path)
    }

    /// Remove an artifact; returns false if it was not there
    pub async fn remove(&self, filename: &str) -> Result<bool> {
        let path = self.resolve_safe_path(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored artifacts, newest first
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut artifacts = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_filename(&filename).is_err() {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            artifacts.push(ArtifactInfo {
                filename,
                size_bytes: metadata.len(),
                modified,
            });
        }

        artifacts.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(artifacts)
    }
}

fn not_found_or_io(e: std::io::Error, filename: &str) -> ShoruiError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ShoruiError::NotFound(filename.to_string())
    } else {
        ShoruiError::Io(e)
    }
}
