//! Artifact storage for baseline/latest/diff images
//!
//! One PNG per `(id, kind)` pair plus a small JSON report per id. The
//! filesystem layout is:
//!
//! ```text
//! <root>/baselines/<id>.png
//! <root>/latest/<id>.png
//! <root>/diffs/<id>.png
//! <root>/reports/<id>.json
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;
use vigil_core::{ArtifactKind, Result, VigilError};

/// Review state of an artifact id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualStatus {
    /// No baseline yet; `latest` awaits approval
    New,
    /// Latest matches the baseline (or was just approved)
    Clean,
    /// Latest differs from the baseline
    Changed,
    /// Latest could not be compared (undecodable capture or baseline)
    Error,
}

impl std::fmt::Display for VisualStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Clean => write!(f, "clean"),
            Self::Changed => write!(f, "changed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Diff metadata recorded next to the images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualReport {
    pub id: String,
    pub status: VisualStatus,
    pub diff_percentage: f64,
    pub compared_at: DateTime<Utc>,
}

impl VisualReport {
    pub fn new(id: impl Into<String>, status: VisualStatus, diff_percentage: f64) -> Self {
        Self {
            id: id.into(),
            status,
            diff_percentage,
            compared_at: Utc::now(),
        }
    }

    /// The state written after an approval
    pub fn clean(id: impl Into<String>) -> Self {
        Self::new(id, VisualStatus::Clean, 0.0)
    }
}

/// Filesystem locations of an id's artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub baseline: PathBuf,
    pub latest: PathBuf,
    pub diff: PathBuf,
}

/// Byte-addressable image storage keyed by `(id, kind)`
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn read(&self, id: &str, kind: ArtifactKind) -> Result<Option<Vec<u8>>>;

    /// Create or overwrite
    async fn write(&self, id: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<()>;

    /// Returns whether anything was removed
    async fn delete(&self, id: &str, kind: ArtifactKind) -> Result<bool>;

    async fn exists(&self, id: &str, kind: ArtifactKind) -> Result<bool> {
        Ok(self.read(id, kind).await?.is_some())
    }

    async fn read_report(&self, id: &str) -> Result<Option<VisualReport>>;

    async fn write_report(&self, report: &VisualReport) -> Result<()>;

    /// Filesystem paths, for stores that have them
    fn locate(&self, _id: &str) -> Option<ArtifactPaths> {
        None
    }
}

/// Reject ids that could escape the artifact directory
pub fn validate_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.chars().any(|c| c.is_control());
    if invalid {
        return Err(VigilError::VisualComparison(format!("Invalid artifact id: {:?}", id)));
    }
    Ok(())
}

/// Artifact store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Baseline => self.root.join("baselines"),
            ArtifactKind::Latest => self.root.join("latest"),
            ArtifactKind::Diff => self.root.join("diffs"),
        }
    }

    fn path(&self, id: &str, kind: ArtifactKind) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.png", id))
    }

    fn report_path(&self, id: &str) -> PathBuf {
        self.root.join("reports").join(format!("{}.json", id))
    }

    /// Write via a uniquely named sibling temp file so readers never see a
    /// partial image
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).await?;

        let path = path.to_path_buf();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            std::io::Write::write_all(&mut tmp, &bytes)?;
            tmp.persist(&path).map_err(|e| VigilError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| VigilError::Persistence(format!("Write task failed: {}", e)))?
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn read(&self, id: &str, kind: ArtifactKind) -> Result<Option<Vec<u8>>> {
        validate_id(id)?;
        Self::read_optional(&self.path(id, kind)).await
    }

    async fn write(&self, id: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        validate_id(id)?;
        let path = self.path(id, kind);
        Self::write_atomic(&path, bytes).await?;
        debug!("Wrote {} artifact {} ({} bytes)", kind, path.display(), bytes.len());
        Ok(())
    }

    async fn delete(&self, id: &str, kind: ArtifactKind) -> Result<bool> {
        validate_id(id)?;
        match fs::remove_file(self.path(id, kind)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, id: &str, kind: ArtifactKind) -> Result<bool> {
        validate_id(id)?;
        Ok(fs::try_exists(self.path(id, kind)).await?)
    }

    async fn read_report(&self, id: &str) -> Result<Option<VisualReport>> {
        validate_id(id)?;
        match Self::read_optional(&self.report_path(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_report(&self, report: &VisualReport) -> Result<()> {
        validate_id(&report.id)?;
        let bytes = serde_json::to_vec_pretty(report)?;
        Self::write_atomic(&self.report_path(&report.id), &bytes).await
    }

    fn locate(&self, id: &str) -> Option<ArtifactPaths> {
        validate_id(id).ok()?;
        Some(ArtifactPaths {
            baseline: self.path(id, ArtifactKind::Baseline),
            latest: self.path(id, ArtifactKind::Latest),
            diff: self.path(id, ArtifactKind::Diff),
        })
    }
}

/// Process-local artifact store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    images: Mutex<HashMap<(String, ArtifactKind), Vec<u8>>>,
    reports: Mutex<HashMap<String, VisualReport>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn images(&self) -> std::sync::MutexGuard<'_, HashMap<(String, ArtifactKind), Vec<u8>>> {
        self.images.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reports(&self) -> std::sync::MutexGuard<'_, HashMap<String, VisualReport>> {
        self.reports.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn read(&self, id: &str, kind: ArtifactKind) -> Result<Option<Vec<u8>>> {
        Ok(self.images().get(&(id.to_string(), kind)).cloned())
    }

    async fn write(&self, id: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        self.images().insert((id.to_string(), kind), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, id: &str, kind: ArtifactKind) -> Result<bool> {
        Ok(self.images().remove(&(id.to_string(), kind)).is_some())
    }

    async fn read_report(&self, id: &str) -> Result<Option<VisualReport>> {
        Ok(self.reports().get(id).cloned())
    }

    async fn write_report(&self, report: &VisualReport) -> Result<()> {
        self.reports().insert(report.id.clone(), report.clone());
        Ok(())
    }
}
