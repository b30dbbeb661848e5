//! Local copy of every batch, written before anything leaves the process.
//!
//! If a cycle fails after the drain, the artifact is what an operator (or the
//! `resubmit` command) recovers from. Files are only removed once a later
//! artifact holding the same records is safely on disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::batch::types::Batch;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("removing artifact {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {0} is not a JSON array of trades")]
    Format(PathBuf),
    #[error("no free artifact name for {0}")]
    NameExhausted(String),
}

/// A batch as it sits on disk.
#[derive(Debug, Clone)]
pub struct BatchArtifact {
    pub name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

const MAX_NAME_SUFFIX: u32 = 1000;

pub fn artifact_stem(captured_at: &DateTime<Utc>) -> String {
    format!("trades_{}", captured_at.format("%Y-%m-%d_%H-%M-%S"))
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes the canonical form of `batch` and syncs it to disk. Two cycles
    /// captured in the same second get `_1`, `_2`, ... suffixes.
    #[instrument(skip(self, batch), fields(records = batch.len()))]
    pub async fn write(&self, batch: &Batch) -> Result<BatchArtifact, ArtifactError> {
        fs::create_dir_all(&self.dir).await.map_err(|source| ArtifactError::Directory {
            path: self.dir.clone(),
            source,
        })?;

        let bytes = batch.to_canonical_bytes();
        let stem = artifact_stem(&batch.captured_at);

        for suffix in 0..MAX_NAME_SUFFIX {
            let name = if suffix == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, suffix)
            };
            let path = self.dir.join(&name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArtifactError::Write { path, source }),
            };

            let written = async {
                file.write_all(&bytes).await?;
                file.sync_all().await
            }
            .await;
            if let Err(source) = written {
                return Err(ArtifactError::Write { path, source });
            }

            debug!(artifact = %path.display(), bytes = bytes.len(), "Wrote batch artifact");
            return Ok(BatchArtifact { name, path, bytes });
        }

        Err(ArtifactError::NameExhausted(stem))
    }

    /// Loads an artifact written by an earlier cycle. The content must still
    /// be a JSON array; the records themselves are not inspected.
    pub async fn read(path: &Path) -> Result<BatchArtifact, ArtifactError> {
        let bytes = fs::read(path).await.map_err(|source| ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed: Result<Vec<Box<serde_json::value::RawValue>>, _> = serde_json::from_slice(&bytes);
        if parsed.is_err() {
            return Err(ArtifactError::Format(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trades.json".to_string());

        Ok(BatchArtifact { name, path: path.to_path_buf(), bytes })
    }

    /// Deletes an artifact whose records now live in a newer one.
    pub async fn discard(path: &Path) -> Result<(), ArtifactError> {
        fs::remove_file(path).await.map_err(|source| ArtifactError::Remove {
            path: path.to_path_buf(),
            source,
        })
    }
}
