//! Local artifact directory: one archive per artifact, the `metadata`
//! file and optionally the deployment manifest.

use std::path::{Path, PathBuf};

use bbr_core::error::CoreError;
use bbr_core::hashing::checksum_mismatches;
use bbr_core::metadata::{BackupMetadata, METADATA_FILE_NAME};
use bbr_core::naming::ArtifactName;
use chrono::{DateTime, Utc};

use crate::archive;
use crate::error::OrchestratorError;

/// File name of the downloaded deployment manifest.
pub const MANIFEST_FILE_NAME: &str = "manifest.yml";

/// UTC timestamp suffix of a new artifact directory.
pub const DIRECTORY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone)]
pub struct LocalArtifactDirectory {
    path: PathBuf,
}

impl LocalArtifactDirectory {
    /// `<deployment>_<YYYYMMDDThhmmssZ>`
    pub fn directory_name(deployment: &str, at: DateTime<Utc>) -> String {
        format!("{deployment}_{}", at.format(DIRECTORY_TIMESTAMP_FORMAT))
    }

    /// Create a fresh directory under `parent`. Fails if it already exists.
    pub async fn create(
        parent: &Path,
        deployment: &str,
        at: DateTime<Utc>,
    ) -> Result<Self, OrchestratorError> {
        let path = parent.join(Self::directory_name(deployment, at));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| OrchestratorError::artifact_io(parent, e))?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| OrchestratorError::artifact_io(&path, e))?;
        tracing::debug!(path = %path.display(), "Created artifact directory");
        Ok(Self { path })
    }

    /// Open an existing directory produced by an earlier backup.
    pub async fn open(path: &Path) -> Result<Self, OrchestratorError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| OrchestratorError::artifact_io(path, e))?;
        if !meta.is_dir() {
            return Err(OrchestratorError::artifact_io(
                path,
                std::io::Error::other("not a directory"),
            ));
        }
        Ok(Self {
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_path(&self, artifact: &ArtifactName) -> PathBuf {
        self.path.join(artifact.archive_file_name())
    }

    pub async fn write_metadata(&self, metadata: &BackupMetadata) -> Result<(), OrchestratorError> {
        let path = self.path.join(METADATA_FILE_NAME);
        tokio::fs::write(&path, metadata.to_yaml()?)
            .await
            .map_err(|e| OrchestratorError::artifact_io(&path, e))
    }

    pub async fn read_metadata(&self) -> Result<BackupMetadata, OrchestratorError> {
        let path = self.path.join(METADATA_FILE_NAME);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| OrchestratorError::artifact_io(&path, e))?;
        Ok(BackupMetadata::from_yaml(&raw)?)
    }

    pub async fn write_manifest(&self, manifest: &str) -> Result<(), OrchestratorError> {
        let path = self.path.join(MANIFEST_FILE_NAME);
        tokio::fs::write(&path, manifest)
            .await
            .map_err(|e| OrchestratorError::artifact_io(&path, e))
    }

    /// Recompute every archive's checksums and compare them with the
    /// recorded metadata.
    ///
    /// Returns the metadata when everything matches, otherwise
    /// [`CoreError::CorruptedBackup`].
    pub async fn verify(&self) -> Result<BackupMetadata, OrchestratorError> {
        let metadata = self.read_metadata().await?;
        let mut problems = Vec::new();

        for (artifact, expected) in metadata.artifacts()? {
            let path = self.archive_path(&artifact);
            match archive::summarize_file(&path).await {
                Ok(summary) => {
                    for problem in checksum_mismatches(expected, &summary.checksums) {
                        problems.push(format!("{}: {problem}", artifact.archive_file_name()));
                    }
                }
                Err(err) => problems.push(format!(
                    "{}: cannot be read: {err}",
                    artifact.archive_file_name()
                )),
            }
        }

        if problems.is_empty() {
            tracing::info!(path = %self.path.display(), "Backup checksums verified");
            Ok(metadata)
        } else {
            Err(CoreError::CorruptedBackup(problems.join("; ")).into())
        }
    }

    /// Delete the directory and everything in it.
    pub async fn remove(self) -> Result<(), OrchestratorError> {
        tokio::fs::remove_dir_all(&self.path)
            .await
            .map_err(|e| OrchestratorError::artifact_io(&self.path, e))
    }
}
