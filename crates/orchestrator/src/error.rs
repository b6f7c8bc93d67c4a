use std::path::PathBuf;

use bbr_core::error::CoreError;
use bbr_remote::director::DirectorError;
use bbr_remote::session::SessionError;

/// Fatal errors that end a run before (or instead of) producing a
/// [`RunReport`](bbr_core::run_result::RunReport).
///
/// Stage failures during lock/operate/unlock/cleanup are not represented
/// here; they are recorded in the result collector and reported through
/// the exit-code bitmask.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Director(#[from] DirectorError),

    #[error("Failed to open session to instance {instance}: {source}")]
    Session {
        instance: String,
        #[source]
        source: SessionError,
    },

    #[error("Failed to inspect instance {instance}: {source}")]
    Discovery {
        instance: String,
        #[source]
        source: SessionError,
    },

    #[error("Metadata script for job {job} failed: {message}")]
    MetadataScript { job: String, message: String },

    #[error("Artifact directory {path}: {source}")]
    ArtifactDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup cancelled")]
    Cancelled,
}

impl OrchestratorError {
    pub(crate) fn artifact_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactDirectory {
            path: path.into(),
            source,
        }
    }
}
