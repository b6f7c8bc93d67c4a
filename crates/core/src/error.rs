/// Domain errors raised by pre-flight validation, metadata handling and
/// restore-time integrity checks.
///
/// Every variant here is fatal to a run and is raised before any remote
/// mutation takes place.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Deployment '{deployment}' has no backup scripts")]
    NoBackupScripts { deployment: String },

    #[error("Deployment '{deployment}' has no restore scripts")]
    NoRestoreScripts { deployment: String },

    #[error("Multiple jobs in deployment '{deployment}' specified the same backup name '{name}'")]
    DuplicateBackupName { deployment: String, name: String },

    #[error(
        "The restore name '{name}' declared by job '{job}' in deployment '{deployment}' \
         has no matching backup artifact"
    )]
    UnresolvedRestoreName {
        deployment: String,
        job: String,
        name: String,
    },

    #[error("Backup does not match deployment '{deployment}': {details}")]
    DeploymentMismatch { deployment: String, details: String },

    #[error("Directory {path} already exists on instance {instance}")]
    ScratchDirectoryExists { instance: String, path: String },

    #[error("Backup is corrupted: {0}")]
    CorruptedBackup(String),

    #[error("Invalid metadata: {0}")]
    Metadata(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
