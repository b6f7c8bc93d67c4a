//! Runs one job script on one instance and captures its output.
//!
//! `backup` and `restore` scripts receive the job's artifact directory
//! under the scratch root through `BBR_ARTIFACT_DIRECTORY` (and the legacy
//! `ARTIFACT_DIRECTORY`); every other kind runs with no extra environment.

use std::fmt;

use bbr_core::job::Job;
use bbr_core::naming::ArtifactName;
use bbr_core::run_result::{Stage, StageFailure};
use bbr_core::script::ScriptKind;
use bbr_remote::session::{CommandOutput, RemoteSession, SessionError};

/// Environment variable carrying the artifact directory.
pub const ARTIFACT_DIRECTORY_ENV: &str = "BBR_ARTIFACT_DIRECTORY";

/// Older name of [`ARTIFACT_DIRECTORY_ENV`], still read by some jobs.
pub const LEGACY_ARTIFACT_DIRECTORY_ENV: &str = "ARTIFACT_DIRECTORY";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A job script that did not complete successfully.
#[derive(Debug)]
pub enum ScriptError {
    /// The script ran and exited non-zero.
    Failed {
        path: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The script could not be run at all.
    Session { path: String, source: SessionError },
}

impl ScriptError {
    /// Convert into a report entry for `stage`.
    pub fn into_stage_failure(self, stage: Stage, job: &Job) -> StageFailure {
        let message = self.to_string();
        let failure = StageFailure::new(stage, &job.instance, message).with_job(&job.name);
        match self {
            Self::Failed { stdout, stderr, .. } => failure.with_output(stdout, stderr),
            Self::Session { .. } => failure,
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed {
                path, exit_code, ..
            } => write!(f, "{path} exited with code {exit_code}"),
            Self::Session { path, source } => write!(f, "could not run {path}: {source}"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session { source, .. } => Some(source),
            Self::Failed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Stateless script runner bound to the remote layout of a run.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    jobs_root: String,
    scratch_root: String,
}

impl ScriptRunner {
    pub fn new(jobs_root: impl Into<String>, scratch_root: impl Into<String>) -> Self {
        Self {
            jobs_root: jobs_root.into(),
            scratch_root: scratch_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn jobs_root(&self) -> &str {
        &self.jobs_root
    }

    pub fn scratch_root(&self) -> &str {
        &self.scratch_root
    }

    /// Remote directory staging `artifact`, without a trailing slash.
    pub fn artifact_path(&self, artifact: &ArtifactName) -> String {
        format!("{}/{}", self.scratch_root, artifact.logical_name())
    }

    /// Value exposed to scripts: [`artifact_path`](Self::artifact_path)
    /// with a trailing slash.
    pub fn artifact_directory(&self, artifact: &ArtifactName) -> String {
        format!("{}/", self.artifact_path(artifact))
    }

    /// Environment for running `kind` of `job`.
    pub fn script_env(&self, job: &Job, kind: ScriptKind) -> Vec<(String, String)> {
        let artifact = match kind {
            ScriptKind::Backup => job.backup_artifact(),
            ScriptKind::Restore => job.restore_artifact(),
            _ => return Vec::new(),
        };
        let dir = self.artifact_directory(&artifact);
        vec![
            (ARTIFACT_DIRECTORY_ENV.to_string(), dir.clone()),
            (LEGACY_ARTIFACT_DIRECTORY_ENV.to_string(), dir),
        ]
    }

    /// Run `kind` of `job` through `session`.
    ///
    /// Returns the captured output on exit code 0.
    pub async fn run(
        &self,
        session: &dyn RemoteSession,
        job: &Job,
        kind: ScriptKind,
    ) -> Result<CommandOutput, ScriptError> {
        let path = job.script_path(&self.jobs_root, kind);
        let env = self.script_env(job, kind);

        tracing::info!(
            instance = %job.instance,
            job = %job.name,
            script = %path,
            "Running {kind} script",
        );

        let output = session
            .run_script(&path, &env)
            .await
            .map_err(|source| ScriptError::Session {
                path: path.clone(),
                source,
            })?;

        if !output.success() {
            tracing::warn!(
                instance = %job.instance,
                job = %job.name,
                exit_code = output.exit_code,
                "{kind} script failed",
            );
            return Err(ScriptError::Failed {
                path,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        tracing::debug!(instance = %job.instance, job = %job.name, "Finished {kind} script");
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
