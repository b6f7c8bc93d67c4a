//! Deployment-level operations.
//!
//! Every operation follows the same shape: resolve and connect to the
//! deployment, validate everything that can be validated without touching
//! an instance, then drive the stages. Sessions are closed on every path
//! out of a connected run.

use std::path::PathBuf;
use std::sync::Arc;

use bbr_core::error::CoreError;
use bbr_core::job::Job;
use bbr_core::metadata::BackupMetadata;
use bbr_core::naming::{
    validate_backup_names, validate_restore_inputs, validate_restore_names_have_producers,
};
use bbr_core::run_result::{ResultCollector, RunReport, Stage, StageFailure};
use bbr_core::script::ScriptKind;
use bbr_remote::director::DirectorClient;
use bbr_remote::session::SessionProvider;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::artifact_dir::LocalArtifactDirectory;
use crate::cancellation::Checkpoint;
use crate::collector::ArtifactCollector;
use crate::config::OrchestratorConfig;
use crate::deployment::{DeployedInstance, Deployment};
use crate::error::OrchestratorError;
use crate::executor::InstanceExecutor;
use crate::lock::{LockCoordinator, LockScripts};
use crate::runner::ScriptRunner;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Directory the new artifact directory is created in.
    pub artifact_parent: PathBuf,
    /// Also store the Director's manifest as `manifest.yml`.
    pub with_manifest: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Artifact directory produced by an earlier backup.
    pub artifact_path: PathBuf,
}

#[derive(Debug)]
pub struct BackupOutcome {
    pub report: RunReport,
    /// Where the backup was written. `None` when nothing was collected.
    pub artifact_path: Option<PathBuf>,
}

pub struct Orchestrator {
    director: Arc<dyn DirectorClient>,
    sessions: Arc<dyn SessionProvider>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        director: Arc<dyn DirectorClient>,
        sessions: Arc<dyn SessionProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            director,
            sessions,
            config,
        }
    }

    fn runner(&self) -> ScriptRunner {
        ScriptRunner::new(&self.config.jobs_root, &self.config.scratch_dir)
    }

    fn parallelism(&self) -> usize {
        self.config.max_parallel_instances.max(1)
    }

    async fn connect(&self, name: &str) -> Result<Deployment, OrchestratorError> {
        Deployment::connect(
            name,
            self.director.as_ref(),
            self.sessions.as_ref(),
            &self.runner(),
            self.parallelism(),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Pre-backup check
    // -----------------------------------------------------------------------

    /// Run every backup pre-flight check without changing anything.
    pub async fn pre_backup_check(&self, name: &str) -> Result<(), OrchestratorError> {
        let deployment = self.connect(name).await?;
        let result = self.validate_backup(&deployment).await;
        deployment.close(self.parallelism()).await;
        result
    }

    async fn validate_backup(&self, deployment: &Deployment) -> Result<(), OrchestratorError> {
        if !deployment.has_script(ScriptKind::Backup) {
            return Err(CoreError::NoBackupScripts {
                deployment: deployment.name.clone(),
            }
            .into());
        }
        let jobs = deployment.jobs();
        validate_backup_names(&deployment.name, &jobs)?;
        validate_restore_names_have_producers(&deployment.name, &jobs)?;
        self.ensure_scratch_absent(deployment).await
    }

    /// Fail if the scratch root already exists on any instance.
    pub async fn ensure_scratch_absent(
        &self,
        deployment: &Deployment,
    ) -> Result<(), OrchestratorError> {
        let scratch = self.config.scratch_dir.as_str();
        let mut existing: Vec<_> = stream::iter(&deployment.instances)
            .map(|instance| async move {
                let exists = instance.session.path_exists(scratch).await;
                (instance, exists)
            })
            .buffer_unordered(self.parallelism())
            .collect()
            .await;
        existing.sort_by(|a, b| a.0.identity.cmp(&b.0.identity));

        for (instance, exists) in existing {
            match exists {
                Ok(false) => {}
                Ok(true) => {
                    return Err(CoreError::ScratchDirectoryExists {
                        instance: instance.identity.to_string(),
                        path: scratch.to_string(),
                    }
                    .into())
                }
                Err(source) => {
                    return Err(OrchestratorError::Discovery {
                        instance: instance.identity.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backup
    // -----------------------------------------------------------------------

    /// Back up `name` into a new artifact directory.
    ///
    /// `checkpoint` is consulted between stages; once it reports
    /// cancellation the run unlocks, cleans up, deletes the local
    /// directory and returns [`OrchestratorError::Cancelled`].
    pub async fn backup(
        &self,
        name: &str,
        options: &BackupOptions,
        checkpoint: &Checkpoint,
    ) -> Result<BackupOutcome, OrchestratorError> {
        let started_at = Utc::now();
        tracing::info!(deployment = name, "Starting backup");

        let deployment = self.connect(name).await?;
        let mut result = self
            .run_backup(&deployment, options, checkpoint, started_at)
            .await;
        deployment.close(self.parallelism()).await;

        // An interrupt confirmed while sessions were closing still cancels.
        if result.is_ok() && checkpoint.reached().await {
            if let Ok(BackupOutcome {
                artifact_path: Some(path),
                ..
            }) = &result
            {
                match LocalArtifactDirectory::open(path).await {
                    Ok(directory) => discard(directory).await,
                    Err(err) => tracing::warn!(error = %err, "Failed to remove artifact directory"),
                }
            }
            tracing::info!(deployment = name, "Backup cancelled");
            result = Err(OrchestratorError::Cancelled);
        }

        if let Ok(outcome) = &result {
            log_report(name, "Backup", &outcome.report);
        }
        result
    }

    async fn run_backup(
        &self,
        deployment: &Deployment,
        options: &BackupOptions,
        checkpoint: &Checkpoint,
        started_at: DateTime<Utc>,
    ) -> Result<BackupOutcome, OrchestratorError> {
        self.validate_backup(deployment).await?;
        let manifest = if options.with_manifest {
            Some(self.director.download_manifest(&deployment.name).await?)
        } else {
            None
        };
        if checkpoint.reached().await {
            return Err(OrchestratorError::Cancelled);
        }

        let directory =
            LocalArtifactDirectory::create(&options.artifact_parent, &deployment.name, started_at)
                .await?;
        if let Some(manifest) = &manifest {
            if let Err(err) = directory.write_manifest(manifest).await {
                discard(directory).await;
                return Err(err);
            }
        }

        let runner = self.runner();
        let results = ResultCollector::new();
        let mut locks = LockCoordinator::new(&runner, LockScripts::BACKUP);

        let locked = locks.lock(&deployment.instances, &results).await;
        let mut cancelled = checkpoint.reached().await;

        let mut produced: Vec<(&DeployedInstance, Vec<Job>)> = Vec::new();
        if locked && !cancelled {
            let executor = InstanceExecutor::new(&runner, &results);
            let executor = &executor;
            produced = stream::iter(&deployment.instances)
                .map(|instance| async move { (instance, executor.backup(instance).await) })
                .buffer_unordered(self.parallelism())
                .collect()
                .await;
            cancelled = checkpoint.reached().await;
        }

        locks.unlock(&deployment.instances, &results).await;
        cancelled = cancelled || checkpoint.reached().await;

        let mut metadata = None;
        if !cancelled {
            let collector = ArtifactCollector::new(&runner, &directory, &results, started_at);
            stream::iter(&produced)
                .for_each_concurrent(self.parallelism(), |(instance, jobs)| {
                    collector.collect(instance, jobs)
                })
                .await;
            metadata = collector.finish(Utc::now());
        }

        self.cleanup_scratch(deployment, &results).await;
        cancelled = cancelled || checkpoint.reached().await;

        if cancelled {
            tracing::info!(deployment = %deployment.name, "Backup cancelled");
            discard(directory).await;
            return Err(OrchestratorError::Cancelled);
        }

        let artifact_path = finalize(directory, metadata, &produced, &results).await;
        Ok(BackupOutcome {
            report: results.into_report(),
            artifact_path,
        })
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    /// Restore `name` from an artifact directory.
    ///
    /// Checksums are verified before any instance is contacted.
    pub async fn restore(
        &self,
        name: &str,
        options: &RestoreOptions,
    ) -> Result<RunReport, OrchestratorError> {
        tracing::info!(deployment = name, path = %options.artifact_path.display(), "Starting restore");
        let directory = LocalArtifactDirectory::open(&options.artifact_path).await?;
        let metadata = directory.verify().await?;

        let deployment = self.connect(name).await?;
        let result = self.run_restore(&deployment, &directory, &metadata).await;
        deployment.close(self.parallelism()).await;

        if let Ok(report) = &result {
            log_report(name, "Restore", report);
        }
        result
    }

    async fn run_restore(
        &self,
        deployment: &Deployment,
        directory: &LocalArtifactDirectory,
        metadata: &BackupMetadata,
    ) -> Result<RunReport, OrchestratorError> {
        if !deployment.has_script(ScriptKind::Restore) {
            return Err(CoreError::NoRestoreScripts {
                deployment: deployment.name.clone(),
            }
            .into());
        }
        validate_restore_inputs(
            &deployment.name,
            &deployment.jobs(),
            &metadata.artifact_names()?,
        )?;
        self.ensure_scratch_absent(deployment).await?;

        let runner = self.runner();
        let results = ResultCollector::new();
        let mut locks = LockCoordinator::new(&runner, LockScripts::RESTORE);

        if locks.lock(&deployment.instances, &results).await {
            let executor = InstanceExecutor::new(&runner, &results);
            let executor = &executor;
            stream::iter(&deployment.instances)
                .for_each_concurrent(self.parallelism(), |instance| async move {
                    executor.restore(instance, directory).await
                })
                .await;
        }

        locks.unlock(&deployment.instances, &results).await;
        self.cleanup_scratch(deployment, &results).await;
        Ok(results.into_report())
    }

    // -----------------------------------------------------------------------
    // Cleanup after an aborted run
    // -----------------------------------------------------------------------

    /// Release backup locks and remove scratch directories left behind.
    pub async fn backup_cleanup(&self, name: &str) -> Result<RunReport, OrchestratorError> {
        self.recover(name, LockScripts::BACKUP).await
    }

    /// Release restore locks and remove scratch directories left behind.
    pub async fn restore_cleanup(&self, name: &str) -> Result<RunReport, OrchestratorError> {
        self.recover(name, LockScripts::RESTORE).await
    }

    async fn recover(&self, name: &str, scripts: LockScripts) -> Result<RunReport, OrchestratorError> {
        tracing::info!(deployment = name, "Cleaning up");
        let deployment = self.connect(name).await?;

        let runner = self.runner();
        let results = ResultCollector::new();
        LockCoordinator::new(&runner, scripts)
            .unlock(&deployment.instances, &results)
            .await;
        self.cleanup_scratch(&deployment, &results).await;

        deployment.close(self.parallelism()).await;
        let report = results.into_report();
        log_report(name, "Cleanup", &report);
        Ok(report)
    }

    /// Remove the scratch root on every instance, recording each outcome.
    async fn cleanup_scratch(&self, deployment: &Deployment, results: &ResultCollector) {
        let scratch = self.config.scratch_dir.as_str();
        stream::iter(&deployment.instances)
            .for_each_concurrent(self.parallelism(), |instance| async move {
                match instance.session.remove_directory(scratch).await {
                    Ok(()) => results.record_success(&instance.identity, Stage::Cleanup),
                    Err(err) => results.record_failure(StageFailure::new(
                        Stage::Cleanup,
                        &instance.identity,
                        format!("Unable to clean up backup artifacts: {err}"),
                    )),
                }
            })
            .await;
    }
}

/// Write the metadata and keep the directory, or remove it when there is
/// nothing to keep.
///
/// A failed metadata write is a collect failure of every instance that
/// produced artifacts; the directory is removed since it cannot be restored.
async fn finalize(
    directory: LocalArtifactDirectory,
    metadata: Option<BackupMetadata>,
    produced: &[(&DeployedInstance, Vec<Job>)],
    results: &ResultCollector,
) -> Option<PathBuf> {
    let Some(metadata) = metadata else {
        discard(directory).await;
        return None;
    };

    match directory.write_metadata(&metadata).await {
        Ok(()) => {
            tracing::info!(path = %directory.path().display(), "Backup created");
            Some(directory.path().to_owned())
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to write backup metadata");
            for (instance, _) in produced.iter().filter(|(_, jobs)| !jobs.is_empty()) {
                results.record_failure(StageFailure::new(
                    Stage::Collect,
                    &instance.identity,
                    format!("Unable to write backup metadata: {err}"),
                ));
            }
            discard(directory).await;
            None
        }
    }
}

async fn discard(directory: LocalArtifactDirectory) {
    let path = directory.path().to_owned();
    if let Err(err) = directory.remove().await {
        tracing::warn!(path = %path.display(), error = %err, "Failed to remove artifact directory");
    }
}

fn log_report(deployment: &str, operation: &str, report: &RunReport) {
    for warning in &report.warnings {
        tracing::warn!(deployment, "{warning}");
    }
    if report.is_success() {
        tracing::info!(deployment, "{operation} completed successfully");
    } else {
        tracing::error!(
            deployment,
            exit_code = report.exit_code(),
            failures = report.failures.len(),
            "{operation} completed with failures",
        );
    }
}
