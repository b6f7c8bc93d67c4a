//! Pulls backup output from instance scratch directories into the local
//! artifact directory and records its checksums.

use std::sync::Mutex;

use bbr_core::hashing::checksum_mismatches;
use bbr_core::job::Job;
use bbr_core::metadata::{BackupMetadata, MetadataBuilder};
use bbr_core::run_result::{ResultCollector, Stage, StageFailure};
use chrono::{DateTime, Utc};

use crate::archive::{self, human_size};
use crate::artifact_dir::LocalArtifactDirectory;
use crate::deployment::DeployedInstance;
use crate::runner::ScriptRunner;

pub struct ArtifactCollector<'a> {
    runner: &'a ScriptRunner,
    directory: &'a LocalArtifactDirectory,
    results: &'a ResultCollector,
    metadata: Mutex<MetadataBuilder>,
}

impl<'a> ArtifactCollector<'a> {
    pub fn new(
        runner: &'a ScriptRunner,
        directory: &'a LocalArtifactDirectory,
        results: &'a ResultCollector,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            runner,
            directory,
            results,
            metadata: Mutex::new(MetadataBuilder::new(started_at)),
        }
    }

    /// Collect the artifacts of `jobs`, all of which ran on `instance`.
    ///
    /// Each failure is recorded against its job; the remaining jobs are
    /// still collected.
    pub async fn collect(&self, instance: &DeployedInstance, jobs: &[Job]) {
        let mut collected_any = false;
        for job in jobs {
            match self.collect_job(instance, job).await {
                Ok(()) => collected_any = true,
                Err(failure) => self.results.record_failure(failure),
            }
        }
        if collected_any {
            self.results.record_success(&instance.identity, Stage::Collect);
        }
    }

    async fn collect_job(&self, instance: &DeployedInstance, job: &Job) -> Result<(), StageFailure> {
        let artifact = job.backup_artifact();
        let remote_path = self.runner.artifact_path(&artifact);
        let fail = |message: String| {
            StageFailure::new(Stage::Collect, &instance.identity, message).with_job(&job.name)
        };

        tracing::info!(
            instance = %instance.identity,
            job = %job.name,
            artifact = %artifact,
            "Copying backup from {remote_path}",
        );

        let local_path = self.directory.archive_path(&artifact);
        let downloaded = match instance
            .session
            .download_directory(&remote_path, &local_path)
            .await
        {
            Ok(bytes) => archive::summarize_file(&local_path)
                .await
                .map(|summary| (bytes, summary))
                .map_err(|e| format!("downloaded archive is unreadable: {e}")),
            Err(e) => Err(format!("failed to download {remote_path}: {e}")),
        };
        let (archive_bytes, summary) = match downloaded {
            Ok(downloaded) => downloaded,
            Err(message) => {
                // A partial archive must not outlive its failed collection.
                let _ = tokio::fs::remove_file(&local_path).await;
                return Err(fail(message));
            }
        };

        tracing::info!(
            instance = %instance.identity,
            job = %job.name,
            files = summary.file_count(),
            size = %human_size(summary.size_bytes),
            archive = %human_size(archive_bytes),
            "Finished copying backup",
        );

        match instance.session.checksum_directory(&remote_path).await {
            Ok(remote) => {
                let mismatches = checksum_mismatches(&summary.checksums, &remote);
                if !mismatches.is_empty() {
                    let message = format!(
                        "Checksums of {} differ between {} and the local copy: {}",
                        artifact,
                        instance.identity,
                        mismatches.join(", ")
                    );
                    tracing::warn!("{message}");
                    self.results.record_warning(message);
                }
            }
            Err(err) => {
                let message = format!(
                    "Could not checksum {remote_path} on {}: {err}",
                    instance.identity
                );
                tracing::warn!("{message}");
                self.results.record_warning(message);
            }
        }

        self.metadata
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add_artifact(&artifact, summary.checksums);
        Ok(())
    }

    /// Freeze the recorded checksums. `None` when nothing was collected.
    pub fn finish(self, finished_at: DateTime<Utc>) -> Option<BackupMetadata> {
        let builder = self.metadata.into_inner().unwrap_or_else(|e| e.into_inner());
        if builder.is_empty() {
            None
        } else {
            Some(builder.finish(finished_at))
        }
    }
}
