//! Runs the guarded operation on one instance.
//!
//! Instances fail independently: a failing job is recorded and the
//! instance's remaining jobs still run.

use bbr_core::job::Job;
use bbr_core::run_result::{ResultCollector, Stage, StageFailure};
use bbr_core::script::ScriptKind;

use crate::artifact_dir::LocalArtifactDirectory;
use crate::deployment::DeployedInstance;
use crate::runner::ScriptRunner;

pub struct InstanceExecutor<'a> {
    runner: &'a ScriptRunner,
    results: &'a ResultCollector,
}

impl<'a> InstanceExecutor<'a> {
    pub fn new(runner: &'a ScriptRunner, results: &'a ResultCollector) -> Self {
        Self { runner, results }
    }

    /// Run every `backup` script of `instance`.
    ///
    /// Returns the jobs whose backup succeeded and whose output should be
    /// collected.
    pub async fn backup(&self, instance: &DeployedInstance) -> Vec<Job> {
        let mut succeeded = Vec::new();
        for job in instance.jobs_with(ScriptKind::Backup) {
            let path = self.runner.artifact_path(&job.backup_artifact());
            if let Err(err) = instance.session.create_directory(&path).await {
                self.results.record_failure(
                    StageFailure::new(
                        Stage::Operate,
                        &instance.identity,
                        format!("failed to create {path}: {err}"),
                    )
                    .with_job(&job.name),
                );
                continue;
            }

            match self
                .runner
                .run(instance.session.as_ref(), job, ScriptKind::Backup)
                .await
            {
                Ok(_) => succeeded.push(job.clone()),
                Err(err) => self
                    .results
                    .record_failure(err.into_stage_failure(Stage::Operate, job)),
            }
        }

        if !succeeded.is_empty() && !self.results.instance_failed(&instance.identity, Stage::Operate)
        {
            self.results.record_success(&instance.identity, Stage::Operate);
        }
        succeeded
    }

    /// Stage each job's input from `directory` and run its `restore` script.
    pub async fn restore(&self, instance: &DeployedInstance, directory: &LocalArtifactDirectory) {
        let mut any_ran = false;
        for job in instance.jobs_with(ScriptKind::Restore) {
            any_ran = true;
            if let Err(failure) = self.stage_restore_input(instance, job, directory).await {
                self.results.record_failure(failure);
                continue;
            }
            if let Err(err) = self
                .runner
                .run(instance.session.as_ref(), job, ScriptKind::Restore)
                .await
            {
                self.results
                    .record_failure(err.into_stage_failure(Stage::Operate, job));
            }
        }

        if any_ran && !self.results.instance_failed(&instance.identity, Stage::Operate) {
            self.results.record_success(&instance.identity, Stage::Operate);
        }
    }

    async fn stage_restore_input(
        &self,
        instance: &DeployedInstance,
        job: &Job,
        directory: &LocalArtifactDirectory,
    ) -> Result<(), StageFailure> {
        let artifact = job.restore_artifact();
        let remote_path = self.runner.artifact_path(&artifact);
        let fail = |message: String| {
            StageFailure::new(Stage::Operate, &instance.identity, message).with_job(&job.name)
        };

        let local_path = directory.archive_path(&artifact);
        if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            return Err(fail(format!("{} is missing", local_path.display())));
        }

        tracing::info!(
            instance = %instance.identity,
            job = %job.name,
            artifact = %artifact,
            "Copying backup to {remote_path}",
        );
        instance
            .session
            .upload_directory(&remote_path, &local_path)
            .await
            .map_err(|e| fail(format!("failed to upload to {remote_path}: {e}")))
    }
}
