//! Script discovery on one instance.
//!
//! Lists every file under `<jobs-root>/*/bin/bbr/`, groups the recognized
//! ones by job and runs each job's `metadata` script. Missing scripts are
//! simply absent from [`Job::scripts`].

use std::collections::{BTreeMap, BTreeSet};

use bbr_core::instance::InstanceIdentity;
use bbr_core::job::{Job, JobMetadata};
use bbr_core::script::{parse_script_path, ScriptKind};
use bbr_remote::session::RemoteSession;

use crate::error::OrchestratorError;
use crate::runner::{ScriptError, ScriptRunner};

/// Group script paths into jobs ordered by name.
///
/// Paths outside the convention layout are ignored.
pub fn jobs_from_paths(instance: &InstanceIdentity, jobs_root: &str, paths: &[String]) -> Vec<Job> {
    let mut by_job: BTreeMap<String, BTreeSet<ScriptKind>> = BTreeMap::new();
    for path in paths {
        match parse_script_path(jobs_root, path) {
            Some((job, kind)) => {
                by_job.entry(job).or_default().insert(kind);
            }
            None => tracing::debug!(instance = %instance, path, "Ignoring unrecognized file"),
        }
    }
    by_job
        .into_iter()
        .map(|(name, scripts)| Job::new(name, instance.clone(), scripts))
        .collect()
}

/// Discover the relevant jobs of the instance behind `session`.
///
/// Jobs with neither `backup` nor `restore` are dropped. Jobs with a
/// `metadata` script carry its parsed output.
pub async fn locate_jobs(
    session: &dyn RemoteSession,
    runner: &ScriptRunner,
) -> Result<Vec<Job>, OrchestratorError> {
    let instance = session.instance().clone();
    let paths = session
        .list_job_scripts(runner.jobs_root())
        .await
        .map_err(|source| OrchestratorError::Discovery {
            instance: instance.to_string(),
            source,
        })?;

    let mut jobs = Vec::new();
    for job in jobs_from_paths(&instance, runner.jobs_root(), &paths) {
        if !job.is_relevant() {
            tracing::debug!(instance = %instance, job = %job.name, "Skipping job without backup or restore script");
            continue;
        }
        let metadata = if job.has(ScriptKind::Metadata) {
            load_metadata(session, runner, &job).await?
        } else {
            JobMetadata::default()
        };
        jobs.push(job.with_metadata(metadata));
    }

    tracing::debug!(instance = %instance, job_count = jobs.len(), "Discovered jobs");
    Ok(jobs)
}

async fn load_metadata(
    session: &dyn RemoteSession,
    runner: &ScriptRunner,
    job: &Job,
) -> Result<JobMetadata, OrchestratorError> {
    let output = runner
        .run(session, job, ScriptKind::Metadata)
        .await
        .map_err(|err| {
            let message = match &err {
                ScriptError::Failed { stderr, .. } if !stderr.trim().is_empty() => {
                    format!("{err}: {}", stderr.trim())
                }
                _ => err.to_string(),
            };
            OrchestratorError::MetadataScript {
                job: job.qualified_name(),
                message,
            }
        })?;

    JobMetadata::parse(&output.stdout).map_err(|err| OrchestratorError::MetadataScript {
        job: job.qualified_name(),
        message: err.to_string(),
    })
}
