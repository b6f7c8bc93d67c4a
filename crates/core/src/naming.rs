//! Artifact naming and deployment-wide collision detection.
//!
//! A job's backup output travels under its own name, scoped to the
//! instance it ran on, unless its `metadata` script declares a custom
//! `backup_name`, which is scoped to the whole deployment. Restore inputs
//! resolve the same way through `restore_name`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::error::CoreError;
use crate::instance::InstanceIdentity;
use crate::job::Job;
use crate::script::ScriptKind;

/// Extension of every local artifact archive.
pub const ARCHIVE_EXTENSION: &str = "tar";

// ---------------------------------------------------------------------------
// ArtifactName
// ---------------------------------------------------------------------------

/// Resolved identity of one artifact within a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactName {
    /// Default name: the job name on a specific instance.
    Instance {
        group: String,
        index: u32,
        job: String,
    },
    /// Name declared by a job's `metadata` script.
    Custom(String),
}

impl ArtifactName {
    pub fn instance_scoped(instance: &InstanceIdentity, job: &str) -> Self {
        Self::Instance {
            group: instance.group.clone(),
            index: instance.index,
            job: job.to_string(),
        }
    }

    /// The name recorded in metadata and exposed under the scratch root.
    pub fn logical_name(&self) -> &str {
        match self {
            Self::Instance { job, .. } => job,
            Self::Custom(name) => name,
        }
    }

    /// File name of the local archive holding this artifact.
    ///
    /// ```
    /// use bbr_core::naming::ArtifactName;
    ///
    /// let default = ArtifactName::Instance { group: "redis".into(), index: 0, job: "redis-server".into() };
    /// assert_eq!(default.archive_file_name(), "redis-0-redis-server.tar");
    /// assert_eq!(ArtifactName::Custom("shared".into()).archive_file_name(), "shared.tar");
    /// ```
    pub fn archive_file_name(&self) -> String {
        match self {
            Self::Instance { group, index, job } => {
                format!("{group}-{index}-{job}.{ARCHIVE_EXTENSION}")
            }
            Self::Custom(name) => format!("{name}.{ARCHIVE_EXTENSION}"),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance { group, index, job } => write!(f, "{group}/{index}/{job}"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Backup-side validation
// ---------------------------------------------------------------------------

/// Fail if two backup-producing jobs resolve to the same artifact.
///
/// Also rejects two jobs on one instance that would share a directory
/// under that instance's scratch root.
pub fn validate_backup_names(deployment: &str, jobs: &[Job]) -> Result<(), CoreError> {
    let mut seen: HashSet<ArtifactName> = HashSet::new();
    let mut per_instance: HashMap<&InstanceIdentity, HashSet<String>> = HashMap::new();

    for job in jobs.iter().filter(|j| j.has(ScriptKind::Backup)) {
        let artifact = job.backup_artifact();
        let duplicate = || CoreError::DuplicateBackupName {
            deployment: deployment.to_string(),
            name: artifact.logical_name().to_string(),
        };

        if !per_instance
            .entry(&job.instance)
            .or_default()
            .insert(artifact.logical_name().to_string())
        {
            return Err(duplicate());
        }
        if !seen.insert(artifact.clone()) {
            return Err(duplicate());
        }
    }
    Ok(())
}

/// Fail if a job declares a `restore_name` that no job in the deployment
/// produces as a `backup_name`.
pub fn validate_restore_names_have_producers(
    deployment: &str,
    jobs: &[Job],
) -> Result<(), CoreError> {
    let produced: BTreeSet<ArtifactName> = jobs
        .iter()
        .filter(|j| j.has(ScriptKind::Backup))
        .map(Job::backup_artifact)
        .filter(ArtifactName::is_custom)
        .collect();
    check_custom_restore_names(deployment, jobs, &produced)
}

// ---------------------------------------------------------------------------
// Restore-side validation
// ---------------------------------------------------------------------------

/// Fail unless every restoring job finds its input among `available`.
///
/// A missing custom name is an unresolved restore name; a missing
/// instance-scoped artifact means the backup was taken from a deployment
/// with a different shape.
pub fn validate_restore_inputs(
    deployment: &str,
    jobs: &[Job],
    available: &BTreeSet<ArtifactName>,
) -> Result<(), CoreError> {
    check_custom_restore_names(deployment, jobs, available)?;

    for job in jobs.iter().filter(|j| j.has(ScriptKind::Restore)) {
        let wanted = job.restore_artifact();
        if !wanted.is_custom() && !available.contains(&wanted) {
            return Err(CoreError::DeploymentMismatch {
                deployment: deployment.to_string(),
                details: format!("no artifact found for job {}", job.qualified_name()),
            });
        }
    }
    Ok(())
}

fn check_custom_restore_names(
    deployment: &str,
    jobs: &[Job],
    available: &BTreeSet<ArtifactName>,
) -> Result<(), CoreError> {
    for job in jobs.iter().filter(|j| j.has(ScriptKind::Restore)) {
        let wanted = job.restore_artifact();
        if wanted.is_custom() && !available.contains(&wanted) {
            return Err(CoreError::UnresolvedRestoreName {
                deployment: deployment.to_string(),
                job: job.qualified_name(),
                name: wanted.logical_name().to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
