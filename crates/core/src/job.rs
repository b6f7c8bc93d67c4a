//! Job model: a named component on an instance plus the set of lifecycle
//! scripts discovered for it.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::CoreError;
use crate::instance::InstanceIdentity;
use crate::naming::ArtifactName;
use crate::script::{script_path, ScriptKind};

// ---------------------------------------------------------------------------
// JobMetadata
// ---------------------------------------------------------------------------

/// Custom artifact names become local file names and remote directory
/// names, so they are restricted to a portable character set.
const ARTIFACT_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

static ARTIFACT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(ARTIFACT_NAME_PATTERN).expect("valid regex"));

/// Fields a job's `metadata` script may declare on stdout.
///
/// Unknown keys are ignored; blank names count as undeclared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub backup_name: Option<String>,
    #[serde(default)]
    pub restore_name: Option<String>,
}

impl JobMetadata {
    /// Parse the stdout of a `metadata` script.
    pub fn parse(stdout: &str) -> Result<Self, CoreError> {
        if stdout.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: JobMetadata = serde_yaml::from_str(stdout)
            .map_err(|e| CoreError::Metadata(format!("unparsable job metadata: {e}")))?;
        Ok(Self {
            backup_name: checked_name("backup_name", parsed.backup_name)?,
            restore_name: checked_name("restore_name", parsed.restore_name)?,
        })
    }
}

fn checked_name(field: &str, value: Option<String>) -> Result<Option<String>, CoreError> {
    let Some(name) = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    else {
        return Ok(None);
    };
    if !ARTIFACT_NAME_RE.is_match(&name) {
        return Err(CoreError::Metadata(format!(
            "{field} '{name}' must match {ARTIFACT_NAME_PATTERN}"
        )));
    }
    Ok(Some(name))
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job discovered on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub instance: InstanceIdentity,
    pub scripts: BTreeSet<ScriptKind>,
    pub metadata: JobMetadata,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        instance: InstanceIdentity,
        scripts: impl IntoIterator<Item = ScriptKind>,
    ) -> Self {
        Self {
            name: name.into(),
            instance,
            scripts: scripts.into_iter().collect(),
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn has(&self, kind: ScriptKind) -> bool {
        self.scripts.contains(&kind)
    }

    /// Remote path of `kind` for this job.
    pub fn script_path(&self, jobs_root: &str, kind: ScriptKind) -> String {
        script_path(jobs_root, &self.name, kind)
    }

    /// A job with neither `backup` nor `restore` contributes nothing.
    pub fn is_relevant(&self) -> bool {
        self.has(ScriptKind::Backup) || self.has(ScriptKind::Restore)
    }

    /// Logical name under which this job's backup output travels.
    pub fn backup_artifact(&self) -> ArtifactName {
        match &self.metadata.backup_name {
            Some(name) => ArtifactName::Custom(name.clone()),
            None => ArtifactName::instance_scoped(&self.instance, &self.name),
        }
    }

    /// Logical name of the artifact this job's restore consumes.
    pub fn restore_artifact(&self) -> ArtifactName {
        match &self.metadata.restore_name {
            Some(name) => ArtifactName::Custom(name.clone()),
            None => ArtifactName::instance_scoped(&self.instance, &self.name),
        }
    }

    /// `group/index/job`, used in error reports.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.instance, self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
