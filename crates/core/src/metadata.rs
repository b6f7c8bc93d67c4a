//! Backup manifest (`metadata` file) model.
//!
//! Written once at the end of a backup and consumed read-only by restore.
//! [`MetadataBuilder`] accumulates artifact checksums while a backup is in
//! flight; [`BackupMetadata`] is the frozen, serializable result.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hashing::Checksums;
use crate::naming::ArtifactName;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File name of the manifest inside an artifact directory.
pub const METADATA_FILE_NAME: &str = "metadata";

/// Format of `backup_activity` timestamps.
pub const ACTIVITY_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S UTC";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
    #[serde(default)]
    pub custom_artifacts: Vec<ArtifactRecord>,
    pub backup_activity: BackupActivity,
}

/// Artifacts produced by the jobs of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance group name.
    pub name: String,
    /// Instance index, stored as a string.
    pub index: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    #[serde(default)]
    pub checksums: Checksums,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupActivity {
    pub start_time: String,
    pub finish_time: String,
}

impl BackupMetadata {
    pub fn from_yaml(input: &str) -> Result<Self, CoreError> {
        let metadata: BackupMetadata =
            serde_yaml::from_str(input).map_err(|e| CoreError::Metadata(e.to_string()))?;
        // Surface bad indices at load time rather than mid-restore.
        metadata.artifacts()?;
        Ok(metadata)
    }

    pub fn to_yaml(&self) -> Result<String, CoreError> {
        serde_yaml::to_string(self).map_err(|e| CoreError::Metadata(e.to_string()))
    }

    /// Every artifact recorded, with its checksums.
    pub fn artifacts(&self) -> Result<Vec<(ArtifactName, &Checksums)>, CoreError> {
        let mut out = Vec::new();
        for instance in &self.instances {
            let index: u32 = instance.index.parse().map_err(|_| {
                CoreError::Metadata(format!(
                    "instance '{}' has invalid index '{}'",
                    instance.name, instance.index
                ))
            })?;
            for artifact in &instance.artifacts {
                out.push((
                    ArtifactName::Instance {
                        group: instance.name.clone(),
                        index,
                        job: artifact.name.clone(),
                    },
                    &artifact.checksums,
                ));
            }
        }
        for artifact in &self.custom_artifacts {
            out.push((ArtifactName::Custom(artifact.name.clone()), &artifact.checksums));
        }
        Ok(out)
    }

    pub fn artifact_names(&self) -> Result<BTreeSet<ArtifactName>, CoreError> {
        Ok(self.artifacts()?.into_iter().map(|(name, _)| name).collect())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates artifact checksums during a backup.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    started_at: DateTime<Utc>,
    instances: Vec<InstanceRecord>,
    custom_artifacts: Vec<ArtifactRecord>,
}

impl MetadataBuilder {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            instances: Vec::new(),
            custom_artifacts: Vec::new(),
        }
    }

    pub fn add_artifact(&mut self, name: &ArtifactName, checksums: Checksums) {
        match name {
            ArtifactName::Custom(custom) => self.custom_artifacts.push(ArtifactRecord {
                name: custom.clone(),
                checksums,
            }),
            ArtifactName::Instance { group, index, job } => {
                let index = index.to_string();
                let record = ArtifactRecord {
                    name: job.clone(),
                    checksums,
                };
                match self
                    .instances
                    .iter_mut()
                    .find(|i| &i.name == group && i.index == index)
                {
                    Some(instance) => instance.artifacts.push(record),
                    None => self.instances.push(InstanceRecord {
                        name: group.clone(),
                        index,
                        artifacts: vec![record],
                    }),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.custom_artifacts.is_empty()
    }

    /// Freeze into the serializable form. Records are sorted so the output
    /// does not depend on collection order.
    pub fn finish(mut self, finished_at: DateTime<Utc>) -> BackupMetadata {
        self.instances.sort_by(|a, b| {
            (a.name.as_str(), a.index.parse::<u32>().unwrap_or(u32::MAX))
                .cmp(&(b.name.as_str(), b.index.parse::<u32>().unwrap_or(u32::MAX)))
        });
        for instance in &mut self.instances {
            instance.artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        }
        self.custom_artifacts.sort_by(|a, b| a.name.cmp(&b.name));

        BackupMetadata {
            instances: self.instances,
            custom_artifacts: self.custom_artifacts,
            backup_activity: BackupActivity {
                start_time: self.started_at.format(ACTIVITY_TIME_FORMAT).to_string(),
                finish_time: finished_at.format(ACTIVITY_TIME_FORMAT).to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
