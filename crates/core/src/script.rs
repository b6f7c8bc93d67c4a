//! Recognized lifecycle script kinds and their convention paths.
//!
//! A job exposes behaviour to the orchestrator purely by placing
//! executables at `<jobs-root>/<job>/bin/bbr/<kind>`. Path construction and
//! parsing here are pure so they can be exercised without a remote session.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default root under which every job's directory lives on an instance.
pub const DEFAULT_JOBS_ROOT: &str = "/var/vcap/jobs";

/// Directory (relative to a job) holding the lifecycle scripts.
pub const SCRIPT_DIR: &str = "bin/bbr";

// ---------------------------------------------------------------------------
// ScriptKind
// ---------------------------------------------------------------------------

/// One of the seven recognized script names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScriptKind {
    Backup,
    Restore,
    PreBackupLock,
    PostBackupUnlock,
    PreRestoreLock,
    PostRestoreUnlock,
    Metadata,
}

impl ScriptKind {
    /// Every recognized kind, in a stable order.
    pub const ALL: [ScriptKind; 7] = [
        ScriptKind::Backup,
        ScriptKind::Restore,
        ScriptKind::PreBackupLock,
        ScriptKind::PostBackupUnlock,
        ScriptKind::PreRestoreLock,
        ScriptKind::PostRestoreUnlock,
        ScriptKind::Metadata,
    ];

    /// File name of the script on disk.
    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Backup => "backup",
            ScriptKind::Restore => "restore",
            ScriptKind::PreBackupLock => "pre-backup-lock",
            ScriptKind::PostBackupUnlock => "post-backup-unlock",
            ScriptKind::PreRestoreLock => "pre-restore-lock",
            ScriptKind::PostRestoreUnlock => "post-restore-unlock",
            ScriptKind::Metadata => "metadata",
        }
    }

    /// Parse a script file name. Unknown names yield `None`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_name() == name)
    }

    /// Whether the kind receives an artifact scratch directory.
    pub fn takes_artifact_directory(self) -> bool {
        matches!(self, ScriptKind::Backup | ScriptKind::Restore)
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

// ---------------------------------------------------------------------------
// Path construction
// ---------------------------------------------------------------------------

/// Absolute remote path of `kind` for `job_name` under `jobs_root`.
///
/// # Examples
///
/// ```
/// use bbr_core::script::{script_path, ScriptKind};
///
/// assert_eq!(
///     script_path("/var/vcap/jobs", "redis", ScriptKind::PreBackupLock),
///     "/var/vcap/jobs/redis/bin/bbr/pre-backup-lock",
/// );
/// ```
pub fn script_path(jobs_root: &str, job_name: &str, kind: ScriptKind) -> String {
    format!(
        "{}/{job_name}/{SCRIPT_DIR}/{}",
        jobs_root.trim_end_matches('/'),
        kind.file_name()
    )
}

/// Split a discovered path back into `(job name, kind)`.
///
/// Returns `None` for paths outside the convention or with an
/// unrecognized script name.
pub fn parse_script_path(jobs_root: &str, path: &str) -> Option<(String, ScriptKind)> {
    let root = jobs_root.trim_end_matches('/');
    let rest = path.strip_prefix(root)?.strip_prefix('/')?;
    let (job, tail) = rest.split_once('/')?;
    let file = tail.strip_prefix(SCRIPT_DIR)?.strip_prefix('/')?;
    if job.is_empty() || file.contains('/') {
        return None;
    }
    ScriptKind::from_file_name(file).map(|kind| (job.to_string(), kind))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_round_trip() {
        for kind in ScriptKind::ALL {
            assert_eq!(ScriptKind::from_file_name(kind.file_name()), Some(kind));
        }
        assert_eq!(ScriptKind::from_file_name("pre-start"), None);
    }

    #[test]
    fn only_backup_and_restore_take_artifact_directory() {
        let taking: Vec<ScriptKind> = ScriptKind::ALL
            .into_iter()
            .filter(|k| k.takes_artifact_directory())
            .collect();
        assert_eq!(taking, vec![ScriptKind::Backup, ScriptKind::Restore]);
    }

    #[test]
    fn path_tolerates_trailing_slash_on_root() {
        assert_eq!(
            script_path("/var/vcap/jobs/", "uaa", ScriptKind::Backup),
            "/var/vcap/jobs/uaa/bin/bbr/backup"
        );
    }

    #[test]
    fn parse_recognized_path() {
        let parsed = parse_script_path(
            DEFAULT_JOBS_ROOT,
            "/var/vcap/jobs/redis-server/bin/bbr/post-backup-unlock",
        );
        assert_eq!(
            parsed,
            Some(("redis-server".to_string(), ScriptKind::PostBackupUnlock))
        );
    }

    #[test]
    fn parse_rejects_foreign_paths() {
        assert_eq!(
            parse_script_path(DEFAULT_JOBS_ROOT, "/var/vcap/jobs/redis/bin/pre-start"),
            None
        );
        assert_eq!(
            parse_script_path(DEFAULT_JOBS_ROOT, "/var/vcap/jobs/redis/bin/bbr/unknown"),
            None
        );
        assert_eq!(
            parse_script_path(DEFAULT_JOBS_ROOT, "/var/vcap/jobs/redis/bin/bbr/sub/backup"),
            None
        );
        assert_eq!(
            parse_script_path(DEFAULT_JOBS_ROOT, "/opt/jobs/redis/bin/bbr/backup"),
            None
        );
    }

    #[test]
    fn construct_then_parse_is_identity() {
        for kind in ScriptKind::ALL {
            let path = script_path("/srv/jobs", "job-a", kind);
            assert_eq!(
                parse_script_path("/srv/jobs", &path),
                Some(("job-a".to_string(), kind))
            );
        }
    }
}
