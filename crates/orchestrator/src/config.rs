//! Orchestrator configuration loaded from environment variables.

use bbr_core::script::DEFAULT_JOBS_ROOT;

/// Default remote scratch directory shared by every job on an instance.
pub const DEFAULT_SCRATCH_DIR: &str = "/var/vcap/store/bbr-backup";

/// Default bound on concurrently driven instances.
pub const DEFAULT_MAX_PARALLEL_INSTANCES: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Engine settings.
///
/// All fields have defaults matching the standard instance layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Root of the job directories on every instance.
    pub jobs_root: String,
    /// Remote staging directory; must be absent before and after a run.
    pub scratch_dir: String,
    /// Upper bound on instances worked on at the same time.
    pub max_parallel_instances: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            jobs_root: DEFAULT_JOBS_ROOT.to_string(),
            scratch_dir: DEFAULT_SCRATCH_DIR.to_string(),
            max_parallel_instances: DEFAULT_MAX_PARALLEL_INSTANCES,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                      |
    /// |------------------------------|------------------------------|
    /// | `BBR_JOBS_ROOT`              | `/var/vcap/jobs`             |
    /// | `BBR_REMOTE_SCRATCH_DIR`     | `/var/vcap/store/bbr-backup` |
    /// | `BBR_MAX_PARALLEL_INSTANCES` | `16`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let jobs_root = lookup("BBR_JOBS_ROOT").unwrap_or(defaults.jobs_root);
        let scratch_dir = lookup("BBR_REMOTE_SCRATCH_DIR").unwrap_or(defaults.scratch_dir);

        let max_parallel_instances = match lookup("BBR_MAX_PARALLEL_INSTANCES") {
            None => defaults.max_parallel_instances,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "BBR_MAX_PARALLEL_INSTANCES",
                        expected: "a positive integer",
                        value: raw,
                    })
                }
            },
        };

        if !scratch_dir.starts_with('/') || scratch_dir.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Invalid {
                name: "BBR_REMOTE_SCRATCH_DIR",
                expected: "an absolute path other than /",
                value: scratch_dir,
            });
        }

        Ok(Self {
            jobs_root,
            scratch_dir: scratch_dir.trim_end_matches('/').to_string(),
            max_parallel_instances,
        })
    }
}
