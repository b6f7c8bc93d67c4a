//! Connection settings for the Director and instance sessions.

use std::path::PathBuf;
use std::time::Duration;

use bbr_orchestrator::config::ConfigError;
use bbr_remote::ssh::{SshConfig, DEFAULT_SSH_PORT, DEFAULT_SSH_USER};

#[derive(Debug, Clone)]
pub struct DirectorConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_cert: Option<PathBuf>,
}

/// Everything the binary needs beyond the orchestrator's own settings.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub director: DirectorConfig,
    pub ssh: SshConfig,
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                 | Default  |
    /// |-------------------------|----------|
    /// | `BBR_DIRECTOR_URL`      | required |
    /// | `BBR_DIRECTOR_USERNAME` | required |
    /// | `BBR_DIRECTOR_PASSWORD` | required |
    /// | `BBR_DIRECTOR_CA_CERT`  | --       |
    /// | `BBR_SSH_USER`          | `vcap`   |
    /// | `BBR_SSH_PRIVATE_KEY`   | --       |
    /// | `BBR_SSH_PORT`          | `22`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing { name });

        let director = DirectorConfig {
            url: required("BBR_DIRECTOR_URL")?,
            username: required("BBR_DIRECTOR_USERNAME")?,
            password: required("BBR_DIRECTOR_PASSWORD")?,
            ca_cert: lookup("BBR_DIRECTOR_CA_CERT").map(PathBuf::from),
        };

        let port = match lookup("BBR_SSH_PORT") {
            None => DEFAULT_SSH_PORT,
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "BBR_SSH_PORT",
                expected: "a port number",
                value: raw.clone(),
            })?,
        };

        let ssh = SshConfig {
            user: lookup("BBR_SSH_USER").unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            port,
            private_key: lookup("BBR_SSH_PRIVATE_KEY").map(PathBuf::from),
            connect_timeout: Duration::from_secs(30),
            ..SshConfig::default()
        };

        Ok(Self { director, ssh })
    }
}
