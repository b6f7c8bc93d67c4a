//! OpenSSH-backed [`SessionProvider`].
//!
//! Each instance gets one multiplexed master connection (`ssh -M` with a
//! private control socket) opened in [`SshSessionProvider::open`] and torn
//! down in [`RemoteSession::close`]. Every operation is a single command
//! sent over that master; the remote shell strings are built by pure
//! functions in this module so they can be checked without a host.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bbr_core::hashing::{checksum_key, Checksums};
use bbr_core::instance::InstanceIdentity;
use tokio::process::Command;

use crate::session::{CommandOutput, RemoteSession, SessionError, SessionProvider};
use crate::subprocess::{run_command, run_piped, Input, Output, RawOutput};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default remote user.
pub const DEFAULT_SSH_USER: &str = "vcap";

/// Deadline for housekeeping commands (not for lifecycle scripts).
const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection parameters shared by every instance of a deployment.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    /// Private key passed with `-i`; the agent/default keys are used if `None`.
    pub private_key: Option<PathBuf>,
    pub connect_timeout: Duration,
    /// Path of the `ssh` binary.
    pub program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: DEFAULT_SSH_USER.to_string(),
            port: DEFAULT_SSH_PORT,
            private_key: None,
            connect_timeout: Duration::from_secs(30),
            program: "ssh".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct SshSessionProvider {
    config: SshConfig,
}

impl SshSessionProvider {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for SshSessionProvider {
    async fn open(
        &self,
        instance: &InstanceIdentity,
    ) -> Result<Arc<dyn RemoteSession>, SessionError> {
        let control_path = std::env::temp_dir().join(format!(
            "bbr-{}.sock",
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        ));
        let session = SshSession {
            instance: instance.clone(),
            config: self.config.clone(),
            control_path,
        };

        let mut cmd = session.base_command();
        cmd.args(["-M", "-N", "-f", "-o", "ControlPersist=yes"]);
        cmd.arg(session.destination());

        tracing::debug!(instance = %instance, address = %instance.address, "Opening SSH session");
        let output = run_command(&mut cmd, None, Some(self.config.connect_timeout * 2)).await?;
        if output.exit_code != 0 {
            return Err(SessionError::Connect {
                address: instance.address.clone(),
                message: output.stderr_lossy().trim().to_string(),
            });
        }
        tracing::info!(instance = %instance, "SSH session established");
        Ok(Arc::new(session))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct SshSession {
    instance: InstanceIdentity,
    config: SshConfig,
    control_path: PathBuf,
}

impl SshSession {
    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.instance.address)
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(ssh_options(&self.config, &self.control_path));
        cmd
    }

    async fn exec(
        &self,
        remote: &str,
        stdin: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<RawOutput, SessionError> {
        let mut cmd = self.base_command();
        cmd.arg(self.destination()).arg("--").arg(remote);
        tracing::trace!(instance = %self.instance, command = %remote, "ssh exec");
        run_command(&mut cmd, stdin, timeout).await
    }

    /// Run an archive transfer, streaming through local files.
    async fn stream(
        &self,
        remote: &str,
        input: Option<Input>,
        output: Option<Output>,
    ) -> Result<RawOutput, SessionError> {
        let mut cmd = self.base_command();
        cmd.arg(self.destination()).arg("--").arg(remote);
        tracing::trace!(instance = %self.instance, command = %remote, "ssh stream");
        let result = run_piped(&mut cmd, input, output, None).await?;
        if result.exit_code != 0 {
            return Err(SessionError::CommandFailed {
                command: remote.to_string(),
                exit_code: result.exit_code,
                stderr: result.stderr_lossy(),
            });
        }
        Ok(result)
    }

    /// Run a housekeeping command and require a zero exit.
    async fn exec_checked(
        &self,
        remote: String,
        stdin: Option<Vec<u8>>,
    ) -> Result<RawOutput, SessionError> {
        let output = self.exec(&remote, stdin, Some(HOUSEKEEPING_TIMEOUT)).await?;
        if output.exit_code != 0 {
            return Err(SessionError::CommandFailed {
                command: remote,
                exit_code: output.exit_code,
                stderr: output.stderr_lossy(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn instance(&self) -> &InstanceIdentity {
        &self.instance
    }

    async fn run_script(
        &self,
        path: &str,
        env: &[(String, String)],
    ) -> Result<CommandOutput, SessionError> {
        let remote = script_command(path, env)?;
        let output = self.exec(&remote, None, None).await?;
        Ok(CommandOutput {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            exit_code: output.exit_code,
        })
    }

    async fn list_job_scripts(&self, jobs_root: &str) -> Result<Vec<String>, SessionError> {
        let output = self.exec_checked(list_scripts_command(jobs_root), None).await?;
        Ok(output
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, SessionError> {
        let output = self.exec_checked(exists_command(path), None).await?;
        match output.stdout_lossy().trim() {
            "present" => Ok(true),
            "absent" => Ok(false),
            other => Err(SessionError::InvalidOutput(format!(
                "unexpected existence check output '{other}'"
            ))),
        }
    }

    async fn create_directory(&self, path: &str) -> Result<(), SessionError> {
        self.exec_checked(sudo_sh(&format!("mkdir -p {}", shell_quote(path))), None)
            .await
            .map(|_| ())
    }

    async fn remove_directory(&self, path: &str) -> Result<(), SessionError> {
        self.exec_checked(sudo_sh(&format!("rm -rf {}", shell_quote(path))), None)
            .await
            .map(|_| ())
    }

    async fn download_directory(
        &self,
        path: &str,
        destination: &Path,
    ) -> Result<u64, SessionError> {
        let remote = sudo_sh(&format!("tar -C {} -cf - .", shell_quote(path)));
        let file = tokio::fs::File::create(destination).await?;
        let output = self.stream(&remote, None, Some(Box::new(file))).await?;
        Ok(output.streamed_bytes)
    }

    async fn upload_directory(&self, path: &str, source: &Path) -> Result<(), SessionError> {
        let quoted = shell_quote(path);
        let remote = sudo_sh(&format!("mkdir -p {quoted} && tar -C {quoted} -xf -"));
        let file = tokio::fs::File::open(source).await?;
        self.stream(&remote, Some(Box::new(file)), None)
            .await
            .map(|_| ())
    }

    async fn checksum_directory(&self, path: &str) -> Result<Checksums, SessionError> {
        let remote = sudo_sh(&format!(
            "cd {} && find . -type f -exec sha256sum {{}} +",
            shell_quote(path)
        ));
        let output = self.exec_checked(remote, None).await?;
        parse_sha256sum_output(&output.stdout_lossy())
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut cmd = self.base_command();
        cmd.args(["-O", "exit"]).arg(self.destination());
        let output = run_command(&mut cmd, None, Some(self.config.connect_timeout)).await?;
        if output.exit_code != 0 {
            tracing::warn!(
                instance = %self.instance,
                stderr = %output.stderr_lossy().trim(),
                "SSH master did not exit cleanly",
            );
        }
        let _ = tokio::fs::remove_file(&self.control_path).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// Options common to every ssh invocation for one session.
pub fn ssh_options(config: &SshConfig, control_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        config.port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", config.connect_timeout.as_secs().max(1)),
        "-S".to_string(),
        control_path.display().to_string(),
    ];
    if let Some(key) = &config.private_key {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Wrap a shell snippet so it runs as root.
pub fn sudo_sh(script: &str) -> String {
    format!("sudo sh -c {}", shell_quote(script))
}

/// Command line that runs a lifecycle script with extra environment.
pub fn script_command(path: &str, env: &[(String, String)]) -> Result<String, SessionError> {
    let mut parts = vec!["sudo".to_string()];
    if !env.is_empty() {
        parts.push("env".to_string());
        for (key, value) in env {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(SessionError::InvalidOutput(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
            parts.push(format!("{key}={}", shell_quote(value)));
        }
    }
    parts.push(shell_quote(path));
    Ok(parts.join(" "))
}

/// Lists every regular file at `<jobs_root>/*/bin/bbr/*`, following the
/// job symlinks the glob walks through.
pub fn list_scripts_command(jobs_root: &str) -> String {
    let root = jobs_root.trim_end_matches('/');
    sudo_sh(&format!(
        "for f in {}/*/bin/bbr/*; do [ -f \"$f\" ] && echo \"$f\"; done; true",
        shell_quote(root)
    ))
}

pub fn exists_command(path: &str) -> String {
    sudo_sh(&format!(
        "if [ -e {} ]; then echo present; else echo absent; fi",
        shell_quote(path)
    ))
}

/// Parse `sha256sum` output (`<hex>  ./path` per line).
pub fn parse_sha256sum_output(output: &str) -> Result<Checksums, SessionError> {
    let mut checksums = Checksums::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let (digest, path) = line
            .split_once("  ")
            .or_else(|| line.split_once(" *"))
            .ok_or_else(|| SessionError::InvalidOutput(format!("bad sha256sum line '{line}'")))?;
        checksums.insert(checksum_key(path), digest.trim().to_string());
    }
    Ok(checksums)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
