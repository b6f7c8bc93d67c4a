//! Remote session seam.
//!
//! The orchestrator never speaks a transport directly; it asks a
//! [`SessionProvider`] for one [`RemoteSession`] per instance and drives
//! everything through the narrow operations below. The session lives for
//! the whole run on that instance and is released with
//! [`RemoteSession::close`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bbr_core::hashing::Checksums;
use bbr_core::instance::InstanceIdentity;

// ---------------------------------------------------------------------------
// Output and errors
// ---------------------------------------------------------------------------

/// Captured result of a remote script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Remote exit status (`-1` if the process was killed by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failures of the session itself, as opposed to a script exiting non-zero.
#[derive(Debug)]
pub enum SessionError {
    /// The session could not be established.
    Connect { address: String, message: String },
    /// A housekeeping command (mkdir, rm, tar, ...) exited non-zero.
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    /// Remote output could not be interpreted.
    InvalidOutput(String),
    /// The command did not finish within its deadline.
    Timeout { elapsed_ms: u64 },
    /// Spawning or talking to the transport process failed.
    IoError(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { address, message } => {
                write!(f, "Failed to connect to {address}: {message}")
            }
            Self::CommandFailed {
                command,
                exit_code,
                stderr,
            } => write!(
                f,
                "Remote command '{command}' failed with exit code {exit_code}: {}",
                stderr.trim()
            ),
            Self::InvalidOutput(msg) => write!(f, "Invalid remote output: {msg}"),
            Self::Timeout { elapsed_ms } => {
                write!(f, "Remote command timed out after {elapsed_ms}ms")
            }
            Self::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Operations the orchestrator performs on one instance.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Instance this session is attached to.
    fn instance(&self) -> &InstanceIdentity;

    /// Run the executable at `path` with extra environment variables.
    ///
    /// A non-zero exit is returned as `Ok` with the exit code set; only
    /// transport problems are errors.
    async fn run_script(
        &self,
        path: &str,
        env: &[(String, String)],
    ) -> Result<CommandOutput, SessionError>;

    /// Absolute paths of every regular file matching
    /// `<jobs_root>/*/bin/bbr/*`.
    async fn list_job_scripts(&self, jobs_root: &str) -> Result<Vec<String>, SessionError>;

    async fn path_exists(&self, path: &str) -> Result<bool, SessionError>;

    /// Create `path` and any missing parents.
    async fn create_directory(&self, path: &str) -> Result<(), SessionError>;

    /// Recursively remove `path`. Removing an absent path succeeds.
    async fn remove_directory(&self, path: &str) -> Result<(), SessionError>;

    /// Stream the contents of `path` as an uncompressed tar archive into
    /// the local file `destination`, replacing it. Returns the archive size.
    async fn download_directory(&self, path: &str, destination: &Path)
        -> Result<u64, SessionError>;

    /// Extract the local tar archive `source` into `path`, creating it if
    /// needed.
    async fn upload_directory(&self, path: &str, source: &Path) -> Result<(), SessionError>;

    /// SHA-256 of every file below `path`, keyed `./relative/path`.
    async fn checksum_directory(&self, path: &str) -> Result<Checksums, SessionError>;

    /// Release the session. Further calls are undefined.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Opens sessions to instances.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(
        &self,
        instance: &InstanceIdentity,
    ) -> Result<Arc<dyn RemoteSession>, SessionError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
