//! Local subprocess management for transport commands.
//!
//! [`run_command`] spawns a prepared [`tokio::process::Command`] (typically
//! `ssh`), optionally feeds bytes to its stdin, captures stdout/stderr and
//! enforces an optional deadline. [`run_piped`] does the same but streams
//! stdin from, and stdout into, arbitrary async readers and writers so
//! archives never have to fit in memory.

use std::io::Cursor;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use crate::session::SessionError;

/// Maximum stderr captured per command (1 MiB). Anything beyond is read
/// and dropped.
const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// Source streamed into a child's stdin.
pub type Input = Box<dyn AsyncRead + Send + Unpin>;

/// Destination a child's stdout is streamed into.
pub type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Raw result of a local subprocess.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// Captured stdout. Empty when stdout was streamed elsewhere.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Bytes written to the stdout destination.
    pub streamed_bytes: u64,
    pub duration_ms: u64,
}

impl RawOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Spawn `cmd`, pipe `stdin` to it (closing stdin afterwards), and collect
/// its output.
///
/// If `timeout` elapses the child is killed and [`SessionError::Timeout`]
/// returned.
pub async fn run_command(
    cmd: &mut Command,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
) -> Result<RawOutput, SessionError> {
    let input = stdin.map(|bytes| Box::new(Cursor::new(bytes)) as Input);
    run_piped(cmd, input, None, timeout).await
}

/// Spawn `cmd`, stream `input` into its stdin and its stdout into
/// `output`.
///
/// Without an `output`, stdout is captured in [`RawOutput::stdout`]. A
/// failure to write `output` is an error even if the child succeeded.
pub async fn run_piped(
    cmd: &mut Command,
    input: Option<Input>,
    output: Option<Output>,
    timeout: Option<Duration>,
) -> Result<RawOutput, SessionError> {
    // `kill_on_drop(true)` ensures the child is killed when dropped (e.g. on timeout).
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd.spawn()?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { drain_stdout(stdout_handle, output).await });
    let stderr_task =
        tokio::spawn(async move { read_capped(stderr_handle, MAX_STDERR_BYTES).await });

    let stdin_task = match (child.stdin.take(), input) {
        (Some(mut pipe), Some(mut source)) => Some(tokio::spawn(async move {
            // The remote side may close early on failure; its exit code reports that.
            if let Err(err) = tokio::io::copy(&mut source, &mut pipe).await {
                tracing::debug!(error = %err, "stdin stream ended early");
            }
            let _ = pipe.shutdown().await;
        })),
        _ => None,
    };

    let wait = async {
        let status = child.wait().await?;
        if let Some(task) = stdin_task {
            let _ = task.await;
        }
        Ok::<_, std::io::Error>(status)
    };

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                return Err(SessionError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        },
        None => wait.await?,
    };

    let (stdout, streamed_bytes) = stdout_task
        .await
        .map_err(|e| SessionError::IoError(std::io::Error::other(e)))??;
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(RawOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
        streamed_bytes,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Copy stdout into `output`, or capture it when there is none.
async fn drain_stdout<R: AsyncRead + Unpin>(
    handle: Option<R>,
    output: Option<Output>,
) -> std::io::Result<(Vec<u8>, u64)> {
    let Some(mut h) = handle else {
        return Ok((Vec::new(), 0));
    };
    match output {
        Some(mut sink) => {
            let copied = tokio::io::copy(&mut h, &mut sink).await?;
            sink.flush().await?;
            sink.shutdown().await?;
            Ok((Vec::new(), copied))
        }
        None => {
            let mut buf = Vec::new();
            h.read_to_end(&mut buf).await?;
            Ok((buf, 0))
        }
    }
}

/// Read a stream to its end, keeping at most `limit` bytes.
///
/// The stream is drained past the limit so the writer never sees a closed
/// pipe.
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut h) = handle else {
        return buf;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match h.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
