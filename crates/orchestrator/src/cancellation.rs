//! Interrupt handling for backups.
//!
//! On the first interrupt the [`CancellationController`] switches the
//! [`LogSink`] to buffering, prints a confirmation prompt and waits for an
//! answer while the backup keeps running. The backup only observes the
//! outcome at its stage boundaries through a [`Checkpoint`]:
//!
//! - `yes` / `y`: the buffer is dropped, the sink discards from then on and
//!   the next checkpoint reports cancellation.
//! - anything else, including EOF: the buffer is flushed and output passes
//!   through again.

use std::future::Future;
use std::io::{self, Write};
use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

/// Question shown to the operator after an interrupt.
pub const CANCEL_PROMPT: &str =
    "Stopping a backup can leave the system in bad state. Are you sure you want to cancel? [yes/no]\n";

// ---------------------------------------------------------------------------
// LogSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    PassThrough,
    Buffering,
    Discarding,
}

struct SinkState {
    mode: SinkMode,
    buffer: Vec<u8>,
    out: Box<dyn Write + Send>,
}

/// Operator-facing log output with an optional hold buffer.
///
/// Cloning yields another handle to the same sink. Installed as the
/// `fmt` layer's writer so every log line passes through it.
#[derive(Clone)]
pub struct LogSink {
    state: Arc<Mutex<SinkState>>,
}

impl LogSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                mode: SinkMode::PassThrough,
                buffer: Vec::new(),
                out: Box::new(out),
            })),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    pub fn mode(&self) -> SinkMode {
        self.lock().mode
    }

    /// Hold further output until [`resume`](Self::resume) or
    /// [`discard`](Self::discard).
    pub fn start_buffering(&self) {
        let mut state = self.lock();
        if state.mode == SinkMode::PassThrough {
            state.mode = SinkMode::Buffering;
        }
    }

    /// Flush held output and pass everything through again.
    pub fn resume(&self) -> io::Result<()> {
        let mut state = self.lock();
        if state.mode != SinkMode::Buffering {
            return Ok(());
        }
        let held = std::mem::take(&mut state.buffer);
        state.mode = SinkMode::PassThrough;
        state.out.write_all(&held)?;
        state.out.flush()
    }

    /// Drop held output and swallow everything written from now on.
    pub fn discard(&self) {
        let mut state = self.lock();
        state.buffer.clear();
        state.mode = SinkMode::Discarding;
    }

    /// Write straight to the operator, ignoring the current mode.
    pub fn write_direct(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        state.out.write_all(bytes)?;
        state.out.flush()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        match state.mode {
            SinkMode::PassThrough => state.out.write_all(buf)?,
            SinkMode::Buffering => state.buffer.extend_from_slice(buf),
            SinkMode::Discarding => {}
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        match state.mode {
            SinkMode::PassThrough => state.out.flush(),
            _ => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// What a running backup consults between stages.
#[derive(Clone)]
pub struct Checkpoint {
    token: CancellationToken,
    prompt_open: watch::Receiver<bool>,
}

impl Checkpoint {
    /// A checkpoint that is never cancelled.
    pub fn never() -> Self {
        let (_tx, prompt_open) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            prompt_open,
        }
    }

    /// Wait for any open prompt to be answered, then report whether the
    /// run was cancelled.
    pub async fn reached(&self) -> bool {
        let mut prompt_open = self.prompt_open.clone();
        // A closed channel leaves the last value in place, which is fine.
        let _ = prompt_open.wait_for(|open| !*open).await;
        self.token.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct CancellationController {
    sink: LogSink,
    token: CancellationToken,
    prompt_open: watch::Sender<bool>,
}

impl CancellationController {
    pub fn new(sink: LogSink) -> Self {
        let (prompt_open, _) = watch::channel(false);
        Self {
            sink,
            token: CancellationToken::new(),
            prompt_open,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            token: self.token.clone(),
            prompt_open: self.prompt_open.subscribe(),
        }
    }

    /// Drive `operation` to completion, honoring the first `interrupt`.
    ///
    /// Only one interrupt is ever prompted for; later ones are ignored.
    pub async fn supervise<T, R>(
        &self,
        operation: impl Future<Output = T>,
        interrupt: impl Future<Output = ()>,
        input: R,
    ) -> T
    where
        R: AsyncBufRead + Unpin,
    {
        let mut operation = pin!(operation);
        let mut interrupt = pin!(interrupt);

        tokio::select! {
            output = &mut operation => return output,
            _ = &mut interrupt => {}
        }

        self.sink.start_buffering();
        self.prompt_open.send_replace(true);
        if let Err(err) = self.sink.write_direct(CANCEL_PROMPT.as_bytes()) {
            tracing::debug!(error = %err, "Failed to write cancel prompt");
        }

        let mut answer = pin!(read_answer(input));
        let mut finished = None;
        let abort = loop {
            tokio::select! {
                output = &mut operation, if finished.is_none() => finished = Some(output),
                abort = &mut answer => break abort,
            }
        };

        if abort {
            self.sink.discard();
            self.token.cancel();
        } else if let Err(err) = self.sink.resume() {
            tracing::debug!(error = %err, "Failed to flush buffered output");
        }
        self.prompt_open.send_replace(false);

        match finished {
            Some(output) => output,
            None => operation.await,
        }
    }
}

/// Whether the operator's answer asks to cancel.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}

async fn read_answer<R: AsyncBufRead + Unpin>(mut input: R) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line).await {
        Ok(0) | Err(_) => false,
        Ok(_) => is_affirmative(&line),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
