//! Child process runner with live, merged line output.
//!
//! A launched process is exposed as a [`ProcessHandle`]: a line stream
//! followed by an exit code. Stdout and stderr share one pipe, so lines
//! arrive in the order the child wrote them (decoded lossily). The
//! orchestrator only ever waits on "next line or exit", plus the run's
//! cancellation token.

use std::io::{self, BufRead, BufReader, PipeReader};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::command::{Argv, display_argv};
use crate::errors::SpawnError;

/// Lines buffered between the pipe reader and the consumer. The reader stalls
/// (and the OS pipe fills) once the consumer falls this far behind.
const LINE_BUFFER: usize = 256;

/// Exit code reported when the OS gives none (e.g. killed by a signal).
pub const UNKNOWN_EXIT: i32 = -1;

/// Program, arguments and working directory of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Argv,
    pub cwd: PathBuf,
}

impl CommandSpec {
    pub fn new(argv: Argv, cwd: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            cwd: cwd.into(),
        }
    }

    pub fn display(&self) -> String {
        display_argv(&self.argv)
    }
}

/// Starts external processes. Tests substitute a scripted launcher.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &CommandSpec) -> Result<ProcessHandle, SpawnError>;
}

impl<T: ProcessLauncher + ?Sized> ProcessLauncher for Arc<T> {
    fn launch(&self, spec: &CommandSpec) -> Result<ProcessHandle, SpawnError> {
        (**self).launch(spec)
    }
}

/// A running (or finished) process seen as lines then an exit code.
#[derive(Debug)]
pub struct ProcessHandle {
    lines: mpsc::Receiver<String>,
    exit: oneshot::Receiver<i32>,
    kill: CancellationToken,
}

impl ProcessHandle {
    /// Assemble a handle from its channels. `kill` is tripped by [`ProcessHandle::kill`].
    pub fn new(
        lines: mpsc::Receiver<String>,
        exit: oneshot::Receiver<i32>,
        kill: CancellationToken,
    ) -> Self {
        Self { lines, exit, kill }
    }

    /// Next output line, or `None` once every pipe is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Ask the process to terminate. Output already produced stays readable.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the exit code. Await to completion at most once.
    pub async fn wait(&mut self) -> i32 {
        (&mut self.exit).await.unwrap_or(UNKNOWN_EXIT)
    }
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    #[instrument(skip_all, fields(cwd = %spec.cwd.display()))]
    fn launch(&self, spec: &CommandSpec) -> Result<ProcessHandle, SpawnError> {
        let Some((program, args)) = spec.argv.split_first() else {
            return Err(SpawnError {
                command: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty argv"),
            });
        };

        debug!(command = %spec.display(), "spawning child process");
        let spawn_error = |source| SpawnError {
            command: spec.display(),
            source,
        };
        let (reader, writer) = io::pipe().map_err(spawn_error)?;
        let stderr_writer = writer.try_clone().map_err(spawn_error)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer))
            .kill_on_drop(true);
        let spawned = command.spawn();
        // Only the child may hold the write ends, or the pipe never reaches EOF.
        drop(command);
        let child = spawned.map_err(spawn_error)?;

        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
        tokio::task::spawn_blocking(move || forward_lines(reader, line_tx));

        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(child, kill.clone(), exit_tx));

        Ok(ProcessHandle::new(line_rx, exit_rx, kill))
    }
}

/// Read the shared stdout/stderr pipe line by line, replacing undecodable bytes.
fn forward_lines(reader: PipeReader, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.blocking_send(decode_line(&buf)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(err = %e, "failed to read child output");
                break;
            }
        }
    }
}

/// Wait for exit, killing the child first if asked to.
async fn supervise(mut child: Child, kill: CancellationToken, exit_tx: oneshot::Sender<i32>) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            debug!("killing child process");
            if let Err(e) = child.kill().await {
                warn!(err = %e, "failed to kill child process");
            }
            child.wait().await
        }
    };
    let code = match status {
        Ok(status) => status.code().unwrap_or(UNKNOWN_EXIT),
        Err(e) => {
            warn!(err = %e, "failed to wait for child process");
            UNKNOWN_EXIT
        }
    };
    debug!(exit_code = code, "child process finished");
    let _ = exit_tx.send(code);
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
