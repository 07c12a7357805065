use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use relay_core::errors::BackendError;

/// Env vars that make agent CLIs refuse to start when they detect they are
/// nested inside their own host session. Stripped before every spawn.
pub const NESTED_SESSION_VARS: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_SESSION"];

/// How long to keep reading pipes after killing a timed-out child.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// One CLI subprocess invocation.
#[derive(Clone, Debug)]
pub struct CliCommand {
    pub backend: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub install_hint: &'static str,
}

impl CliCommand {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in NESTED_SESSION_VARS {
            cmd.env_remove(var);
        }
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> BackendError {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackendError::NotInstalled {
                backend: self.backend.clone(),
                hint: self.install_hint.to_string(),
            }
        } else {
            BackendError::Spawn {
                backend: self.backend.clone(),
                detail: e.to_string(),
            }
        }
    }
}

/// Captured result of a finished (or killed) subprocess.
#[derive(Clone, Debug, Default)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub timed_out: bool,
}

impl CliOutput {
    /// Resolve to the trimmed output text.
    ///
    /// Any captured output wins, even after a timeout kill or a non-zero
    /// exit. Otherwise timeouts and exit failures stay distinct.
    pub fn into_text(self, cmd: &CliCommand) -> Result<String, BackendError> {
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            if self.timed_out {
                warn!(backend = %cmd.backend, "using partial output captured before timeout");
            }
            return Ok(stdout.to_string());
        }
        if self.timed_out {
            return Err(BackendError::Timeout {
                backend: cmd.backend.clone(),
                timeout: cmd.timeout,
            });
        }
        match self.code {
            Some(0) => Err(BackendError::EmptyOutput {
                backend: cmd.backend.clone(),
            }),
            code => {
                let stderr = self.stderr.trim();
                Err(BackendError::Exit {
                    backend: cmd.backend.clone(),
                    code,
                    detail: if stderr.is_empty() {
                        "no output".to_string()
                    } else {
                        stderr.to_string()
                    },
                })
            }
        }
    }
}

/// Run a subprocess to completion under a hard wall-clock timeout.
///
/// On timeout the child is killed and whatever it wrote so far is returned
/// with `timed_out` set.
pub async fn run_cli(cmd: &CliCommand) -> Result<CliOutput, BackendError> {
    debug!(backend = %cmd.backend, program = %cmd.program, cwd = %cmd.cwd.display(), "spawning");
    let mut child = cmd.command().spawn().map_err(|e| cmd.spawn_error(e))?;

    let (stdout_buf, stdout_task) = drain_pipe(child.stdout.take());
    let (stderr_buf, stderr_task) = drain_pipe(child.stderr.take());

    let (code, timed_out) = match tokio::time::timeout(cmd.timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(e)) => {
            return Err(BackendError::Spawn {
                backend: cmd.backend.clone(),
                detail: format!("wait failed: {e}"),
            })
        }
        Err(_) => {
            warn!(backend = %cmd.backend, timeout_secs = cmd.timeout.as_secs(), "killing timed-out subprocess");
            if let Err(e) = child.kill().await {
                warn!(backend = %cmd.backend, error = %e, "kill failed");
            }
            (None, true)
        }
    };

    // Grandchildren may keep the pipes open after a kill.
    let grace = timed_out.then_some(KILL_GRACE);
    let stdout = collect_pipe(stdout_buf, stdout_task, grace).await;
    let stderr = collect_pipe(stderr_buf, stderr_task, grace).await;

    Ok(CliOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        code,
        timed_out,
    })
}

type PipeBuffer = Arc<Mutex<Vec<u8>>>;

fn drain_pipe<R>(pipe: Option<R>) -> (PipeBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = PipeBuffer::default();
    let sink = buf.clone();
    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
            }
        }
    });
    (buf, task)
}

async fn collect_pipe(buf: PipeBuffer, mut task: JoinHandle<()>, grace: Option<Duration>) -> Vec<u8> {
    match grace {
        Some(grace) => {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }
        None => {
            let _ = task.await;
        }
    }
    let bytes = std::mem::take(&mut *buf.lock());
    bytes
}

pin_project_lite::pin_project! {
    /// A child's stdout as a byte stream. Dropping it kills the child.
    pub struct ChildStdoutStream {
        #[pin]
        inner: ReaderStream<ChildStdout>,
        child: Child,
    }
}

impl Stream for ChildStdoutStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Spawn a subprocess and expose its stdout incrementally. Stderr is discarded.
pub fn spawn_stdout_stream(cmd: &CliCommand) -> Result<ChildStdoutStream, BackendError> {
    let mut command = cmd.command();
    command.stderr(Stdio::null());
    let mut child = command.spawn().map_err(|e| cmd.spawn_error(e))?;
    let stdout = child.stdout.take().ok_or_else(|| BackendError::Spawn {
        backend: cmd.backend.clone(),
        detail: "stdout not captured".into(),
    })?;
    Ok(ChildStdoutStream {
        inner: ReaderStream::new(stdout),
        child,
    })
}
