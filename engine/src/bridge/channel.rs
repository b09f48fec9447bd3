//! Process channel
//!
//! One request/response round trip with a freshly spawned process: write the
//! payload to stdin, close it, drain stdout and stderr to completion, all under
//! a single deadline measured from spawn.
//!
//! The child lives inside a [`ChildGuard`]. Every way out of a round trip
//! (normal exit, I/O error, deadline, or the caller dropping the future) ends
//! with the process and its process group killed or already reaped.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::config::InferenceConfig;

/// Default deadline for one round trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Working directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("I/O error while talking to the process: {0}")]
    Io(#[from] io::Error),

    #[error("Process did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Everything a finished process produced
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Spawns one process per round trip with a fixed program, arguments and
/// working directory.
#[derive(Debug, Clone)]
pub struct ProcessChannel {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ProcessChannel {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            config.working_dir.clone(),
        )
        .with_timeout(config.timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the program once, feeding it `payload` on stdin.
    ///
    /// Returns whatever the process printed along with its exit status. A
    /// non-zero exit is not an error at this layer.
    pub async fn round_trip(&self, payload: &[u8]) -> Result<ProcessOutput, ChannelError> {
        if !self.working_dir.is_dir() {
            return Err(ChannelError::MissingWorkingDir(self.working_dir.clone()));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so helpers the program forks die with it
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let child = command.spawn().map_err(|source| ChannelError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let mut guard = ChildGuard::new(child);
        debug!(pid = ?guard.pid, program = %self.program, "Spawned inference process");

        let outcome = tokio::time::timeout(self.timeout, guard.exchange(payload)).await;

        match outcome {
            Ok(Ok((status, stdout, stderr))) => {
                let elapsed = started.elapsed();
                debug!(
                    pid = ?guard.pid,
                    status = %status,
                    stdout_bytes = stdout.len(),
                    stderr_bytes = stderr.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Inference process exited"
                );
                Ok(ProcessOutput {
                    status,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    elapsed,
                })
            }
            Ok(Err(e)) => Err(ChannelError::Io(e)),
            Err(_) => {
                warn!(
                    pid = ?guard.pid,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Inference process exceeded deadline, terminating"
                );
                guard.terminate().await;
                Err(ChannelError::DeadlineExceeded(self.timeout))
            }
        }
    }
}

/// Exclusive owner of a running child for the duration of one round trip
struct ChildGuard {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            reaped: false,
        }
    }

    /// Write the payload, close stdin, and drain both output streams
    /// concurrently before waiting for exit.
    async fn exchange(&mut self, payload: &[u8]) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
        let stdin = self.child.stdin.take();
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();

        let (_, out, err) = tokio::try_join!(
            write_and_close(stdin, payload),
            read_all(stdout),
            read_all(stderr),
        )?;

        let status = self.child.wait().await?;
        self.reaped = true;
        Ok((status, out, err))
    }

    /// Kill the process group and the child, then wait for the child to go.
    async fn terminate(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.kill().await {
            debug!(pid = ?self.pid, error = %e, "Kill after deadline failed");
        }
        self.reaped = true;
    }

    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // ESRCH just means the group is already gone
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}

async fn write_and_close(stdin: Option<ChildStdin>, payload: &[u8]) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    match stdin.write_all(payload).await {
        Ok(()) => {}
        // The process exited without reading its input
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        Err(e) => return Err(e),
    }

    // Dropping stdin closes the pipe and signals end of input
    drop(stdin);
    Ok(())
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
