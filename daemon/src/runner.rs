//! External command execution
//!
//! Everything the daemon learns about the machine comes from running shell
//! commands, so all process handling is funnelled through [`CommandRunner`].
//! Tests substitute a scripted runner; production uses [`ShellRunner`].

use std::future::Future;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

/// Runs shell commands and captures what they print
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`, appending its standard output to `out`
    async fn run(&self, command: &str, out: &mut String) -> RunnerResult<()>;

    /// Run `command`, streaming its standard output into a new file at `path`
    async fn run_to_file(&self, command: &str, path: &Path) -> RunnerResult<()>;

    /// Run `command` and return its exit code (`-1` when killed by a signal)
    async fn execute(&self, command: &str) -> RunnerResult<i32>;
}

/// Runs commands through `sh -c`, each bounded by a timeout.
///
/// On unix every command leads its own process group. A command that outlives
/// the timeout has its whole group killed, pipeline members included, and is
/// reported as [`RunnerError::Timeout`].
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn spawn_captured(command: &str) -> RunnerResult<Child> {
        Self::command(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RunnerError::Spawn { command: command.to_string(), source })
    }

    /// Await `fut`, killing the process group led by `pid` if it runs out of time
    async fn bounded<T, F>(&self, command: &str, pid: Option<u32>, fut: F) -> RunnerResult<T>
    where
        F: Future<Output = RunnerResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                kill_process_group(pid);
                Err(RunnerError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(pgid, error = %err, "Could not kill process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn io_error(command: &str) -> impl Fn(io::Error) -> RunnerError + '_ {
    move |source| RunnerError::Io { command: command.to_string(), source }
}

fn take_stdout(child: &mut Child, command: &str) -> RunnerResult<impl AsyncRead + Unpin> {
    child.stdout.take().ok_or_else(|| RunnerError::Io {
        command: command.to_string(),
        source: io::Error::new(io::ErrorKind::Other, "stdout was not captured"),
    })
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, out: &mut String) -> RunnerResult<()> {
        let mut child = Self::spawn_captured(command)?;
        let stdout = take_stdout(&mut child, command)?;
        let pid = child.id();

        self.bounded(command, pid, async {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                line.clear();
                let read = reader.read_until(b'\n', &mut line).await.map_err(io_error(command))?;
                if read == 0 {
                    break;
                }
                out.push_str(&String::from_utf8_lossy(&line));
            }
            let status = child.wait().await.map_err(io_error(command))?;
            debug!(command, ?status, bytes = out.len(), "Command finished");
            Ok(())
        })
        .await
    }

    async fn run_to_file(&self, command: &str, path: &Path) -> RunnerResult<()> {
        let mut child = Self::spawn_captured(command)?;
        let stdout = take_stdout(&mut child, command)?;
        let output_error = |source: io::Error| RunnerError::Output { path: path.to_path_buf(), source };

        let pid = child.id();
        let file = File::create(path).await.map_err(output_error)?;

        self.bounded(command, pid, async {
            let mut reader = BufReader::new(stdout);
            let mut writer = BufWriter::new(file);
            let mut line = Vec::new();
            loop {
                line.clear();
                let read = reader.read_until(b'\n', &mut line).await.map_err(io_error(command))?;
                if read == 0 {
                    break;
                }
                writer.write_all(&line).await.map_err(output_error)?;
            }
            writer.flush().await.map_err(output_error)?;
            child.wait().await.map_err(io_error(command))?;
            Ok(())
        })
        .await
    }

    async fn execute(&self, command: &str) -> RunnerResult<i32> {
        let mut child = Self::command(command)
            .spawn()
            .map_err(|source| RunnerError::Spawn { command: command.to_string(), source })?;

        let pid = child.id();
        let status = self
            .bounded(command, pid, async { child.wait().await.map_err(io_error(command)) })
            .await?;
        Ok(status.code().unwrap_or(-1))
    }
}
