//! Command runner
//!
//! Launches control-plane commands without blocking the caller and buffers
//! their output. Waiting is always bounded; a wait that runs out of time
//! leaves the process alive so the caller can decide whether to kill it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::{tail_lines, Error, Result};

/// Exit code reported for a process terminated by a signal
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// How long `kill` waits for buffered output after the signal
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Launches one kind of external command
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            envs: Vec::new(),
        }
    }

    /// Set an environment variable for every command this runner launches
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Launch the command and return immediately
    ///
    /// Must be called from within a tokio runtime: stdout and stderr are
    /// drained by background tasks so the child never blocks on a full pipe.
    pub fn run<I, S>(&self, args: I) -> Result<CommandInvocation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut command = vec![self.program.display().to_string()];
        command.extend(args.into_iter().map(|a| a.as_ref().to_string()));

        tracing::debug!(command = %command.join(" "), "launching command");

        let mut child = Command::new(&self.program)
            .args(&command[1..])
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::LaunchFailure {
                command: command.join(" "),
                source,
            })?;

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::with_capacity(2);

        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, Arc::clone(&stdout)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, Arc::clone(&stderr)));
        }

        Ok(CommandInvocation {
            command,
            started_at: Utc::now(),
            exit_code: None,
            child,
            stdout,
            stderr,
            readers,
        })
    }
}

fn spawn_reader<R>(mut pipe: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) => {
                    tracing::debug!("output pipe closed: {}", e);
                    break;
                }
            }
        }
    })
}

/// A launched control-plane command
///
/// Output accumulates while the process runs; after `wait` returns an exit
/// code the buffers are complete and no longer change.
#[derive(Debug)]
pub struct CommandInvocation {
    command: Vec<String>,
    started_at: DateTime<Utc>,
    exit_code: Option<i32>,
    child: Child,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
}

impl CommandInvocation {
    /// Wait for the process to exit, up to `timeout`
    ///
    /// A non-zero exit is returned as a code, not an error. On timeout the
    /// process keeps running.
    pub async fn wait(&mut self, timeout: Duration) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        let deadline = Instant::now() + timeout;
        let status = match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                return Err(Error::timeout(
                    format!("'{}'", self.command_line()),
                    timeout,
                    Some(self.output_tail(5)).filter(|t| !t.is_empty()),
                ));
            }
        };

        // Drain whatever is left in the pipes before freezing the buffers
        self.drain_readers(deadline).await;

        let code = status.code().unwrap_or(SIGNALED_EXIT_CODE);
        self.exit_code = Some(code);
        let took = Utc::now() - self.started_at;
        tracing::debug!(
            command = %self.command_line(),
            code,
            took_ms = took.num_milliseconds(),
            "command exited"
        );
        Ok(code)
    }

    /// Force-terminate a command that is still running
    pub async fn kill(&mut self) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        self.drain_readers(Instant::now() + KILL_DRAIN_GRACE).await;
        self.exit_code = Some(SIGNALED_EXIT_CODE);
        Ok(())
    }

    /// Wait for the pipe readers until `deadline`, then abandon them
    ///
    /// A descendant that inherited the pipes can keep them open after the
    /// command itself has exited; its output is not waited for.
    async fn drain_readers(&mut self, deadline: Instant) {
        let mut held_open = false;
        for reader in self.readers.iter_mut() {
            if tokio::time::timeout_at(deadline, reader).await.is_err() {
                held_open = true;
                break;
            }
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if held_open {
            tracing::debug!(
                command = %self.command_line(),
                "output pipe still held open after exit; reader abandoned"
            );
        }
    }

    /// Exit code, once the process has been waited on
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    /// Everything written to stdout so far
    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Everything written to stderr so far
    pub fn stderr(&self) -> Vec<u8> {
        self.stderr.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout()).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr()).into_owned()
    }

    /// Bytes written to stdout after `offset`
    pub fn stdout_since(&self, offset: usize) -> Vec<u8> {
        self.stdout
            .lock()
            .map(|b| b.get(offset..).map(<[u8]>::to_vec).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Last `lines` lines of stdout followed by stderr
    pub fn output_tail(&self, lines: usize) -> String {
        let mut combined = self.stdout_str();
        let stderr = self.stderr_str();
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        tail_lines(&combined, lines)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> CommandRunner {
        CommandRunner::new("sh")
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let mut inv = sh()
            .run(["-c", "echo out; echo err >&2; exit 3"])
            .unwrap();

        let code = inv.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, 3);
        assert_eq!(inv.exit_code(), Some(3));
        assert_eq!(inv.stdout_str(), "out\n");
        assert_eq!(inv.stderr_str(), "err\n");
        assert_eq!(inv.output_tail(5), "out\nerr");
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_failure() {
        let err = CommandRunner::new("/nonexistent/cf-binary")
            .run(["apps"])
            .unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
        assert!(err.to_string().contains("/nonexistent/cf-binary apps"));
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_process_running() {
        let mut inv = sh().run(["-c", "echo started; sleep 5"]).unwrap();

        let err = inv.wait(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(inv.exit_code().is_none());

        inv.kill().await.unwrap();
        assert_eq!(inv.exit_code(), Some(SIGNALED_EXIT_CODE));
        assert_eq!(inv.stdout_str(), "started\n");
    }

    #[tokio::test]
    async fn test_wait_is_bounded_when_descendant_holds_pipes() {
        let started = std::time::Instant::now();
        let mut inv = sh().run(["-c", "sleep 6 & echo hi"]).unwrap();

        let code = inv.wait(Duration::from_secs(1)).await.unwrap();

        assert_eq!(code, 0);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(inv.stdout_str(), "hi\n");
    }

    #[tokio::test]
    async fn test_kill_is_bounded_when_descendant_holds_pipes() {
        let mut inv = sh().run(["-c", "sleep 6 & sleep 5"]).unwrap();
        assert!(inv.wait(Duration::from_millis(200)).await.is_err());

        let started = std::time::Instant::now();
        inv.kill().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(inv.exit_code(), Some(SIGNALED_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_env_is_passed_to_command() {
        let runner = sh().env("CF_HOME", "/tmp/cats-home");
        let mut inv = runner.run(["-c", "printf %s \"$CF_HOME\""]).unwrap();
        inv.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(inv.stdout_str(), "/tmp/cats-home");
    }

    #[tokio::test]
    async fn test_stdout_since_offset() {
        let mut inv = sh().run(["-c", "printf abcdef"]).unwrap();
        inv.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(inv.stdout_since(2), b"cdef".to_vec());
        assert!(inv.stdout_since(100).is_empty());
    }
}
