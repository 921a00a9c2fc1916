//! Lifecycle of a single engine process.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use process_utils::tokio_command;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Where an engine invocation is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Failed { exit_code: Option<i32> },
    Killed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Killed)
    }
}

/// Owns one engine process from spawn to exit.
///
/// Dropping a run that is still `Running` kills the process, so an early
/// return or a dropped future cannot leave it behind.
pub struct EngineRun {
    command: Command,
    child: Option<Child>,
    state: RunState,
}

impl EngineRun {
    pub fn new<I, S>(binary: &Path, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = tokio_command(binary);
        command
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Self {
            command,
            child: None,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// OS process id while the process is running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn spawn(&mut self) -> Result<()> {
        if self.state != RunState::NotStarted {
            return Err(Error::Other(format!(
                "engine run cannot start from state {:?}",
                self.state
            )));
        }

        let child = self.command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                Error::EngineUnavailable(format!("cannot execute ffmpeg: {e}"))
            }
            _ => Error::Other(format!("Failed to spawn ffmpeg: {e}")),
        })?;

        debug!(pid = ?child.id(), "ffmpeg started");
        self.child = Some(child);
        self.transition(RunState::Running);
        Ok(())
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| Error::Other("Failed to capture ffmpeg stdout".to_string()))
    }

    pub fn take_stderr(&mut self) -> Result<ChildStderr> {
        self.child
            .as_mut()
            .and_then(|child| child.stderr.take())
            .ok_or_else(|| Error::Other("Failed to capture ffmpeg stderr".to_string()))
    }

    /// Wait for the process to exit and record the outcome.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| Error::Other("ffmpeg was never started".to_string()))?;

        let status = child.wait().await?;
        if status.success() {
            self.transition(RunState::Completed);
        } else {
            self.transition(RunState::Failed {
                exit_code: status.code(),
            });
        }
        Ok(status)
    }

    /// Kill the process and reap it. No-op once the run has ended.
    pub async fn kill(&mut self) {
        if self.state != RunState::Running {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill ffmpeg");
            }
        }
        self.transition(RunState::Killed);
    }

    fn transition(&mut self, next: RunState) {
        match next {
            RunState::Completed => debug!("ffmpeg completed"),
            RunState::Failed { exit_code } => warn!(?exit_code, "ffmpeg failed"),
            RunState::Killed => info!("ffmpeg killed"),
            RunState::NotStarted | RunState::Running => {}
        }
        self.state = next;
    }
}

impl Drop for EngineRun {
    fn drop(&mut self) {
        if self.state != RunState::Running {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.transition(RunState::Killed);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_run_completes() {
        let mut run = EngineRun::new(Path::new("/bin/sh"), ["-c", "exit 0"]);
        assert_eq!(run.state(), RunState::NotStarted);

        run.spawn().unwrap();
        assert_eq!(run.state(), RunState::Running);

        let status = run.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(run.state(), RunState::Completed);
        assert!(run.state().is_terminal());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let mut run = EngineRun::new(Path::new("/bin/sh"), ["-c", "exit 3"]);
        run.spawn().unwrap();
        run.wait().await.unwrap();
        assert_eq!(run.state(), RunState::Failed { exit_code: Some(3) });
    }

    #[tokio::test]
    async fn kill_ends_a_running_process() {
        let mut run = EngineRun::new(Path::new("/bin/sh"), ["-c", "sleep 30"]);
        run.spawn().unwrap();
        run.kill().await;
        assert_eq!(run.state(), RunState::Killed);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let mut run = EngineRun::new(Path::new("/nonexistent/ffmpeg"), ["-version"]);
        let err = run.spawn().unwrap_err();
        assert!(matches!(err, Error::EngineUnavailable(_)));
        assert_eq!(run.state(), RunState::NotStarted);
    }
}
