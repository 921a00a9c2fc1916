//! External mux/transcode engine (ffmpeg).
//!
//! The engine fetches its inputs itself; this module only builds the command
//! line, supervises the process and relays its stdout to a sink as it is
//! produced.

mod args;
mod diagnostics;
mod run;

pub use args::{TranscodeTarget, mux_args, transcode_args};
pub use diagnostics::StderrTail;
pub use run::{EngineRun, RunState};

use std::path::{Path, PathBuf};
use std::process::Stdio;

use process_utils::{find_executable, tokio_command};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::utils::http_client::DEFAULT_USER_AGENT;
use crate::{Error, Result};

/// Directories searched after `PATH`.
pub const WELL_KNOWN_DIRS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "/opt/ffmpeg/bin",
    "/snap/bin",
    "C:\\ffmpeg\\bin",
    "C:\\Program Files\\ffmpeg\\bin",
];

pub const DEFAULT_STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit executable; discovered on `PATH` when unset.
    pub binary_path: Option<PathBuf>,
    pub user_agent: String,
    pub stderr_tail_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }
}

/// Runs the engine and streams its output.
pub struct MediaPipeline {
    config: EngineConfig,
    binary: Option<PathBuf>,
}

impl MediaPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let binary = config
            .binary_path
            .clone()
            .or_else(|| find_executable("ffmpeg", WELL_KNOWN_DIRS));

        match &binary {
            Some(path) => info!(path = %path.display(), "Using ffmpeg"),
            None => warn!("ffmpeg not found; mux and transcode requests will fail"),
        }

        Self { config, binary }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    /// First line of `ffmpeg -version`.
    pub async fn version(&self) -> Option<String> {
        let binary = self.binary.as_ref()?;
        let output = tokio_command(binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        String::from_utf8(output.stdout)
            .ok()
            .and_then(|s| s.lines().next().map(|l| l.to_string()))
    }

    /// Combine the video of one source with the audio of another, without re-encoding.
    pub async fn stream_mux<W>(
        &self,
        video_url: &str,
        audio_url: &str,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let args = mux_args(video_url, audio_url, &self.config.user_agent);
        self.run("mux", args, sink, cancel).await
    }

    /// Re-encode one source into the normalized format for its kind.
    pub async fn stream_transcode<W>(
        &self,
        source_url: &str,
        target: TranscodeTarget,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let args = transcode_args(source_url, target, &self.config.user_agent);
        self.run("transcode", args, sink, cancel).await
    }

    async fn run<W>(
        &self,
        operation: &'static str,
        args: Vec<String>,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let binary = self.binary.as_deref().ok_or_else(|| {
            Error::EngineUnavailable("ffmpeg executable not found".to_string())
        })?;

        debug!(operation, ?args, "Starting ffmpeg");
        let mut run = EngineRun::new(binary, &args);
        run.spawn()?;

        let mut stdout = run.take_stdout()?;
        let stderr = run.take_stderr()?;
        let capacity = self.config.stderr_tail_lines;
        let diagnostics = tokio::spawn(StderrTail::collect(stderr, capacity));

        let relayed = tokio::select! {
            _ = cancel.cancelled() => Err(Error::EngineKilled),
            copied = tokio::io::copy(&mut stdout, sink) => copied.map_err(Error::from),
        };

        let bytes = match relayed {
            Ok(bytes) => bytes,
            Err(e) => {
                run.kill().await;
                diagnostics.abort();
                if e.is_disconnect() {
                    info!(operation, "ffmpeg stopped, client went away");
                } else {
                    warn!(operation, error = %e, "ffmpeg relay failed");
                }
                return Err(e);
            }
        };

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                run.kill().await;
                diagnostics.abort();
                return Err(Error::EngineKilled);
            }
            status = run.wait() => status?,
        };
        let tail = diagnostics.await.unwrap_or_default();

        if !status.success() {
            let summary = tail.summary();
            warn!(operation, exit_code = ?status.code(), %summary, "ffmpeg exited with failure");
            return Err(Error::EngineFailed {
                exit_code: status.code(),
                summary,
            });
        }

        sink.flush().await?;
        info!(operation, bytes, "ffmpeg finished");
        Ok(bytes)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn fake_engine(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn pipeline(binary: PathBuf) -> MediaPipeline {
        MediaPipeline::new(EngineConfig {
            binary_path: Some(binary),
            ..EngineConfig::default()
        })
    }

    #[tokio::test]
    async fn relays_stdout_to_sink() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let script = format!(
            "printf '%s\\n' \"$@\" > '{}'\nprintf 'fragment-1'\nprintf 'fragment-2'",
            args_file.display()
        );
        let engine = pipeline(fake_engine(dir.path(), &script));
        let mut sink = Vec::new();

        let bytes = engine
            .stream_mux("https://v.test/v.mp4", "https://a.test/a.m4a", &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink, b"fragment-1fragment-2");
        assert_eq!(bytes, 20);
        let recorded = std::fs::read_to_string(args_file).unwrap();
        assert!(recorded.lines().any(|l| l == "https://v.test/v.mp4"));
        assert!(recorded.lines().any(|l| l == "1:a"));
    }

    #[tokio::test]
    async fn nonzero_exit_reports_summary() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo 'Error opening input: 403 Forbidden' >&2\nexit 1";
        let engine = pipeline(fake_engine(dir.path(), script));
        let mut sink = Vec::new();

        let err = engine
            .stream_transcode("https://x.test/a.webm", TranscodeTarget::Mp3Audio, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::EngineFailed { exit_code, summary } => {
                assert_eq!(exit_code, Some(1));
                assert!(summary.contains("403 Forbidden"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_utf8_stderr_keeps_engine_running() {
        let dir = tempfile::tempdir().unwrap();
        let script = "printf 'bad \\377 byte\\n' >&2\n\
                      sleep 0.2\n\
                      i=0\n\
                      while [ $i -lt 50 ]; do echo \"progress $i\" >&2; i=$((i + 1)); done\n\
                      printf 'payload'";
        let engine = pipeline(fake_engine(dir.path(), script));
        let mut sink = Vec::new();

        let bytes = engine
            .stream_mux("https://v.test/v.mp4", "https://a.test/a.m4a", &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink, b"payload");
        assert_eq!(bytes, 7);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let engine = pipeline(PathBuf::from("/nonexistent/dir/ffmpeg"));
        let mut sink = Vec::new();

        let err = engine
            .stream_transcode("https://x.test/v.webm", TranscodeTarget::Mp4Video, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineUnavailable(_)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("echo $$ > '{}'\nexec sleep 30", pid_file.display());
        let engine = pipeline(fake_engine(dir.path(), &script));
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut sink = Vec::new();
                engine.stream_mux("v", "a", &mut sink, &cancel).await
            })
        };

        let pid = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(pid) = std::fs::read_to_string(&pid_file) {
                    if let Ok(pid) = pid.trim().parse::<u32>() {
                        return pid;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::EngineKilled)));
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[tokio::test]
    async fn version_reads_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let engine = pipeline(fake_engine(
            dir.path(),
            "echo 'ffmpeg version 7.0-test'\necho 'built with gcc'",
        ));
        assert_eq!(engine.version().await.as_deref(), Some("ffmpeg version 7.0-test"));
    }
}
