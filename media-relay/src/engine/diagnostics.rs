//! Bounded capture of engine diagnostics.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, warn};

const SUMMARY_LINES: usize = 3;
const SUMMARY_MAX_CHARS: usize = 300;
const READ_BUF_SIZE: usize = 4096;

/// Last lines written by the engine to stderr.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Short one-line description of how the engine ended.
    pub fn summary(&self) -> String {
        let skip = self.lines.len().saturating_sub(SUMMARY_LINES);
        let joined = self
            .lines
            .iter()
            .skip(skip)
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" | ");

        if joined.is_empty() {
            return "no diagnostic output".to_string();
        }
        if joined.chars().count() > SUMMARY_MAX_CHARS {
            let truncated: String = joined.chars().take(SUMMARY_MAX_CHARS).collect();
            format!("{truncated}...")
        } else {
            joined
        }
    }

    /// Read `stderr` to EOF, logging each record and keeping the last `capacity`.
    ///
    /// Records end at `\n` or `\r` and are decoded lossily, so invalid UTF-8
    /// never stops the pipe from being drained.
    pub async fn collect<R>(stderr: R, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin,
    {
        let mut tail = Self::new(capacity);
        let mut reader = BufReader::new(stderr);
        let mut pending = Vec::new();
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Stopped reading ffmpeg stderr");
                    break;
                }
            };
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&buf[..n]);

            while let Some(idx) = pending.iter().position(|&b| matches!(b, b'\n' | b'\r')) {
                let record: Vec<u8> = pending.drain(..=idx).collect();
                tail.record(&record[..idx]);
            }
        }

        tail.record(&pending);
        tail
    }

    fn record(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw).trim().to_string();
        if line.is_empty() {
            return;
        }
        if line.to_lowercase().contains("error") {
            warn!("ffmpeg: {}", line);
        } else {
            debug!("ffmpeg: {}", line);
        }
        self.push(line);
    }
}
