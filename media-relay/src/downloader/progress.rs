//! Download progress observation.

use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of a running download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    /// Unknown for origins that do not announce a length.
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `[0, 1]`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) | None => None,
            Some(total) => Some((self.bytes_downloaded as f64 / total as f64).min(1.0)),
        }
    }
}

/// Publishing side of a progress channel.
///
/// Backed by a `watch` channel: observers see the latest snapshot and a slow
/// observer never holds up the download.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<DownloadProgress>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<DownloadProgress>) {
        let (tx, rx) = watch::channel(DownloadProgress::default());
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn report(&self, bytes_downloaded: u64, total_bytes: Option<u64>) {
        self.tx.send_replace(DownloadProgress {
            bytes_downloaded,
            total_bytes,
        });
    }
}
