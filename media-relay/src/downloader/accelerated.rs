//! Parallel ranged downloader with single-connection fallback.
//!
//! The parallel path buffers every chunk until all of them have arrived and
//! only then writes them out in offset order. Peak memory is therefore the
//! size of the resource, in exchange for never emitting partial output when
//! a chunk fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use futures::future::try_join_all;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::chunks::{AcceleratorConfig, ByteRange, plan_chunks};
use super::progress::ProgressReporter;
use crate::utils::http_client::ClientProvider;
use crate::utils::url::log_host;
use crate::{Error, Result};

/// What a header-only request revealed about the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub content_length: Option<u64>,
    pub accepts_ranges: bool,
}

impl ProbeResult {
    /// Length to split into chunks, if the origin supports byte ranges.
    pub fn ranged_length(&self) -> Option<u64> {
        self.content_length
            .filter(|length| self.accepts_ranges && *length > 0)
    }
}

/// Downloads a remote resource into a sink as fast as the origin allows.
pub struct AcceleratedDownloader {
    clients: Arc<dyn ClientProvider>,
    config: AcceleratorConfig,
}

impl AcceleratedDownloader {
    pub fn new(clients: Arc<dyn ClientProvider>, config: AcceleratorConfig) -> Self {
        Self { clients, config }
    }

    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Issue a HEAD request and read length and range support.
    pub async fn probe(&self, url: &str, cancel: &CancellationToken) -> Result<ProbeResult> {
        let request = self.clients.client().head(url).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientDisconnected),
            response = request => response?,
        };

        if !response.status().is_success() {
            return Err(Error::UpstreamStatus {
                status: response.status().as_u16(),
                host: log_host(url),
            });
        }

        let headers = response.headers();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let accepts_ranges = headers
            .get_all(ACCEPT_RANGES)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"));

        Ok(ProbeResult {
            content_length,
            accepts_ranges,
        })
    }

    /// Content length of a resource, `None` when it cannot be determined.
    pub async fn content_length(&self, url: &str, cancel: &CancellationToken) -> Option<u64> {
        match self.probe(url, cancel).await {
            Ok(probe) => probe.content_length,
            Err(e) => {
                debug!(host = %log_host(url), error = %e, "Content length unavailable");
                None
            }
        }
    }

    /// Write the resource at `url` into `sink`, returning the number of bytes written.
    ///
    /// Uses parallel ranged requests when the probe allows it. A failed
    /// probe, an origin without range support, or any failed chunk sends the
    /// download over a single connection instead; the parallel path writes
    /// nothing before every chunk has arrived, so that retry starts clean.
    pub async fn stream_with_acceleration<W>(
        &self,
        url: &str,
        sink: &mut W,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let host = log_host(url);

        let probe = match self.probe(url, cancel).await {
            Ok(probe) => probe,
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => {
                warn!(host = %host, error = %e, "Probe failed, falling back to single connection");
                return self
                    .stream_single_connection(url, sink, progress, cancel)
                    .await;
            }
        };

        let Some(length) = probe.ranged_length() else {
            info!(host = %host, ?probe, "Origin does not support range requests, using single connection");
            return self
                .stream_single_connection(url, sink, progress, cancel)
                .await;
        };

        info!(
            host = %host,
            length,
            connections = self.config.max_parallelism,
            "Starting accelerated download"
        );

        let chunks = match self.fetch_chunks(url, length, progress, cancel).await {
            Ok(chunks) => chunks,
            Err(e) if e.is_disconnect() || cancel.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(host = %host, error = %e, "Parallel download failed, retrying over a single connection");
                return self
                    .stream_single_connection(url, sink, progress, cancel)
                    .await;
            }
        };

        let written = write_in_order(&chunks, sink, cancel).await?;
        info!(host = %host, bytes = written, "Accelerated download completed");
        Ok(written)
    }

    /// Stream the resource over one connection, copying as bytes arrive.
    pub async fn stream_single_connection<W>(
        &self,
        url: &str,
        sink: &mut W,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let request = self.clients.client().get(url).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientDisconnected),
            response = request => response?,
        };

        if !response.status().is_success() {
            return Err(Error::UpstreamStatus {
                status: response.status().as_u16(),
                host: log_host(url),
            });
        }

        let written = copy_response_body(response, sink, progress, cancel).await?;
        debug!(host = %log_host(url), bytes = written, "Single connection download completed");
        Ok(written)
    }

    async fn fetch_chunks(
        &self,
        url: &str,
        length: u64,
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>> {
        let ranges = plan_chunks(length, &self.config);
        debug!(
            chunks = ranges.len(),
            chunk_size = self.config.chunk_size(length),
            "Planned ranged download"
        );

        // Per-download limiter: unrelated requests never queue behind each other.
        let limiter = Semaphore::new(self.config.max_parallelism.max(1));
        let received = AtomicU64::new(0);
        let client = self.clients.client();

        let fetches = ranges.iter().enumerate().map(|(index, range)| {
            let (limiter, received, client) = (&limiter, &received, &client);
            async move {
                let _permit = limiter
                    .acquire()
                    .await
                    .map_err(|e| Error::Other(format!("Chunk limiter closed: {e}")))?;
                let data = fetch_range(client, url, *range).await?;

                let size = data.len() as u64;
                let total = received.fetch_add(size, Ordering::Relaxed) + size;
                if let Some(progress) = progress {
                    progress.report(total, Some(length));
                }
                trace!(index, start = range.start, end = range.end, "Chunk downloaded");
                Ok::<_, Error>(data)
            }
        });

        // try_join_all keeps input order and drops the remaining requests on
        // the first failure.
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::ClientDisconnected),
            chunks = try_join_all(fetches) => chunks,
        }
    }
}

async fn fetch_range(client: &reqwest::Client, url: &str, range: ByteRange) -> Result<Bytes> {
    let response = client
        .get(url)
        .header(RANGE, range.header_value())
        .send()
        .await?;

    // A 200 here would carry the whole resource, not the requested slice.
    if response.status() != StatusCode::PARTIAL_CONTENT {
        return Err(Error::UpstreamStatus {
            status: response.status().as_u16(),
            host: log_host(url),
        });
    }

    let data = response.bytes().await?;
    if data.len() as u64 != range.len() {
        return Err(Error::upstream(format!(
            "chunk {}-{} returned {} bytes, expected {}",
            range.start,
            range.end,
            data.len(),
            range.len()
        )));
    }
    Ok(data)
}

async fn write_in_order<W>(chunks: &[Bytes], sink: &mut W, cancel: &CancellationToken) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    for chunk in chunks {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientDisconnected),
            result = sink.write_all(chunk) => result?,
        }
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(written)
}

/// Copy a response body into `sink` incrementally.
pub async fn copy_response_body<W>(
    response: reqwest::Response,
    sink: &mut W,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let total = response.content_length();
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientDisconnected),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ClientDisconnected),
            result = sink.write_all(&chunk) => result?,
        }
        written += chunk.len() as u64;
        if let Some(progress) = progress {
            progress.report(written, total);
        }
    }

    sink.flush().await?;
    Ok(written)
}
