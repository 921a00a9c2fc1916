//! Turns a `(key, mode)` request into a delivery and an HTTP response.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::format::{SourceClass, classify, content_type};
use super::sink::{ResponseSink, response_pipe};
use crate::cache::UrlCache;
use crate::downloader::{AcceleratedDownloader, copy_response_body};
use crate::engine::{MediaPipeline, TranscodeTarget};
use crate::utils::http_client::ClientProvider;
use crate::utils::url::log_host;
use crate::{Error, Result};

/// Sum of the source lengths of a muxed stream.
pub const X_ESTIMATED_CONTENT_LENGTH: HeaderName =
    HeaderName::from_static("x-estimated-content-length");

const COMBINED_FILENAME: &str = "inline; filename=\"video.mp4\"";
const COMBINED_CACHE_CONTROL: &str = "no-cache";
const MEDIA_CACHE_CONTROL: &str = "public, max-age=3600";
/// Upper bound on the HEAD probes behind the length estimate.
const ESTIMATE_TIMEOUT: Duration = Duration::from_secs(3);

/// How the bytes for a request are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Mux { video_url: String, audio_url: String },
    Passthrough { url: String },
    Transcode { url: String, target: TranscodeTarget },
}

impl Delivery {
    /// Strategy for a single cached source.
    pub fn for_single(url: String, is_audio: bool) -> Self {
        match classify(&url, is_audio) {
            SourceClass::Standard => Self::Passthrough { url },
            SourceClass::NonStandard => Self::Transcode {
                url,
                target: TranscodeTarget::for_kind(is_audio),
            },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Mux { .. } => "mux",
            Self::Passthrough { .. } => "passthrough",
            Self::Transcode { .. } => "transcode",
        }
    }
}

#[derive(Clone)]
pub struct StreamRouter {
    cache: UrlCache,
    downloader: Arc<AcceleratedDownloader>,
    pipeline: Arc<MediaPipeline>,
    /// Client of the last-resort plain fetch, separate from the downloader's.
    fallback: Arc<dyn ClientProvider>,
}

impl StreamRouter {
    pub fn new(
        cache: UrlCache,
        downloader: Arc<AcceleratedDownloader>,
        pipeline: Arc<MediaPipeline>,
        fallback: Arc<dyn ClientProvider>,
    ) -> Self {
        Self {
            cache,
            downloader,
            pipeline,
            fallback,
        }
    }

    /// Mux the video and audio behind a combined key.
    pub async fn serve_combined(&self, key: &str) -> Result<Response> {
        let key = validate_key(key)?;
        let (video_url, audio_url) = self
            .cache
            .lookup_combined(key)
            .ok_or_else(|| Error::cache_miss(key))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(COMBINED_FILENAME));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(COMBINED_CACHE_CONTROL));
        if let Some(estimate) = self.estimate_length(&video_url, &audio_url).await {
            headers.insert(X_ESTIMATED_CONTENT_LENGTH, HeaderValue::from(estimate));
        }

        info!(key, video = %log_host(&video_url), audio = %log_host(&audio_url), "Serving combined stream");
        self.deliver(Delivery::Mux { video_url, audio_url }, headers)
            .await
    }

    /// Serve a single source, passed through or transcoded.
    pub async fn serve_media(&self, key: &str) -> Result<Response> {
        let key = validate_key(key)?;
        let (url, is_audio) = self
            .cache
            .lookup_single(key)
            .ok_or_else(|| Error::cache_miss(key))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type(is_audio)));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(MEDIA_CACHE_CONTROL));

        let delivery = Delivery::for_single(url, is_audio);
        info!(key, is_audio, strategy = delivery.label(), "Serving media stream");
        self.deliver(delivery, headers).await
    }

    /// Sum of both source lengths, when both origins report one in time.
    async fn estimate_length(&self, video_url: &str, audio_url: &str) -> Option<u64> {
        let cancel = CancellationToken::new();
        let probes = async {
            tokio::join!(
                self.downloader.content_length(video_url, &cancel),
                self.downloader.content_length(audio_url, &cancel),
            )
        };
        let Ok((video, audio)) = tokio::time::timeout(ESTIMATE_TIMEOUT, probes).await else {
            debug!("Length estimate timed out");
            return None;
        };
        let estimate = video?.checked_add(audio?)?;
        debug!(estimate, "Estimated combined length");
        Some(estimate)
    }

    /// Run `delivery` in its own task and answer once the outcome of the
    /// status line is known.
    ///
    /// Until the first byte is written, failures become HTTP errors. After
    /// that the response is committed and the task is only supervised.
    async fn deliver(&self, delivery: Delivery, headers: HeaderMap) -> Result<Response> {
        let cancel = CancellationToken::new();
        // Cancels the delivery if this request is dropped before a response exists.
        let guard = cancel.clone().drop_guard();
        let (mut sink, source, started) = response_pipe();
        let operation = delivery.label();

        let router = self.clone();
        let task_cancel = cancel.clone();
        let task: JoinHandle<(Result<u64>, u64)> = tokio::spawn(async move {
            let result = router.execute(&delivery, &mut sink, &task_cancel).await;
            (result, sink.bytes_written())
        });

        if started.await.is_ok() {
            tokio::spawn(supervise(task, operation));
            return Ok(build_response(headers, source.into_body(guard)));
        }

        // The sink was dropped without a single byte written.
        let (result, _) = task
            .await
            .map_err(|e| Error::Other(format!("{operation} task failed: {e}")))?;
        match result {
            Ok(_) => Ok(build_response(headers, Body::empty())),
            Err(e) if e.is_disconnect() => {
                info!(operation, "Client disconnected before streaming started");
                Ok(build_response(headers, Body::empty()))
            }
            Err(e) => {
                warn!(operation, error = %e, "Delivery failed before streaming started");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        delivery: &Delivery,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        match delivery {
            Delivery::Mux {
                video_url,
                audio_url,
            } => {
                self.pipeline
                    .stream_mux(video_url, audio_url, sink, cancel)
                    .await
            }
            Delivery::Transcode { url, target } => {
                self.pipeline
                    .stream_transcode(url, *target, sink, cancel)
                    .await
            }
            Delivery::Passthrough { url } => self.passthrough(url, sink, cancel).await,
        }
    }

    /// Accelerated download, then a plain fetch if nothing was sent yet.
    async fn passthrough(
        &self,
        url: &str,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let error = match self
            .downloader
            .stream_with_acceleration(url, sink, None, cancel)
            .await
        {
            Ok(bytes) => return Ok(bytes),
            Err(e) => e,
        };

        if error.is_disconnect() {
            return Err(error);
        }
        if sink.bytes_written() > 0 {
            // Appending a second copy would corrupt what the client already has.
            warn!(host = %log_host(url), written = sink.bytes_written(), error = %error, "Download failed mid-stream");
            return Err(error);
        }

        warn!(host = %log_host(url), error = %error, "Accelerated download failed, trying plain fetch");
        self.plain_fetch(url, sink, cancel).await.map_err(|e| {
            if e.is_disconnect()
                || matches!(e, Error::UpstreamStatus { .. } | Error::UpstreamFetch(_))
            {
                e
            } else {
                Error::upstream(e.to_string())
            }
        })
    }

    async fn plain_fetch(
        &self,
        url: &str,
        sink: &mut ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let request = self.fallback.client().get(url).send();
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
        copy_response_body(response, sink, None, cancel).await
    }
}

fn validate_key(key: &str) -> Result<&str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::bad_request("Key is required"));
    }
    Ok(key)
}

fn build_response(headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.headers_mut() = headers;
    response
}

async fn supervise(task: JoinHandle<(Result<u64>, u64)>, operation: &'static str) {
    match task.await {
        Ok((Ok(bytes), _)) => debug!(operation, bytes, "Stream delivered"),
        Ok((Err(e), written)) if e.is_disconnect() => {
            info!(operation, bytes = written, "Client disconnected during streaming")
        }
        Ok((Err(e), written)) => {
            error!(operation, bytes = written, error = %e, "Streaming failed after response was committed")
        }
        Err(e) => error!(operation, error = %e, "Delivery task panicked"),
    }
}
