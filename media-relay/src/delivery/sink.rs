//! Byte pipe between a delivery task and the HTTP response body.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use axum::body::Body;
use futures::StreamExt;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::DropGuard;

const PIPE_CAPACITY: usize = 256 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// Write half handed to downloaders and the engine.
///
/// Signals once when the first byte goes through, which is the point after
/// which the response status can no longer change.
pub struct ResponseSink {
    inner: DuplexStream,
    first_write: Option<oneshot::Sender<()>>,
    written: u64,
}

impl ResponseSink {
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl AsyncWrite for ResponseSink {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        if n > 0 {
            this.written += n as u64;
            if let Some(tx) = this.first_write.take() {
                let _ = tx.send(());
            }
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Read half, turned into a response body once the first byte is in.
pub struct ResponseSource {
    reader: DuplexStream,
}

impl ResponseSource {
    /// Body streaming everything the sink receives.
    ///
    /// `guard` lives as long as the body: when the client goes away the body
    /// is dropped and the guarded token is cancelled.
    pub fn into_body(self, guard: DropGuard) -> Body {
        let stream = ReaderStream::with_capacity(self.reader, READ_CHUNK).map(move |chunk| {
            let _guard = &guard;
            chunk
        });
        Body::from_stream(stream)
    }
}

/// Create a sink, its body source and the first-write signal.
pub fn response_pipe() -> (ResponseSink, ResponseSource, oneshot::Receiver<()>) {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (tx, rx) = oneshot::channel();
    let sink = ResponseSink {
        inner: writer,
        first_write: Some(tx),
        written: 0,
    };
    (sink, ResponseSource { reader }, rx)
}
