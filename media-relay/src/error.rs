//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Cache key expired or not found: {key}")]
    CacheMiss { key: String },

    #[error("Media engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Media engine exited with code {exit_code:?}: {summary}")]
    EngineFailed {
        exit_code: Option<i32>,
        summary: String,
    },

    #[error("Media engine was killed before it finished")]
    EngineKilled,

    #[error("Upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("Upstream returned HTTP {status} for {host}")]
    UpstreamStatus { status: u16, host: String },

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn cache_miss(key: impl Into<String>) -> Self {
        Self::CacheMiss { key: key.into() }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamFetch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the error means the client went away rather than something broke.
    ///
    /// Covers explicit cancellation, an engine killed because of it, and
    /// write failures on a response body nobody is reading anymore.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ClientDisconnected | Self::EngineKilled => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
