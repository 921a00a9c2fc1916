//! Upstream HTTP client provisioning.
//!
//! Components never share a mutable client: they ask a [`ClientProvider`]
//! for a handle whose headers were fixed when the pool was built.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

/// Browser-like user agent; several CDNs reject requests without one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Source of upstream HTTP clients.
pub trait ClientProvider: Send + Sync {
    /// A client handle. Clones share the underlying connection pool.
    fn client(&self) -> reqwest::Client;
}

/// Provider backed by a single pooled client built up front.
#[derive(Debug, Clone)]
pub struct DefaultClientProvider {
    client: reqwest::Client,
}

impl DefaultClientProvider {
    /// Build the pool.
    ///
    /// No total request timeout is set: media bodies are long-lived streams
    /// and a deadline would cut them off mid-transfer.
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Self {
        install_rustls_provider();

        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(user_agent).unwrap_or_else(|_| {
            warn!(user_agent, "Invalid user agent; using default");
            HeaderValue::from_static(DEFAULT_USER_AGENT)
        });
        headers.insert(USER_AGENT, ua);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true)
            .pool_max_idle_per_host(20)
            .build()
            .unwrap_or_else(|error| {
                warn!(error = %error, "Failed to build HTTP client; falling back to reqwest defaults");
                reqwest::Client::new()
            });

        Self { client }
    }
}

impl Default for DefaultClientProvider {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT, Duration::from_secs(10))
    }
}

impl ClientProvider for DefaultClientProvider {
    fn client(&self) -> reqwest::Client {
        self.client.clone()
    }
}
