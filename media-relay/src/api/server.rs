//! API server setup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::cache::UrlCache;
use crate::config::RelayConfig;
use crate::delivery::StreamRouter;
use crate::downloader::AcceleratedDownloader;
use crate::engine::MediaPipeline;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::references::ReferenceBuilder;
use crate::utils::http_client::{ClientProvider, DefaultClientProvider};

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    pub cache_cleanup_interval: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        RelayConfig::default().into()
    }
}

impl From<&RelayConfig> for ApiServerConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
            cache_cleanup_interval: config.cache_cleanup_interval,
        }
    }
}

impl ApiServerConfig {
    /// Address the HTTP server binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid bind address: {e}")))
    }
}

impl From<RelayConfig> for ApiServerConfig {
    fn from(config: RelayConfig) -> Self {
        (&config).into()
    }
}

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub cache: UrlCache,
    pub stream_router: StreamRouter,
    pub references: ReferenceBuilder,
    pub pipeline: Arc<MediaPipeline>,
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    /// Wire every component from the runtime configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        let clients: Arc<dyn ClientProvider> = Arc::new(DefaultClientProvider::new(
            &config.user_agent,
            config.connect_timeout,
        ));
        // Own pool for the last-resort fetch.
        let fallback: Arc<dyn ClientProvider> = Arc::new(DefaultClientProvider::new(
            &config.user_agent,
            config.connect_timeout,
        ));

        Self::with_components(
            UrlCache::with_ttl(config.cache_ttl),
            Arc::new(AcceleratedDownloader::new(clients, config.accelerator())),
            Arc::new(MediaPipeline::new(config.engine())),
            fallback,
            config.public_base_url.clone(),
        )
    }

    pub fn with_components(
        cache: UrlCache,
        downloader: Arc<AcceleratedDownloader>,
        pipeline: Arc<MediaPipeline>,
        fallback: Arc<dyn ClientProvider>,
        public_base_url: Option<String>,
    ) -> Self {
        let stream_router = StreamRouter::new(cache.clone(), downloader, pipeline.clone(), fallback);
        let references = ReferenceBuilder::new(cache.clone(), public_base_url);

        Self {
            start_time: Instant::now(),
            cache,
            stream_router,
            references,
            pipeline,
            logging_config: None,
        }
    }

    pub fn with_logging_config(mut self, logging_config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(logging_config);
        self
    }
}

fn is_health_check(req: &Request) -> bool {
    req.uri().path().starts_with("/health")
}

/// HTTP server with graceful shutdown.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn with_state(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token that stops the server and its background tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if is_health_check(req) {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_request(|req: &Request, span: &Span| {
                    if span.is_disabled() || is_health_check(req) {
                        return;
                    }
                    let mut on_request =
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnRequest;
                    on_request.on_request(req, span);
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Serve until the cancel token fires.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        self.state
            .cache
            .spawn_sweeper(self.config.cache_cleanup_interval, self.cancel_token.child_token());

        tracing::info!("Media relay listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("Media relay shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {e}")))?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_relay_config() {
        let relay = RelayConfig {
            port: 9000,
            enable_cors: false,
            ..RelayConfig::default()
        };
        let config = ApiServerConfig::from(&relay);
        assert_eq!(config.port, 9000);
        assert!(!config.enable_cors);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn socket_addr_joins_address_and_port() {
        let config = ApiServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            ..ApiServerConfig::default()
        };
        assert_eq!(config.socket_addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
    }

    #[tokio::test]
    async fn run_rejects_invalid_address() {
        let config = ApiServerConfig {
            bind_address: "not an address".to_string(),
            ..ApiServerConfig::default()
        };
        let server = ApiServer::with_state(config, AppState::from_config(&RelayConfig::default()));
        assert!(matches!(server.run().await, Err(Error::Configuration(_))));
    }
}
