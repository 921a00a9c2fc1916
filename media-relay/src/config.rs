//! Service configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::downloader::{AcceleratorConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_PARALLELISM};
use crate::engine::EngineConfig;
use crate::utils::http_client::DEFAULT_USER_AGENT;

/// Runtime configuration of the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Default lifetime of registered references
    pub cache_ttl: Duration,
    /// How often expired references are swept
    pub cache_cleanup_interval: Duration,
    /// Upper bound of concurrent chunk requests per download
    pub max_parallelism: usize,
    /// Smallest ranged chunk in bytes
    pub chunk_size: u64,
    /// User agent sent upstream, both by the HTTP client and by ffmpeg
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Explicit ffmpeg binary, skips PATH discovery when set
    pub ffmpeg_path: Option<PathBuf>,
    pub log_dir: String,
    /// Prefix for client-facing stream URLs; relative URLs when unset
    pub public_base_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5180,
            enable_cors: true,
            cache_ttl: Duration::from_secs(3600),
            cache_cleanup_interval: Duration::from_secs(300),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            ffmpeg_path: None,
            log_dir: "logs".to_string(),
            public_base_url: None,
        }
    }
}

impl RelayConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `RELAY_BIND_ADDRESS`, `RELAY_PORT`, `RELAY_ENABLE_CORS`
    /// - `RELAY_CACHE_TTL_SECS`, `RELAY_CACHE_CLEANUP_SECS`
    /// - `RELAY_MAX_PARALLELISM`, `RELAY_CHUNK_SIZE`
    /// - `RELAY_USER_AGENT`, `RELAY_CONNECT_TIMEOUT_SECS`
    /// - `FFMPEG_PATH`, `RELAY_LOG_DIR`, `RELAY_PUBLIC_BASE_URL`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let text = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(bind_address) = text("RELAY_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = parse_var(&text, "RELAY_PORT") {
            config.port = port;
        }
        if let Some(enable_cors) = parse_var(&text, "RELAY_ENABLE_CORS") {
            config.enable_cors = enable_cors;
        }
        if let Some(secs) = parse_var::<u64>(&text, "RELAY_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&text, "RELAY_CACHE_CLEANUP_SECS")
            && secs > 0
        {
            config.cache_cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(parallelism) = parse_var::<usize>(&text, "RELAY_MAX_PARALLELISM")
            && parallelism > 0
        {
            config.max_parallelism = parallelism;
        }
        if let Some(chunk_size) = parse_var::<u64>(&text, "RELAY_CHUNK_SIZE")
            && chunk_size > 0
        {
            config.chunk_size = chunk_size;
        }
        if let Some(user_agent) = text("RELAY_USER_AGENT") {
            config.user_agent = user_agent;
        }
        if let Some(secs) = parse_var::<u64>(&text, "RELAY_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = text("FFMPEG_PATH") {
            config.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(log_dir) = text("RELAY_LOG_DIR") {
            config.log_dir = log_dir;
        }
        if let Some(base) = text("RELAY_PUBLIC_BASE_URL") {
            config.public_base_url = Some(base.trim_end_matches('/').to_string());
        }

        config
    }

    pub fn accelerator(&self) -> AcceleratorConfig {
        AcceleratorConfig {
            max_parallelism: self.max_parallelism,
            min_chunk_size: self.chunk_size,
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            binary_path: self.ffmpeg_path.clone(),
            user_agent: self.user_agent.clone(),
            ..EngineConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(text: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = text(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}
