//! Health check route.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
pub struct EngineHealth {
    pub available: bool,
    pub path: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub cache_entries: usize,
    pub cache_ttl_secs: u64,
    pub engine: EngineHealth,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Service is `degraded` without a usable engine: passthrough still works.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let version = state.pipeline.version().await;
    let engine = EngineHealth {
        available: version.is_some(),
        path: state
            .pipeline
            .binary()
            .map(|path| path.display().to_string()),
        version,
    };

    let cache = state.cache.stats();
    Json(HealthResponse {
        status: if engine.available { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache_entries: cache.entry_count,
        cache_ttl_secs: cache.default_ttl.as_secs(),
        engine,
    })
}
