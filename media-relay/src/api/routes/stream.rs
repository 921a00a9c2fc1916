//! Stream delivery routes.

use axum::Router;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;

use crate::api::error::ApiResult;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/combined/{key}", get(stream_combined))
        .route("/media/{key}", get(stream_media))
}

/// Muxed video and audio.
pub async fn stream_combined(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    Ok(state.stream_router.serve_combined(&key).await?)
}

/// A single source, passed through or transcoded.
pub async fn stream_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    Ok(state.stream_router.serve_media(&key).await?)
}
