//! Registration of resolved media.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::references::{MediaInformation, ResolvedMedia};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(register_media))
}

/// Register every quality tier and return the client-facing references.
pub async fn register_media(
    State(state): State<AppState>,
    Json(media): Json<ResolvedMedia>,
) -> ApiResult<Json<MediaInformation>> {
    if media.requested_url.trim().is_empty() {
        return Err(ApiError::bad_request("requested_url is required"));
    }
    if media.premuxed.is_none() && media.video.is_none() && media.audio.is_none() {
        return Err(ApiError::bad_request("No media sources supplied"));
    }

    let info = state.references.build(media);
    tracing::debug!(
        requested_url = %info.requested_url,
        has_video = info.video.is_some(),
        has_audio = info.audio.is_some(),
        "Registered media references"
    );
    Ok(Json(info))
}
