#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use media_relay::api::{ApiServer, ApiServerConfig, AppState};
use media_relay::config::RelayConfig;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_upstream(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Write an executable shell script standing in for ffmpeg.
#[cfg(unix)]
pub fn fake_engine(dir: &Path, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Relay wired like the binary, with `engine` as ffmpeg.
pub fn relay(engine: Option<PathBuf>) -> (Router, AppState) {
    let config = RelayConfig {
        ffmpeg_path: Some(engine.unwrap_or_else(|| PathBuf::from("/nonexistent/ffmpeg"))),
        chunk_size: 1024,
        public_base_url: Some("https://relay.test".to_string()),
        ..RelayConfig::default()
    };
    let state = AppState::from_config(&config);
    let server = ApiServer::with_state(ApiServerConfig::from(&config), state.clone());
    (server.build_router(), state)
}

pub async fn get(router: &Router, uri: &str) -> Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
