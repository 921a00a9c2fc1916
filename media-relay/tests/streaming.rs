#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;

use common::{body_bytes, fake_engine, get as get_uri, relay, spawn_upstream};

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).unwrap().to_str().unwrap()
}

fn sized_head(length: u64) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    (StatusCode::OK, headers)
}

#[tokio::test]
async fn webm_video_is_transcoded_to_mp4() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let script = format!(
        "printf '%s\\n' \"$@\" > '{}'\nprintf 'transcoded-mp4'",
        args_file.display()
    );
    let (router, state) = relay(Some(fake_engine(dir.path(), &script)));
    let key = state.cache.cache_single("https://example.test/a.webm", false);

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(response.headers(), "content-type"), "video/mp4");
    assert_eq!(header_str(response.headers(), "cache-control"), "public, max-age=3600");
    assert_eq!(body_bytes(response).await, b"transcoded-mp4");

    let args = std::fs::read_to_string(args_file).unwrap();
    assert!(args.lines().any(|arg| arg == "libx264"));
    assert!(args.lines().any(|arg| arg == "https://example.test/a.webm"));
}

#[tokio::test]
async fn combined_stream_reports_estimated_length() {
    let upstream = Router::new()
        .route("/video", get(|| async { "" }).head(|| async { sized_head(10_000_000) }))
        .route("/audio", get(|| async { "" }).head(|| async { sized_head(2_000_000) }));
    let base = spawn_upstream(upstream).await;

    let dir = tempfile::tempdir().unwrap();
    let (router, state) = relay(Some(fake_engine(dir.path(), "printf 'muxed'")));
    let key = state
        .cache
        .cache_combined(&format!("{base}/video"), &format!("{base}/audio"));

    let response = get_uri(&router, &format!("/stream/combined/{key}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(header_str(headers, "x-estimated-content-length"), "12000000");
    assert_eq!(header_str(headers, "content-type"), "video/mp4");
    assert_eq!(header_str(headers, "content-disposition"), "inline; filename=\"video.mp4\"");
    assert_eq!(header_str(headers, "cache-control"), "no-cache");
    assert_eq!(body_bytes(response).await, b"muxed");
}

#[tokio::test]
async fn combined_stream_without_lengths_has_no_estimate() {
    let dir = tempfile::tempdir().unwrap();
    let (router, state) = relay(Some(fake_engine(dir.path(), "printf 'muxed'")));
    let key = state
        .cache
        .cache_combined("http://127.0.0.1:9/video", "http://127.0.0.1:9/audio");

    let response = get_uri(&router, &format!("/api/stream/combined/{key}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-estimated-content-length").is_none());
}

#[tokio::test]
async fn stalled_length_probe_does_not_hold_the_response() {
    let stall = || async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        sized_head(1)
    };
    let upstream = Router::new()
        .route("/video", get(|| async { "" }).head(stall))
        .route("/audio", get(|| async { "" }).head(stall));
    let base = spawn_upstream(upstream).await;

    let dir = tempfile::tempdir().unwrap();
    let (router, state) = relay(Some(fake_engine(dir.path(), "printf 'muxed'")));
    let key = state
        .cache
        .cache_combined(&format!("{base}/video"), &format!("{base}/audio"));

    let response = tokio::time::timeout(
        Duration::from_secs(15),
        get_uri(&router, &format!("/stream/combined/{key}")),
    )
    .await
    .expect("combined response waited on the length probes");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-estimated-content-length").is_none());
    assert_eq!(body_bytes(response).await, b"muxed");
}

#[tokio::test]
async fn mp3_audio_is_passed_through() {
    let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 256) as u8).collect();
    let body = payload.clone();
    let upstream = Router::new().route("/song.mp3", get(move || async move { body }));
    let base = spawn_upstream(upstream).await;

    let (router, state) = relay(None);
    let key = state.cache.cache_single(&format!("{base}/song.mp3"), true);

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(response.headers(), "content-type"), "audio/mpeg");
    assert_eq!(body_bytes(response).await, payload);
}

#[tokio::test]
async fn plain_fetch_recovers_after_download_failures() {
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let gets = Arc::new(AtomicUsize::new(0));

    let body = payload.clone();
    let counter = gets.clone();
    let upstream = Router::new().route(
        "/flaky.mp3",
        get(move || {
            let body = body.clone();
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    body.into_response()
                }
            }
        })
        .head(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let base = spawn_upstream(upstream).await;

    let (router, state) = relay(None);
    let key = state.cache.cache_single(&format!("{base}/flaky.mp3"), true);

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(response.headers(), "content-type"), "audio/mpeg");
    assert_eq!(body_bytes(response).await, payload);
    // One failed single-connection attempt, then the router-level fetch.
    assert_eq!(gets.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_passthrough_is_bad_gateway() {
    let upstream = Router::new().route(
        "/gone.mp3",
        get(|| async { StatusCode::NOT_FOUND }),
    );
    let base = spawn_upstream(upstream).await;

    let (router, state) = relay(None);
    let key = state.cache.cache_single(&format!("{base}/gone.mp3"), true);

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unknown_key_is_not_found() {
    let (router, _) = relay(None);

    let response = get_uri(&router, "/stream/media/AAAAAAAAAAAAAAAA").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        String::from_utf8(body_bytes(response).await).unwrap(),
        "Stream expired or not found"
    );
}

#[tokio::test]
async fn combined_key_is_not_a_media_key() {
    let (router, state) = relay(None);
    let key = state.cache.cache_combined("https://v.test/v", "https://a.test/a");

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn engine_failure_before_output_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = "echo 'Server returned 403 Forbidden' >&2\nexit 1";
    let (router, state) = relay(Some(fake_engine(dir.path(), script)));
    let key = state.cache.cache_single("https://example.test/a.webm", true);

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(!body.contains("403"));
}

#[tokio::test]
async fn missing_engine_is_server_error() {
    let (router, state) = relay(None);
    let key = state.cache.cache_single("https://example.test/a.webm", false);

    let response = get_uri(&router, &format!("/stream/media/{key}")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropping_the_response_kills_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let script = format!("echo $$ > '{}'\nprintf 'head'\nexec sleep 30", pid_file.display());
    let (router, state) = relay(Some(fake_engine(dir.path(), &script)));
    let key = state.cache.cache_combined("https://v.test/v", "https://a.test/a");

    let response = get_uri(&router, &format!("/stream/combined/{key}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let proc_path = format!("/proc/{pid}");
    assert!(std::path::Path::new(&proc_path).exists());

    drop(response);

    let gone = tokio::time::timeout(Duration::from_secs(5), async {
        while std::path::Path::new(&proc_path).exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "engine process {pid} still running");
}
