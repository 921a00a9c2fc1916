//! media-relay library crate.
//!
//! Turns short-lived opaque keys into playable media: a TTL cache of resolved
//! upstream URLs, a parallel ranged downloader, and an ffmpeg-backed mux and
//! transcode pipeline, wired behind an axum HTTP surface.

pub mod api;
pub mod cache;
pub mod config;
pub mod delivery;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod logging;
pub mod references;
pub mod utils;

pub use error::{Error, Result};
