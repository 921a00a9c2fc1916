//! Opaque cache key derivation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Length of every key handed to clients.
pub const KEY_LENGTH: usize = 16;

/// Canonical input for a combined video+audio registration.
pub fn combined_canonical(video_url: &str, audio_url: &str) -> String {
    format!("{video_url}|{audio_url}")
}

/// Derive the short, URL-safe key for a canonical input.
///
/// SHA-256, URL-safe base64 without padding, truncated to [`KEY_LENGTH`].
/// The truncation keeps links short at the cost of a small collision
/// probability; see `UrlCache` for how collisions are handled.
pub fn derive_key(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut key = URL_SAFE_NO_PAD.encode(digest);
    key.truncate(KEY_LENGTH);
    key
}
