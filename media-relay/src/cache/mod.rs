//! Ephemeral URL resolution cache.
//!
//! Resolved upstream URLs are registered under short opaque keys that end up
//! in client-facing stream URLs. Entries live for a TTL (one hour by default)
//! and are never updated in place; a miss is an ordinary outcome.
//!
//! Collision policy: each entry keeps the canonical input it was derived
//! from. Re-registering the same input keeps the entry and refreshes its
//! TTL. A different input that truncates to the same key replaces the older
//! entry with a warning, so a lookup never returns URLs for an input other
//! than the most recent registration under that key.

mod keys;

pub use keys::{KEY_LENGTH, combined_canonical, derive_key};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default TTL for registered references (1 hour).
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// A resolved upstream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Separate video and audio streams, muxed on delivery.
    Combined {
        video_url: String,
        audio_url: String,
        cached_at: DateTime<Utc>,
    },
    /// A single audio or video stream.
    Single {
        url: String,
        is_audio: bool,
        cached_at: DateTime<Utc>,
    },
}

impl CacheEntry {
    pub fn cached_at(&self) -> DateTime<Utc> {
        match self {
            Self::Combined { cached_at, .. } | Self::Single { cached_at, .. } => *cached_at,
        }
    }

    /// Same upstream source, ignoring registration time.
    fn same_source(&self, other: &CacheEntry) -> bool {
        match (self, other) {
            (
                Self::Combined {
                    video_url: v1,
                    audio_url: a1,
                    ..
                },
                Self::Combined {
                    video_url: v2,
                    audio_url: a2,
                    ..
                },
            ) => v1 == v2 && a1 == a2,
            (
                Self::Single {
                    url: u1,
                    is_audio: k1,
                    ..
                },
                Self::Single {
                    url: u2,
                    is_audio: k2,
                    ..
                },
            ) => u1 == u2 && k1 == k2,
            _ => false,
        }
    }
}

struct Slot {
    entry: Arc<CacheEntry>,
    canonical: String,
    expires_at: Instant,
}

impl Slot {
    fn new(entry: CacheEntry, canonical: String, ttl: Duration) -> Self {
        Self {
            entry: Arc::new(entry),
            canonical,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entry_count: usize,
    pub default_ttl: Duration,
}

/// Process-wide registry of resolved sources.
///
/// Cheap to clone; clones share the same map. Backed by `DashMap`, so
/// unrelated keys never contend on a common lock.
#[derive(Clone)]
pub struct UrlCache {
    entries: Arc<DashMap<String, Slot>>,
    default_ttl: Duration,
}

impl UrlCache {
    /// Create a new cache with default TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a new cache with the given default TTL.
    pub fn with_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    /// Register a single stream and return its key.
    pub fn cache_single(&self, url: &str, is_audio: bool) -> String {
        self.cache_single_with_ttl(url, is_audio, self.default_ttl)
    }

    pub fn cache_single_with_ttl(&self, url: &str, is_audio: bool, ttl: Duration) -> String {
        let entry = CacheEntry::Single {
            url: url.to_string(),
            is_audio,
            cached_at: Utc::now(),
        };
        self.register(url.to_string(), entry, ttl)
    }

    /// Register a video+audio pair and return its key. Order matters.
    pub fn cache_combined(&self, video_url: &str, audio_url: &str) -> String {
        self.cache_combined_with_ttl(video_url, audio_url, self.default_ttl)
    }

    pub fn cache_combined_with_ttl(&self, video_url: &str, audio_url: &str, ttl: Duration) -> String {
        let entry = CacheEntry::Combined {
            video_url: video_url.to_string(),
            audio_url: audio_url.to_string(),
            cached_at: Utc::now(),
        };
        self.register(combined_canonical(video_url, audio_url), entry, ttl)
    }

    fn register(&self, canonical: String, entry: CacheEntry, ttl: Duration) -> String {
        let key = derive_key(&canonical);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.canonical != canonical {
                    warn!(key = %key, "Cache key collision; replacing older entry");
                    *slot = Slot::new(entry, canonical, ttl);
                } else if slot.is_expired() || !slot.entry.same_source(&entry) {
                    *slot = Slot::new(entry, canonical, ttl);
                } else {
                    slot.expires_at = Instant::now() + ttl;
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(entry, canonical, ttl));
            }
        }

        debug!(key = %key, ttl_secs = ttl.as_secs(), "Registered media reference");
        key
    }

    /// Look up a key. Expired entries are evicted and reported as a miss.
    pub fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let slot = self.entries.get(key)?;
        if slot.is_expired() {
            drop(slot); // release the shard lock before removing
            self.entries.remove_if(key, |_, slot| slot.is_expired());
            return None;
        }
        Some(slot.entry.clone())
    }

    /// Look up a combined entry as `(video_url, audio_url)`.
    pub fn lookup_combined(&self, key: &str) -> Option<(String, String)> {
        match self.lookup(key)?.as_ref() {
            CacheEntry::Combined {
                video_url,
                audio_url,
                ..
            } => Some((video_url.clone(), audio_url.clone())),
            CacheEntry::Single { .. } => None,
        }
    }

    /// Look up a single entry as `(url, is_audio)`.
    pub fn lookup_single(&self, key: &str) -> Option<(String, bool)> {
        match self.lookup(key)?.as_ref() {
            CacheEntry::Single { url, is_audio, .. } => Some((url.clone(), *is_audio)),
            CacheEntry::Combined { .. } => None,
        }
    }

    /// Best-effort eviction.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Get the number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.len();
        self.entries.retain(|_, slot| !slot.is_expired());
        before.saturating_sub(self.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            default_ttl: self.default_ttl,
        }
    }

    /// Spawn a task that sweeps expired entries every `interval` until cancelled.
    pub fn spawn_sweeper(&self, interval: Duration, cancel_token: CancellationToken) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Cache sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = cache.cleanup_expired();
                        if removed > 0 {
                            info!(removed, remaining = cache.len(), "Swept expired media references");
                        }
                    }
                }
            }
        });
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_registration_is_deterministic() {
        let cache = UrlCache::new();
        let first = cache.cache_single("https://cdn.test/a.mp3", true);
        let second = cache.cache_single("https://cdn.test/a.mp3", true);

        assert_eq!(first, second);
        assert_eq!(first.len(), KEY_LENGTH);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn combined_key_is_order_sensitive() {
        let cache = UrlCache::new();
        let forward = cache.cache_combined("https://cdn.test/v", "https://cdn.test/a");
        let swapped = cache.cache_combined("https://cdn.test/a", "https://cdn.test/v");

        assert_ne!(forward, swapped);
        assert_eq!(
            cache.lookup_combined(&forward),
            Some(("https://cdn.test/v".to_string(), "https://cdn.test/a".to_string()))
        );
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = UrlCache::new();
        let key = cache.cache_single_with_ttl("https://cdn.test/a.webm", false, Duration::from_millis(1));

        std::thread::sleep(Duration::from_millis(10));

        assert!(cache.lookup(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn reregistration_refreshes_ttl_without_duplicating() {
        let cache = UrlCache::new();
        let key = cache.cache_single_with_ttl("https://cdn.test/a.mp4", false, Duration::from_millis(30));
        let original = cache.lookup(&key).unwrap();

        std::thread::sleep(Duration::from_millis(15));
        cache.cache_single_with_ttl("https://cdn.test/a.mp4", false, Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(30));

        let refreshed = cache.lookup(&key).expect("TTL should have been refreshed");
        assert_eq!(refreshed.cached_at(), original.cached_at());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn kind_mismatch_is_a_miss() {
        let cache = UrlCache::new();
        let single = cache.cache_single("https://cdn.test/a.mp3", true);
        let combined = cache.cache_combined("https://cdn.test/v", "https://cdn.test/a");

        assert!(cache.lookup_combined(&single).is_none());
        assert!(cache.lookup_single(&combined).is_none());
        assert_eq!(
            cache.lookup_single(&single),
            Some(("https://cdn.test/a.mp3".to_string(), true))
        );
    }

    #[test]
    fn changed_media_kind_replaces_entry() {
        let cache = UrlCache::new();
        let key = cache.cache_single("https://cdn.test/stream", false);
        let again = cache.cache_single("https://cdn.test/stream", true);

        assert_eq!(key, again);
        assert_eq!(cache.lookup_single(&key), Some(("https://cdn.test/stream".to_string(), true)));
    }

    #[test]
    fn invalidate_and_cleanup() {
        let cache = UrlCache::new();
        let keep = cache.cache_single("https://cdn.test/keep.mp4", false);
        let gone = cache.cache_single("https://cdn.test/gone.mp4", false);
        cache.cache_single_with_ttl("https://cdn.test/old.mp4", false, Duration::from_millis(1));

        cache.invalidate(&gone);
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.lookup(&gone).is_none());
        assert!(cache.lookup(&keep).is_some());
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn concurrent_registration_is_consistent() {
        let cache = UrlCache::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|j| cache.cache_single(&format!("https://cdn.test/{}.mp4", j % 10), i % 2 == 0))
                        .count()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
