//! Client-facing stream references.
//!
//! Resolved source URLs never reach clients. Each quality tier is registered
//! in the [`UrlCache`] and replaced by its key, embedded in a stream URL the
//! router understands.

use serde::{Deserialize, Serialize};

use crate::cache::UrlCache;

/// Extensions that mark a tier as audio-only.
///
/// `.webm` and `.mp4` are left out: both are common video containers.
const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".ogg", ".opus", ".wav", ".aac", ".flac"];

/// One resolved quality variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTier {
    pub source_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_extension: String,
}

impl QualityTier {
    fn is_present(&self) -> bool {
        !self.source_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTiers {
    #[serde(default)]
    pub best: Option<QualityTier>,
    #[serde(default)]
    pub medium: Option<QualityTier>,
    #[serde(default)]
    pub worst: Option<QualityTier>,
}

impl QualityTiers {
    fn present(&self) -> impl Iterator<Item = &QualityTier> {
        [&self.best, &self.medium, &self.worst]
            .into_iter()
            .flatten()
            .filter(|tier| tier.is_present())
    }

    /// Audio when any tier says so, by extension or description.
    pub fn looks_like_audio(&self) -> bool {
        self.present().any(|tier| {
            is_audio_extension(&tier.file_extension) || has_audio_indicator(&tier.description)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlType {
    /// Separate video and audio, muxed on request.
    Combined,
    /// A single source.
    Media,
}

impl UrlType {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Media => "media",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamReference {
    pub key: String,
    pub description: String,
    pub file_extension: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceSet {
    pub url_type: UrlType,
    pub best: Option<StreamReference>,
    pub medium: Option<StreamReference>,
    pub worst: Option<StreamReference>,
}

/// What a resolver produced for one requested URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedMedia {
    pub requested_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub cover_url: String,
    /// Video that already carries its audio.
    #[serde(default)]
    pub premuxed: Option<QualityTiers>,
    #[serde(default)]
    pub video: Option<QualityTiers>,
    #[serde(default)]
    pub audio: Option<QualityTiers>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaInformation {
    pub requested_url: String,
    pub title: String,
    pub author: String,
    pub cover_url: String,
    pub video: Option<ReferenceSet>,
    pub audio: Option<ReferenceSet>,
}

pub fn is_audio_extension(extension: &str) -> bool {
    let extension = extension.trim();
    AUDIO_EXTENSIONS
        .iter()
        .any(|audio| audio.eq_ignore_ascii_case(extension))
}

/// "audio" in the description, without "video".
pub fn has_audio_indicator(description: &str) -> bool {
    let description = description.to_lowercase();
    description.contains("audio") && !description.contains("video")
}

/// Registers resolved sources and builds the references handed to clients.
#[derive(Clone)]
pub struct ReferenceBuilder {
    cache: UrlCache,
    base_url: String,
}

impl ReferenceBuilder {
    /// Without a base URL, stream URLs are root-relative.
    pub fn new(cache: UrlCache, public_base_url: Option<String>) -> Self {
        let base_url = public_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_default();
        Self { cache, base_url }
    }

    pub fn stream_url(&self, url_type: UrlType, key: &str) -> String {
        format!("{}/stream/{}/{}", self.base_url, url_type.path_segment(), key)
    }

    /// Pair video and audio tier by tier; a tier needs both sides.
    ///
    /// `None` when no tier could be paired.
    pub fn combined_references(&self, video: &QualityTiers, audio: &QualityTiers) -> Option<ReferenceSet> {
        let pair = |video: &Option<QualityTier>, audio: &Option<QualityTier>| {
            let video = video.as_ref().filter(|tier| tier.is_present())?;
            let audio = audio.as_ref().filter(|tier| tier.is_present())?;
            let key = self.cache.cache_combined(&video.source_url, &audio.source_url);
            Some(StreamReference {
                url: self.stream_url(UrlType::Combined, &key),
                key,
                description: format!("Combined: {} + {}", video.description, audio.description),
                file_extension: ".mp4".to_string(),
            })
        };

        let set = ReferenceSet {
            url_type: UrlType::Combined,
            best: pair(&video.best, &audio.best),
            medium: pair(&video.medium, &audio.medium),
            worst: pair(&video.worst, &audio.worst),
        };
        has_any(&set).then_some(set)
    }

    /// Single-source references; every tier shares one audio/video flag.
    pub fn media_references(&self, tiers: &QualityTiers, force_audio: bool) -> Option<ReferenceSet> {
        let is_audio = force_audio || tiers.looks_like_audio();
        let extension = if is_audio { ".mp3" } else { ".mp4" };

        let single = |tier: &Option<QualityTier>| {
            let tier = tier.as_ref().filter(|tier| tier.is_present())?;
            let key = self.cache.cache_single(&tier.source_url, is_audio);
            Some(StreamReference {
                url: self.stream_url(UrlType::Media, &key),
                key,
                description: tier.description.clone(),
                file_extension: extension.to_string(),
            })
        };

        let set = ReferenceSet {
            url_type: UrlType::Media,
            best: single(&tiers.best),
            medium: single(&tiers.medium),
            worst: single(&tiers.worst),
        };
        has_any(&set).then_some(set)
    }

    /// Video prefers pre-muxed sources over muxing separate streams;
    /// audio is always served as audio.
    pub fn build(&self, media: ResolvedMedia) -> MediaInformation {
        let premuxed = media
            .premuxed
            .as_ref()
            .and_then(|tiers| self.media_references(tiers, false));
        let video = premuxed.or_else(|| match (&media.video, &media.audio) {
            (Some(video), Some(audio)) => self.combined_references(video, audio),
            (Some(video), None) => self.media_references(video, false),
            _ => None,
        });
        let audio = media
            .audio
            .as_ref()
            .and_then(|tiers| self.media_references(tiers, true));

        MediaInformation {
            requested_url: media.requested_url,
            title: media.title,
            author: media.author,
            cover_url: media.cover_url,
            video,
            audio,
        }
    }
}

fn has_any(set: &ReferenceSet) -> bool {
    set.best.is_some() || set.medium.is_some() || set.worst.is_some()
}
