//! Source classification and response content types.

use crate::engine::TranscodeTarget;
use crate::utils::url::media_extension;

/// Whether a source can be served as-is or must be re-encoded first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    /// Already in the delivery format for its kind.
    Standard,
    NonStandard,
}

/// Audio is standard only as MP3, video only as MP4.
///
/// The extension comes from the URL path, falling back to query-string
/// format hints; URLs with neither are non-standard.
pub fn classify(url: &str, is_audio: bool) -> SourceClass {
    let target = TranscodeTarget::for_kind(is_audio).extension();
    match media_extension(url) {
        Some(extension) if extension == target => SourceClass::Standard,
        _ => SourceClass::NonStandard,
    }
}

/// Content type a client receives for a single source of this kind.
pub fn content_type(is_audio: bool) -> &'static str {
    TranscodeTarget::for_kind(is_audio).content_type()
}
