//! URL helpers.

/// Extracts the `host[:port]` part from an absolute http(s) URL.
///
/// Used for log fields so signed query strings never end up in logs.
pub fn extract_host(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;

    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let mut host_port = &rest[..end];

    if let Some(at) = host_port.rfind('@') {
        host_port = &host_port[at + 1..];
    }

    if host_port.is_empty() {
        None
    } else {
        Some(host_port.to_string())
    }
}

/// Host for logging, `"unknown"` when the URL has none.
pub fn log_host(url: &str) -> String {
    extract_host(url).unwrap_or_else(|| "unknown".to_string())
}

/// Query-string hints used by CDNs that serve media from extension-less paths.
const QUERY_FORMAT_HINTS: [&str; 4] = ["mp4", "mp3", "webm", "m4a"];

/// Lowercase file extension of a media URL, including the leading dot.
///
/// The path extension wins; when the path has none, `format=`/`ext=` query
/// parameters are consulted. Unparseable URLs have no extension.
pub fn media_extension(url: &str) -> Option<String> {
    let parsed = ::url::Url::parse(url).ok()?;

    let from_path = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| format!(".{ext}"));
    if from_path.is_some() {
        return from_path;
    }

    parsed.query_pairs().find_map(|(name, value)| {
        let name = name.to_ascii_lowercase();
        if name != "format" && name != "ext" {
            return None;
        }
        let value = value.to_ascii_lowercase();
        QUERY_FORMAT_HINTS
            .contains(&value.as_str())
            .then(|| format!(".{value}"))
    })
}
