//! URL utilities for video pages, script assets and stream URLs

use crate::error::ResolveError;
use url::Url;

/// Extract the video ID from a watch page URL
pub fn extract_video_id(url: &str) -> Result<String, ResolveError> {
    let parsed = Url::parse(url)?;

    if parsed.host_str() == Some("youtu.be") {
        let path = parsed.path().trim_start_matches('/');
        if path.is_empty() {
            return Err(ResolveError::InvalidUrl("Missing video ID".to_string()));
        }
        return Ok(path.to_string());
    }

    parsed
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ResolveError::InvalidUrl("Missing v parameter".to_string()))
}

/// Check if URL points at a supported video platform
pub fn is_video_url(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        matches!(
            parsed.host_str(),
            Some("youtube.com") | Some("www.youtube.com") | Some("m.youtube.com") | Some("youtu.be")
        )
    } else {
        false
    }
}

/// Resolve a script asset path against the page it was found on.
///
/// Handles absolute, protocol-relative (`//host/p.js`) and root-relative
/// (`/p.js`) paths.
pub fn resolve_asset_url(page_url: &str, asset: &str) -> Result<String, ResolveError> {
    let base = Url::parse(page_url)?;
    Ok(base.join(asset)?.to_string())
}

/// Check whether a stream URL already carries a signature
pub fn has_signature(stream_url: &str) -> bool {
    stream_url.contains("signature=")
}

/// Append a signature parameter to a stream URL
pub fn append_signature(stream_url: &str, signature: &str) -> String {
    let separator = if stream_url.contains('?') { '&' } else { '?' };
    format!("{}{}signature={}", stream_url, separator, signature)
}
