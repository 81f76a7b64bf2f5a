//! Embedded configuration extraction

use crate::error::ResolveError;
use serde_json::Value;
use tracing::debug;

/// Marker preceding the player configuration object in the watch page
pub const PLAYER_CONFIG_MARKER: &str = "ytplayer.config = ";

/// Find the byte index of the `}` closing the first object at or after `from`.
///
/// Only `{` and `}` are treated as structural, so the text between them
/// must be trusted to be valid JSON by the caller.
pub fn find_object_end(text: &str, from: usize) -> Result<usize, ResolveError> {
    let tail = text.get(from..).ok_or_else(|| {
        ResolveError::ConfigExtraction(format!("offset {} is out of bounds", from))
    })?;

    let mut expected: Vec<u8> = Vec::new();
    for (index, byte) in tail.bytes().enumerate() {
        match byte {
            b'{' => expected.push(b'}'),
            b'}' => {
                if expected.pop().is_none() {
                    return Err(ResolveError::ConfigExtraction(format!(
                        "unbalanced '}}' at offset {}",
                        from + index
                    )));
                }
                if expected.is_empty() {
                    return Ok(from + index);
                }
            }
            _ => {}
        }
    }

    Err(ResolveError::ConfigExtraction(
        "malformed or unterminated object".to_string(),
    ))
}

/// Extract and parse the configuration object following `marker`
pub fn extract_object_after(text: &str, marker: &str) -> Result<Value, ResolveError> {
    let start = text
        .find(marker)
        .map(|index| index + marker.len())
        .ok_or_else(|| {
            ResolveError::ConfigExtraction(format!("marker {:?} not found", marker))
        })?;
    let end = find_object_end(text, start)?;

    debug!("Configuration object spans bytes {}..={}", start, end);
    serde_json::from_str(&text[start..=end])
        .map_err(|e| ResolveError::ConfigExtraction(format!("invalid JSON: {}", e)))
}

/// Extract the player configuration from a watch page
pub fn extract_config(html: &str) -> Result<Value, ResolveError> {
    extract_object_after(html, PLAYER_CONFIG_MARKER)
}
