//! Error types for tuberesolve

use crate::platform::cipher::CipherError;
use thiserror::Error;

/// Main error type for stream resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unable to open {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Age restricted video, unable to resolve without being signed in")]
    AgeRestricted,

    #[error("Unable to extract player configuration: {0}")]
    ConfigExtraction(String),

    #[error("Player configuration has no stream map")]
    NoStreamMap,

    #[error("Unable to decode stream map: {0}")]
    StreamMapDecode(String),

    #[error("Unable to get encoding profile: {0}")]
    ItagResolution(String),

    #[error("Cannot resolve signature: {0}")]
    Cipher(#[from] CipherError),

    #[error("No streams met this criteria")]
    NoMatch,

    #[error("{0} streams met this criteria")]
    AmbiguousMatch(usize),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl ResolveError {
    /// Build a fetch failure for `url`
    pub fn fetch(url: &str, reason: impl Into<String>) -> Self {
        ResolveError::Fetch {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if the error aborts a whole resolution call.
    ///
    /// Record-level failures (itag and cipher) only drop the affected
    /// candidate; query-time outcomes are not pipeline failures at all.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ResolveError::ItagResolution(_)
                | ResolveError::Cipher(_)
                | ResolveError::NoMatch
                | ResolveError::AmbiguousMatch(_)
        )
    }

    /// Check if the error was reported by the video platform itself
    pub fn is_platform_error(&self) -> bool {
        matches!(
            self,
            ResolveError::AgeRestricted | ResolveError::NoStreamMap | ResolveError::Fetch { .. }
        )
    }
}
