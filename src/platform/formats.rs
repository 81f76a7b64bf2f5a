//! Quality profiles and stream selection utilities

use crate::core::video_info::ResolvedStream;
use crate::error::ResolveError;
use serde::Serialize;
use std::cmp::Reverse;

/// Descriptive tuple the platform associates with an itag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QualityProfile {
    /// Container / file extension (e.g. "mp4")
    pub container: &'static str,
    /// Broadcasting standard (e.g. "720p")
    pub resolution: &'static str,
    pub video_codec: &'static str,
    /// Codec profile (e.g. "High", "3D")
    pub profile: &'static str,
    /// Approximate video bitrate in Mbit/s, as published
    pub video_bitrate: &'static str,
    pub audio_codec: &'static str,
    /// Audio bitrate in kbit/s, as published
    pub audio_bitrate: &'static str,
}

impl QualityProfile {
    const fn new(
        container: &'static str,
        resolution: &'static str,
        video_codec: &'static str,
        profile: &'static str,
        video_bitrate: &'static str,
        audio_codec: &'static str,
        audio_bitrate: &'static str,
    ) -> Self {
        Self {
            container,
            resolution,
            video_codec,
            profile,
            video_bitrate,
            audio_codec,
            audio_bitrate,
        }
    }

    /// Numeric height of the resolution label, 0 if it has none
    pub fn resolution_rank(&self) -> u32 {
        self.resolution
            .trim_end_matches('p')
            .parse()
            .unwrap_or(0)
    }
}

// The numbering belongs to the platform, entries must match it literally.
static QUALITY_PROFILES: [(u32, QualityProfile); 11] = [
    // flash
    (5, QualityProfile::new("flv", "240p", "Sorenson H.263", "N/A", "0.25", "MP3", "64")),
    // 3gp
    (17, QualityProfile::new("3gp", "144p", "MPEG-4 Visual", "Simple", "0.05", "AAC", "24")),
    (36, QualityProfile::new("3gp", "240p", "MPEG-4 Visual", "Simple", "0.17", "AAC", "38")),
    // webm
    (43, QualityProfile::new("webm", "360p", "VP8", "N/A", "0.5", "Vorbis", "128")),
    (100, QualityProfile::new("webm", "360p", "VP8", "3D", "N/A", "Vorbis", "128")),
    // mpeg4
    (18, QualityProfile::new("mp4", "360p", "H.264", "Baseline", "0.5", "AAC", "96")),
    (22, QualityProfile::new("mp4", "720p", "H.264", "High", "2-2.9", "AAC", "192")),
    (82, QualityProfile::new("mp4", "360p", "H.264", "3D", "0.5", "AAC", "96")),
    (83, QualityProfile::new("mp4", "240p", "H.264", "3D", "0.5", "AAC", "96")),
    (84, QualityProfile::new("mp4", "720p", "H.264", "3D", "2-2.9", "AAC", "152")),
    (85, QualityProfile::new("mp4", "1080p", "H.264", "3D", "2-2.9", "AAC", "152")),
];

/// Look up the quality profile of an itag.
///
/// Unknown itags return `None`; the platform emits experimental formats
/// that are simply skipped.
pub fn lookup(itag: u32) -> Option<&'static QualityProfile> {
    QUALITY_PROFILES
        .iter()
        .find(|(known, _)| *known == itag)
        .map(|(_, profile)| profile)
}

/// Criteria for picking streams out of a resolved video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    /// Desired container (e.g. "mp4", "flv")
    pub extension: Option<String>,
    /// Desired resolution (e.g. "720p")
    pub resolution: Option<String>,
    /// Desired codec profile
    pub profile: Option<String>,
}

impl StreamFilter {
    /// Create an empty filter matching every stream
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = Some(extension.to_string());
        self
    }

    pub fn with_resolution(mut self, resolution: &str) -> Self {
        self.resolution = Some(resolution.to_string());
        self
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    /// Check whether a stream satisfies every set criterion
    pub fn matches(&self, stream: &ResolvedStream) -> bool {
        let profile = &stream.quality_profile;
        self.extension
            .as_deref()
            .map_or(true, |ext| profile.container == ext)
            && self
                .resolution
                .as_deref()
                .map_or(true, |res| profile.resolution == res)
            && self
                .profile
                .as_deref()
                .map_or(true, |p| profile.profile == p)
    }
}

/// All streams matching the filter, in collection order
pub fn filter_streams<'a>(
    streams: &'a [ResolvedStream],
    filter: &StreamFilter,
) -> Vec<&'a ResolvedStream> {
    streams.iter().filter(|s| filter.matches(s)).collect()
}

/// The single stream matching the filter.
///
/// Zero matches is `NoMatch`, more than one is `AmbiguousMatch`.
pub fn get_stream<'a>(
    streams: &'a [ResolvedStream],
    filter: &StreamFilter,
) -> Result<&'a ResolvedStream, ResolveError> {
    let mut matches = filter_streams(streams, filter);
    match matches.len() {
        0 => Err(ResolveError::NoMatch),
        1 => Ok(matches.remove(0)),
        n => Err(ResolveError::AmbiguousMatch(n)),
    }
}

/// Sort streams by resolution, highest first.
///
/// The sort is stable, so equal resolutions keep stream-map order.
pub fn sort_streams(streams: &mut [ResolvedStream]) {
    streams.sort_by_key(|s| Reverse(s.quality_profile.resolution_rank()));
}

/// Highest resolution stream, earliest in stream-map order on ties
pub fn best_stream(streams: &[ResolvedStream]) -> Option<&ResolvedStream> {
    let top = streams
        .iter()
        .map(|s| s.quality_profile.resolution_rank())
        .max()?;
    streams
        .iter()
        .find(|s| s.quality_profile.resolution_rank() == top)
}
