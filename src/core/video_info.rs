//! Resolved video and stream structures

use crate::error::ResolveError;
use crate::platform::formats::{self, QualityProfile, StreamFilter};
use crate::utils::{extract_video_id, to_safe_filename};
use serde::Serialize;

/// Resolved page: title plus every playable stream, best first
#[derive(Debug, Clone, Serialize)]
pub struct Video {
    url: String,
    title: String,
    filename: String,
    streams: Vec<ResolvedStream>,
}

impl Video {
    /// Create a new Video with a filename derived from the title
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            filename: to_safe_filename(title, ""),
            streams: Vec::new(),
        }
    }

    /// Page URL the video was resolved from
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Output name without extension
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Set the output name for the video and all of its streams
    pub fn set_filename(&mut self, filename: &str) {
        self.filename = filename.to_string();
        for stream in &mut self.streams {
            stream.filename = filename.to_string();
        }
    }

    /// Video ID taken from the page URL, if it carries one
    pub fn video_id(&self) -> Option<String> {
        extract_video_id(&self.url).ok()
    }

    /// All streams in ranked order
    pub fn streams(&self) -> &[ResolvedStream] {
        &self.streams
    }

    /// Add a stream, keeping the collection ranked
    pub fn add_stream(&mut self, stream: ResolvedStream) {
        self.streams.push(stream);
        formats::sort_streams(&mut self.streams);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// All streams matching the filter
    pub fn filter(&self, filter: &StreamFilter) -> Vec<&ResolvedStream> {
        formats::filter_streams(&self.streams, filter)
    }

    /// The one stream matching the filter
    pub fn get(&self, filter: &StreamFilter) -> Result<&ResolvedStream, ResolveError> {
        formats::get_stream(&self.streams, filter)
    }

    /// Highest resolution stream
    pub fn best(&self) -> Option<&ResolvedStream> {
        formats::best_stream(&self.streams)
    }
}

/// One playable stream with its signed URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStream {
    /// Signed, playable URL
    pub url: String,
    /// Platform format ID
    pub itag: u32,
    /// Container, resolution, codecs and bitrates for the itag
    #[serde(flatten)]
    pub quality_profile: QualityProfile,
    /// Output name without extension
    pub filename: String,
    /// Quality label from the stream map (e.g. "hd720")
    pub quality: Option<String>,
    /// MIME type from the stream map
    pub mime_type: Option<String>,
}

impl ResolvedStream {
    /// Create a new ResolvedStream
    pub fn new(url: String, itag: u32, quality_profile: QualityProfile, filename: String) -> Self {
        Self {
            url,
            itag,
            quality_profile,
            filename,
            quality: None,
            mime_type: None,
        }
    }

    pub fn container(&self) -> &'static str {
        self.quality_profile.container
    }

    pub fn resolution(&self) -> &'static str {
        self.quality_profile.resolution
    }

    pub fn profile(&self) -> &'static str {
        self.quality_profile.profile
    }

    /// Output name with the container as extension
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.filename, self.quality_profile.container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::formats::lookup;

    fn stream(itag: u32, filename: &str) -> ResolvedStream {
        ResolvedStream::new(
            format!("http://media.example/videoplayback?itag={}", itag),
            itag,
            *lookup(itag).unwrap(),
            filename.to_string(),
        )
    }

    #[test]
    fn test_video_creation() {
        let video = Video::new("https://www.youtube.com/watch?v=abc123", "My: Video");
        assert_eq!(video.title(), "My: Video");
        assert_eq!(video.filename(), "My - Video");
        assert_eq!(video.video_id(), Some("abc123".to_string()));
        assert!(video.is_empty());
    }

    #[test]
    fn test_add_stream_keeps_ranking() {
        let mut video = Video::new("https://www.youtube.com/watch?v=x", "t");
        video.add_stream(stream(18, "t"));
        video.add_stream(stream(22, "t"));
        video.add_stream(stream(43, "t"));

        let order: Vec<u32> = video.streams().iter().map(|s| s.itag).collect();
        assert_eq!(order, vec![22, 18, 43]);
        assert_eq!(video.best().unwrap().itag, 22);
    }

    #[test]
    fn test_set_filename_updates_streams() {
        let mut video = Video::new("https://www.youtube.com/watch?v=x", "title");
        video.add_stream(stream(18, "title"));
        video.add_stream(stream(43, "title"));

        video.set_filename("renamed");
        assert_eq!(video.filename(), "renamed");
        assert!(video.streams().iter().all(|s| s.filename == "renamed"));
        assert_eq!(video.streams()[0].file_name(), "renamed.mp4");
    }

    #[test]
    fn test_get_and_filter() {
        let mut video = Video::new("https://www.youtube.com/watch?v=x", "t");
        video.add_stream(stream(18, "t"));
        video.add_stream(stream(43, "t"));

        assert_eq!(video.filter(&StreamFilter::new().with_resolution("360p")).len(), 2);
        assert_eq!(
            video
                .get(&StreamFilter::new().with_extension("webm"))
                .unwrap()
                .itag,
            43
        );
        assert!(matches!(
            video.get(&StreamFilter::new().with_resolution("360p")),
            Err(ResolveError::AmbiguousMatch(2))
        ));
    }

    #[test]
    fn test_stream_serializes_flat() {
        let value = serde_json::to_value(stream(22, "t")).unwrap();
        assert_eq!(value["itag"], 22);
        assert_eq!(value["container"], "mp4");
        assert_eq!(value["resolution"], "720p");
        assert_eq!(value["audio_bitrate"], "192");
    }
}
