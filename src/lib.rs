//! # tuberesolve
//!
//! Resolves the playable, signed media streams of a video page.
//!
//! A watch page is fetched, the embedded player configuration is extracted
//! and its stream map decoded into candidate streams. Each candidate is
//! classified by itag; candidates whose URL is not yet signed get their
//! signature token run through the player script's transform function by a
//! small built-in interpreter. The result is a [`Video`] whose streams can be
//! filtered by container, resolution and profile.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tuberesolve::{StreamFilter, StreamResolver, VideoClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = StreamResolver::new(VideoClient::new()?);
//!     let video = resolver.resolve("VIDEO_URL").await?;
//!
//!     let stream = video.get(&StreamFilter::new().with_resolution("720p"))?;
//!     println!("{}: {}", video.title(), stream.url);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod core;
pub mod error;
pub mod platform;
pub mod utils;

// Re-export main types
pub use crate::core::{ResolvedStream, ResolverOptions, StreamResolver, Video};
pub use error::ResolveError;
pub use platform::{Fetched, Fetcher, HttpClientConfig, StreamFilter, VideoClient};

/// Result type alias for tuberesolve operations
pub type Result<T> = std::result::Result<T, ResolveError>;
