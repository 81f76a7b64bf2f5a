//! Stream resolution pipeline

use crate::core::video_info::{ResolvedStream, Video};
use crate::error::ResolveError;
use crate::platform::cipher::{CipherError, CipherResolver};
use crate::platform::client::Fetcher;
use crate::platform::extract::{extract_object_after, PLAYER_CONFIG_MARKER};
use crate::platform::formats;
use crate::platform::query::{decode_stream_map, StreamRecord};
use crate::utils::{append_signature, has_signature, resolve_asset_url};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static ITAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"itag=(\d+)").expect("valid regex"));

/// Page markers the pipeline keys on
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Text immediately preceding the player configuration object
    pub config_marker: String,
    /// Presence of this text marks the page as age restricted
    pub age_restriction_marker: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            config_marker: PLAYER_CONFIG_MARKER.to_string(),
            age_restriction_marker: "og:restrictions:age".to_string(),
        }
    }
}

/// Resolves a watch page into a [`Video`] with signed stream URLs.
///
/// Every call is independent: the page is fetched again and the player
/// script, if any record needs it, is fetched at most once for that call.
pub struct StreamResolver<F: Fetcher> {
    fetcher: F,
    options: ResolverOptions,
}

impl<F: Fetcher> StreamResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            options: ResolverOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolve every playable stream on the page at `page_url`
    pub async fn resolve(&self, page_url: &str) -> Result<Video, ResolveError> {
        info!("Resolving streams for {}", page_url);

        let page = self.fetch_page(page_url).await?;
        if page.contains(&self.options.age_restriction_marker) {
            return Err(ResolveError::AgeRestricted);
        }

        let config = extract_object_after(&page, &self.options.config_marker)?;
        let args = &config["args"];
        let title = args["title"].as_str().unwrap_or_default();
        let script_url = config["assets"]["js"]
            .as_str()
            .map(|asset| resolve_asset_url(page_url, asset))
            .transpose()?;

        let stream_map = args["url_encoded_fmt_stream_map"]
            .as_str()
            .ok_or(ResolveError::NoStreamMap)?;
        let records = decode_stream_map(stream_map)?;
        debug!("Stream map has {} records", records.len());

        let mut video = Video::new(page_url, title);
        let mut cipher = CipherResolver::new(&self.fetcher);

        for (index, record) in records.iter().enumerate() {
            let resolved = self
                .resolve_record(record, video.filename(), script_url.as_deref(), &mut cipher)
                .await;
            match resolved {
                Ok(Some(stream)) => video.add_stream(stream),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Skipping stream record {}: {}", index, e),
            }
        }

        info!(
            "Resolved {} of {} streams for \"{}\"",
            video.len(),
            records.len(),
            video.title()
        );
        Ok(video)
    }

    async fn fetch_page(&self, page_url: &str) -> Result<String, ResolveError> {
        let fetched = self
            .fetcher
            .fetch(page_url)
            .await
            .map_err(|e| ResolveError::fetch(page_url, format!("page unreachable: {}", e)))?;
        if !fetched.is_success() {
            return Err(ResolveError::fetch(
                page_url,
                format!("page unreachable: status {}", fetched.status),
            ));
        }
        debug!("Fetched page ({} bytes)", fetched.body.len());
        Ok(fetched.body)
    }

    /// Classify and sign one record; `Ok(None)` for itags with no known profile
    async fn resolve_record(
        &self,
        record: &StreamRecord,
        filename: &str,
        script_url: Option<&str>,
        cipher: &mut CipherResolver<'_>,
    ) -> Result<Option<ResolvedStream>, ResolveError> {
        let url = record
            .get("url")
            .ok_or_else(|| ResolveError::ItagResolution("record has no url".to_string()))?;
        let itag = itag_from_url(url)?;

        let Some(profile) = formats::lookup(itag) else {
            debug!("Skipping itag {} with no known quality profile", itag);
            return Ok(None);
        };

        let signed_url = if has_signature(url) {
            url.to_string()
        } else if let Some(sig) = record.get("sig") {
            append_signature(url, sig)
        } else {
            let token = record.get("s").ok_or(CipherError::MissingToken)?;
            let script_url = script_url.ok_or_else(|| {
                ResolveError::ConfigExtraction("player script location missing".to_string())
            })?;
            let signature = cipher.resolve(token, script_url).await?;
            append_signature(url, &signature)
        };

        let mut stream = ResolvedStream::new(signed_url, itag, *profile, filename.to_string());
        stream.quality = record.get("quality").map(str::to_string);
        stream.mime_type = record.get("type").map(str::to_string);
        Ok(Some(stream))
    }
}

/// Find the itag in a stream URL.
///
/// Exactly one `itag=` occurrence is accepted; none or several fail.
pub fn itag_from_url(url: &str) -> Result<u32, ResolveError> {
    let found: Vec<&str> = ITAG
        .captures_iter(url)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect();

    match found.as_slice() {
        [] => Err(ResolveError::ItagResolution("no itag found".to_string())),
        [itag] => itag
            .parse()
            .map_err(|_| ResolveError::ItagResolution(format!("itag {} out of range", itag))),
        _ => Err(ResolveError::ItagResolution(format!(
            "ambiguous itag, {} found",
            found.len()
        ))),
    }
}
