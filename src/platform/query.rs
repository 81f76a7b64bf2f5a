//! Stream map decoding
//!
//! The page configuration carries every candidate stream in one string:
//! records are separated by `,`, fields by `&`, and each field is a
//! `key=value` pair with a percent-encoded value. Unlike a plain query
//! string, the result is one mapping per record.

use crate::error::ResolveError;
use std::collections::HashMap;
use tracing::debug;

/// One decoded candidate stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    fields: HashMap<String, Vec<String>>,
}

impl StreamRecord {
    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of `key` in the order they appeared
    pub fn get_all(&self, key: &str) -> &[String] {
        self.fields.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, key: &str, value: String) {
        self.fields.entry(key.to_string()).or_default().push(value);
    }
}

/// Decode an encoded stream map into one record per comma-separated segment.
///
/// A field without `=`, or a record without a decimal `itag`, fails the
/// whole blob; nothing is returned partially.
pub fn decode_stream_map(blob: &str) -> Result<Vec<StreamRecord>, ResolveError> {
    let mut records = Vec::new();

    for (index, segment) in blob.split(',').enumerate() {
        let mut record = StreamRecord::default();

        for field in segment.split('&') {
            let (key, value) = field.split_once('=').ok_or_else(|| {
                ResolveError::StreamMapDecode(format!(
                    "record {} has a field without '=': {:?}",
                    index, field
                ))
            })?;
            let value = urlencoding::decode(value).map_err(|e| {
                ResolveError::StreamMapDecode(format!(
                    "record {} field {:?} is not valid UTF-8: {}",
                    index, key, e
                ))
            })?;
            record.push(key, value.into_owned());
        }

        match record.get("itag") {
            Some(itag) if !itag.is_empty() && itag.bytes().all(|b| b.is_ascii_digit()) => {}
            other => {
                return Err(ResolveError::StreamMapDecode(format!(
                    "record {} has no decimal itag: {:?}",
                    index, other
                )))
            }
        }
        records.push(record);
    }

    debug!("Decoded stream map with {} records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_preserves_segment_order() {
        let blob = "itag=22&url=http%3A%2F%2Fa%2F1,itag=18&url=http%3A%2F%2Fa%2F2,itag=5&url=x";
        let records = decode_stream_map(blob).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("itag"), Some("22"));
        assert_eq!(records[1].get("itag"), Some("18"));
        assert_eq!(records[2].get("itag"), Some("5"));
        assert_eq!(records[0].get("url"), Some("http://a/1"));
    }

    #[test]
    fn test_decode_percent_decodes_values_only() {
        let records =
            decode_stream_map("itag=18&type=video%2Fmp4%3B+codecs%3D%22avc1%22&quality=hd720")
                .unwrap();

        // '+' is left alone, only %XX sequences are decoded
        assert_eq!(records[0].get("type"), Some("video/mp4;+codecs=\"avc1\""));
        assert_eq!(records[0].get("quality"), Some("hd720"));
    }

    #[test]
    fn test_decode_keeps_unknown_keys() {
        let records = decode_stream_map("itag=43&custom_flag=1&fallback_host=tc.example").unwrap();

        assert_eq!(records[0].get("custom_flag"), Some("1"));
        assert_eq!(records[0].get("fallback_host"), Some("tc.example"));
        assert_eq!(records[0].len(), 3);
    }

    #[test]
    fn test_decode_repeated_key_keeps_all_values() {
        let records = decode_stream_map("itag=18&x=1&x=2").unwrap();

        assert_eq!(records[0].get("x"), Some("1"));
        assert_eq!(records[0].get_all("x"), &["1".to_string(), "2".to_string()]);
        assert!(records[0].get_all("missing").is_empty());
    }

    #[test]
    fn test_decode_missing_equals_fails_whole_blob() {
        let result = decode_stream_map("itag=22&url=x,itag18&url=y");
        assert!(matches!(result, Err(ResolveError::StreamMapDecode(_))));
    }

    #[test]
    fn test_decode_requires_decimal_itag() {
        assert!(matches!(
            decode_stream_map("itag=18&url=x,url=y"),
            Err(ResolveError::StreamMapDecode(_))
        ));
        assert!(decode_stream_map("itag=abc&url=x").is_err());
        assert!(decode_stream_map("itag=&url=x").is_err());
    }

    #[test]
    fn test_decode_empty_blob_fails() {
        assert!(decode_stream_map("").is_err());
    }

    #[test]
    fn test_decode_invalid_utf8_fails() {
        let result = decode_stream_map("itag=18&url=%FF%FE");
        assert!(matches!(result, Err(ResolveError::StreamMapDecode(_))));
    }
}
