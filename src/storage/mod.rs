//! Object store seam: two public buckets (audio, images) behind one trait.

mod http;

pub use http::HttpObjectStore;

use crate::error::Result;
use async_trait::async_trait;

/// One stored object as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
    pub size: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket as publicly readable if it does not exist.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    async fn list(&self, bucket: &str, limit: usize, offset: usize) -> Result<Vec<ObjectEntry>>;

    /// Upload with overwrite; repeated uploads of the same key replace the
    /// object in place.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn remove(&self, bucket: &str, keys: &[String]) -> Result<()>;

    fn public_url(&self, bucket: &str, key: &str) -> String;
}

/// Extract the object key from a public URL: last path segment, query and
/// fragment stripped, percent-decoded. Returns `None` for URLs with no
/// usable segment.
pub fn object_key_from_url(raw: &str) -> Option<String> {
    let segment = match url::Url::parse(raw) {
        Ok(parsed) => parsed.path_segments()?.last()?.to_string(),
        // Relative references don't parse; fall back to plain splitting.
        Err(_) => {
            let without_fragment = raw.split('#').next().unwrap_or(raw);
            let without_query = without_fragment
                .split('?')
                .next()
                .unwrap_or(without_fragment);
            without_query.rsplit('/').next()?.to_string()
        }
    };
    if segment.is_empty() {
        return None;
    }
    match urlencoding::decode(&segment) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(segment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_last_segment_without_query() {
        assert_eq!(
            object_key_from_url("https://cdn.example/storage/v1/object/public/audio-files/abc.mp3?t=1"),
            Some("abc.mp3".to_string())
        );
    }

    #[test]
    fn key_is_percent_decoded() {
        assert_eq!(
            object_key_from_url("https://cdn.example/audio/ex_%ED%85%8C%EC%8A%A4%ED%8A%B8.mp3"),
            Some("ex_테스트.mp3".to_string())
        );
    }

    #[test]
    fn trailing_slash_yields_none() {
        assert_eq!(object_key_from_url("https://cdn.example/audio/"), None);
    }
}
