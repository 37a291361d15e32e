use super::{ObjectEntry, ObjectStore};
use crate::error::{Result, WorkerError};
use crate::retry;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// HTTP client for the bucket service.
///
/// The base URL is normalized to carry a trailing slash once at
/// construction; endpoint paths are joined onto it without further
/// slash bookkeeping.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ListRequest {
    limit: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    size: i64,
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateBucket<'a> {
    name: &'a str,
    public: bool,
}

#[derive(Debug, Serialize)]
struct RemoveRequest<'a> {
    prefixes: &'a [String],
}

impl HttpObjectStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(WorkerError::Http)?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.api_key)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(WorkerError::Storage {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let buckets: Vec<BucketInfo> = retry::execute("storage.list_buckets", || async {
            let response = self.auth(self.client.get(self.endpoint("bucket"))).send().await?;
            let response = Self::check(response).await?;
            Ok(response.json().await?)
        })
        .await?;

        if buckets.iter().any(|b| b.name == bucket) {
            debug!(bucket, "Bucket already exists");
            return Ok(());
        }

        info!(bucket, "Creating public bucket");
        retry::execute("storage.create_bucket", || async {
            let response = self
                .auth(self.client.post(self.endpoint("bucket")))
                .json(&CreateBucket {
                    name: bucket,
                    public: true,
                })
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
        .await
    }

    async fn list(&self, bucket: &str, limit: usize, offset: usize) -> Result<Vec<ObjectEntry>> {
        retry::execute("storage.list", || async {
            let response = self
                .auth(
                    self.client
                        .post(self.endpoint(&format!("object/list/{bucket}"))),
                )
                .json(&ListRequest { limit, offset })
                .send()
                .await?;
            let response = Self::check(response).await?;
            let raw: Vec<RawEntry> = response.json().await?;
            Ok(raw
                .into_iter()
                .map(|e| ObjectEntry {
                    size: e.metadata.map(|m| m.size).unwrap_or(0),
                    name: e.name,
                })
                .collect())
        })
        .await
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let path = format!("object/{bucket}/{}", urlencoding::encode(key));
        retry::execute("storage.upload", || async {
            let response = self
                .auth(self.client.post(self.endpoint(&path)))
                .header("content-type", content_type)
                .header("x-upsert", "true")
                .body(bytes.clone())
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        retry::execute("storage.remove", || async {
            let response = self
                .auth(self.client.delete(self.endpoint(&format!("object/{bucket}"))))
                .json(&RemoveRequest { prefixes: keys })
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
        .await
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}object/public/{bucket}/{}",
            self.base_url,
            urlencoding::encode(key)
        )
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
