use super::{ImageSource, SpeechSynthesizer};
use crate::config::{ImageSearchConfig, TtsConfig};
use crate::error::{Result, WorkerError};
use crate::retry;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Client for the speech-synthesis endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpeechSynthesizer {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeText<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Serialize)]
struct SynthesizeSsml<'a> {
    ssml: &'a str,
}

impl HttpSpeechSynthesizer {
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(WorkerError::Http)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_for_audio<B: Serialize>(&self, body: &B) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.base_url))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Synthesis(format!("HTTP {status}")));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        retry::execute("tts.synthesize", || async {
            self.post_for_audio(&SynthesizeText { text, voice }).await
        })
        .await
    }

    async fn synthesize_ssml(&self, ssml: &str) -> Result<Vec<u8>> {
        retry::execute("tts.synthesize_ssml", || async {
            self.post_for_audio(&SynthesizeSsml { ssml }).await
        })
        .await
    }
}

/// Client for the image-search endpoint.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpImageSource {
    pub fn new(config: &ImageSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(WorkerError::Http)?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn search(&self, query: &str) -> Result<Vec<u8>> {
        retry::execute("image.search", || async {
            let mut request = self
                .client
                .get(format!("{}/search", self.base_url))
                .query(&[("q", query)]);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(WorkerError::ImageSearch(format!("HTTP {status}")));
            }
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }
}
