use super::TextGenerator;
use crate::config::GenerationConfig;
use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Client for the text-generation endpoint.
#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default = "default_done")]
    done: bool,
}

fn default_done() -> bool {
    true
}

impl HttpTextGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
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
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        debug!(model, "Sending generation request");

        let mut request = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::GenerationFailed(format!(
                "HTTP {status} from model {model}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::MalformedResponse(format!("undecodable body: {e}")))?;

        if !body.done {
            return Err(WorkerError::MalformedResponse(
                "model returned an incomplete response".to_string(),
            ));
        }
        if body.response.trim().is_empty() {
            return Err(WorkerError::GenerationFailed(format!(
                "empty response from model {model}"
            )));
        }

        Ok(body.response)
    }
}
