use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{default_base_url, parse_provider_model, provider_needs_api_key, EmbeddingsConfig};
use crate::error::{KitabError, Result};
use crate::search::Embedder;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl ApiConfig {
    /// Resolve `provider/model` naming and the provider's default base URL.
    pub fn from_embeddings_config(config: &EmbeddingsConfig) -> Result<Self> {
        let (provider, model) = parse_provider_model(&config.model);

        if provider_needs_api_key(provider) && config.api_key.is_none() {
            return Err(KitabError::ApiAuth(format!(
                "API key required for embedding provider '{provider}'. Set EMBEDDING_API_KEY or OPENAI_API_KEY."
            )));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
///
/// A request is made exactly once; rate limits and server errors surface to
/// the caller instead of being retried.
#[derive(Clone)]
pub struct EmbeddingApiClient {
    client: Client,
    config: ApiConfig,
}

impl EmbeddingApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KitabError::Embedding(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        Self::new(ApiConfig::from_embeddings_config(config)?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts.to_vec(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref api_key) = self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {api_key}"))
                    .map_err(|e| KitabError::Embedding(format!("Invalid API key header: {e}")))?,
            );
        }

        let url = format!("{}/embeddings", self.config.base_url);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| KitabError::Embedding(format!("Request failed: {e}")))?;

        let status = resp.status();

        if status.is_success() {
            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| KitabError::Embedding(format!("Failed to parse response: {e}")))?;
            return Ok(body.data.into_iter().map(|d| d.embedding).collect());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            tracing::warn!(?retry_after, "Embedding API rate limited");
            return Err(KitabError::ApiRateLimit { retry_after });
        }

        let body = resp.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(KitabError::ApiAuth(body));
        }

        if status.is_server_error() {
            return Err(KitabError::Embedding(format!("Server error {status}: {body}")));
        }

        Err(KitabError::Embedding(format!("API error {status}: {body}")))
    }
}

#[async_trait]
impl Embedder for EmbeddingApiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KitabError::Embedding("No embedding returned".to_string()))
    }
}
