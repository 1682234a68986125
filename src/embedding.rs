//! Embedding provider client.
//!
//! [`EmbeddingClient`] turns text into vectors through a hosted embeddings
//! API. Three providers share one request shape:
//!
//! - `"mistral"` — `POST https://api.mistral.ai/v1/embeddings`, bearer auth
//!   via `MISTRAL_API_KEY`
//! - `"openai"` — `POST https://api.openai.com/v1/embeddings`, bearer auth
//!   via `OPENAI_API_KEY`
//! - `"ollama"` — `POST http://localhost:11434/api/embed`, no auth
//!
//! `"disabled"` fails every call; ingestion and Q&A refuse to start when
//! no provider is configured rather than producing unsearchable chunks.
//!
//! # Retry strategy
//!
//! HTTP 429, 5xx, and network errors are transient and retried with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s) up to
//! `max_retries`; any other 4xx is a caller mistake and fails
//! immediately. The distinction matters to the ingestion pipeline, which
//! re-queues a document only for [`EmbeddingError::is_retryable`]
//! failures.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("embedding API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("embedding request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    /// Whether the ingestion pipeline may retry the whole run later.
    /// Exhausted retries stay retryable: the provider was struggling, not
    /// rejecting the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Exhausted { .. })
    }
}

/// Seam between the pipelines and the embeddings API. The production
/// implementation is [`EmbeddingClient`]; tests substitute deterministic
/// vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, preserving input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let (default_url, key_var): (&str, Option<&'static str>) = match config.provider.as_str() {
            "mistral" => ("https://api.mistral.ai/v1/embeddings", Some("MISTRAL_API_KEY")),
            "openai" => ("https://api.openai.com/v1/embeddings", Some("OPENAI_API_KEY")),
            "ollama" => ("http://localhost:11434/api/embed", None),
            _ => return Err(EmbeddingError::Disabled),
        };

        let api_key = match key_var {
            Some(var) => Some(std::env::var(var).map_err(|_| EmbeddingError::MissingApiKey(var))?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
            url: config.url.clone().unwrap_or_else(|| default_url.to_string()),
            api_key,
        })
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self
            .config
            .model
            .as_ref()
            .ok_or(EmbeddingError::Disabled)?;

        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });

        let mut last_err = String::new();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
                        let vectors = parse_embedding_response(&json)?;
                        if vectors.len() != texts.len() {
                            return Err(EmbeddingError::InvalidResponse(format!(
                                "expected {} embeddings, got {}",
                                texts.len(),
                                vectors.len()
                            )));
                        }
                        check_dimensions(&vectors, self.config.dims)?;
                        return Ok(vectors);
                    }

                    let message = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = format!("{status}: {message}");
                        continue;
                    }

                    return Err(EmbeddingError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    last_err = e.to_string();
                    continue;
                }
            }
        }

        Err(EmbeddingError::Exhausted {
            attempts: max_retries + 1,
            message: last_err,
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn model_name(&self) -> &str {
        self.config.model.as_deref().unwrap_or("disabled")
    }

    /// Batches larger than `batch_size` are split into sequential API
    /// calls.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            out.extend(self.request_with_retry(batch).await?);
        }
        Ok(out)
    }
}

/// Every stored chunk vector shares one dimensionality; a response that
/// deviates from the configured `dims` would poison the index with
/// vectors that can never match, so it is rejected outright.
fn check_dimensions(vectors: &[Vec<f32>], dims: Option<usize>) -> Result<(), EmbeddingError> {
    let Some(dims) = dims else { return Ok(()) };
    if let Some(vector) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {dims}-dimensional embedding, got {}",
            vector.len()
        )));
    }
    Ok(())
}

/// Parse an embeddings response. OpenAI-compatible APIs (OpenAI, Mistral)
/// return `data[].embedding`; Ollama returns `embeddings` directly. Both
/// shapes are accepted regardless of provider.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if let Some(data) = json.get("data").and_then(|d| d.as_array()) {
        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    EmbeddingError::InvalidResponse("missing embedding in data item".to_string())
                })?;
            embeddings.push(json_floats(embedding));
        }
        return Ok(embeddings);
    }

    if let Some(embeddings) = json.get("embeddings").and_then(|e| e.as_array()) {
        return Ok(embeddings
            .iter()
            .map(|row| json_floats(row.as_array().map(Vec::as_slice).unwrap_or(&[])))
            .collect());
    }

    Err(EmbeddingError::InvalidResponse(
        "missing data or embeddings array".to_string(),
    ))
}

fn json_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}
